// src/engine/save.rs
//
// Output format decision and dispatch to the encoders.

use super::encoder::{encode_jpeg, encode_png, encode_webp};
use super::photo::is_photo;
use super::raster::Image;
use crate::error::Result;
use crate::ops::{OutputFormat, SaveOptions};
use tracing::debug;

/// Images at or above this many pixels skip photo detection and are
/// treated as photographs.
pub const PHOTO_DETECTION_MAX_PIXELS: u64 = 3 * 1024 * 1024;

/// Whether the image should be stored losslessly.
pub fn use_lossless(image: &Image, options: &SaveOptions) -> bool {
    if !options.lossless {
        return false;
    }
    if !options.lossy_if_photo {
        return true;
    }
    if image.pixel_count() >= PHOTO_DETECTION_MAX_PIXELS {
        return false;
    }
    !is_photo(image)
}

/// The concrete format and lossless flag `save` will use.
pub fn choose_format(image: &Image, options: &SaveOptions) -> (OutputFormat, bool) {
    match options.format {
        Some(OutputFormat::WebP) => (OutputFormat::WebP, use_lossless(image, options)),
        Some(format) => (format, format == OutputFormat::Png),
        None if options.allow_webp => (OutputFormat::WebP, use_lossless(image, options)),
        None if image.has_alpha() => (OutputFormat::Png, true),
        None => {
            if use_lossless(image, options) {
                (OutputFormat::Png, true)
            } else {
                (OutputFormat::Jpeg, false)
            }
        }
    }
}

/// Encode an upright, 8-bit image.
pub fn save(image: &Image, options: &SaveOptions) -> Result<Vec<u8>> {
    let (format, lossless) = choose_format(image, options);
    let quality = options.effective_quality();
    debug!(
        %format,
        lossless,
        quality,
        width = image.width(),
        height = image.height(),
        "encoding"
    );

    let pixels = image.as_dynamic();
    match format {
        OutputFormat::Jpeg => encode_jpeg(pixels, quality),
        OutputFormat::Png => encode_png(pixels, options.effective_compression()),
        OutputFormat::WebP => encode_webp(pixels, quality, lossless),
    }
}
