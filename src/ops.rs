// src/ops.rs
//
// Request options.
// Cheap to create and copy; validated once per request by Options::check()
// against the source metadata, immutable afterwards.

use crate::engine::{scale_aspect, Metadata, MAX_DIMENSION, MIN_DIMENSION};
use crate::error::{Result, ThumbnailError};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_QUALITY: u8 = 85;
pub const DEFAULT_COMPRESSION: u8 = 6;
pub const MAX_BLUR_SIGMA: f64 = 8.0;

/// Output format for encoding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::WebP => "webp",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoder settings.
///
/// `quality` 0 and `compression` 0 mean "use the default".
#[derive(Clone, Debug, PartialEq)]
pub struct SaveOptions {
    /// Forced output format; `None` lets the save step decide.
    pub format: Option<OutputFormat>,
    /// Lossy quality, 1-100.
    pub quality: u8,
    /// PNG deflate level, 1-9.
    pub compression: u8,
    /// Prefer WebP when no format is forced.
    pub allow_webp: bool,
    /// Allow lossless output at all.
    pub lossless: bool,
    /// With `lossless`, still go lossy when the image looks like a photo.
    pub lossy_if_photo: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            format: None,
            quality: 0,
            compression: 0,
            allow_webp: false,
            lossless: false,
            lossy_if_photo: false,
        }
    }
}

impl SaveOptions {
    /// Quality with the default applied and clamped to [1, 100].
    pub fn effective_quality(&self) -> u8 {
        if self.quality == 0 {
            DEFAULT_QUALITY
        } else {
            self.quality.min(100)
        }
    }

    /// Compression with the default applied and clamped to [1, 9].
    pub fn effective_compression(&self) -> u8 {
        if self.compression == 0 {
            DEFAULT_COMPRESSION
        } else {
            self.compression.min(9)
        }
    }
}

/// Thumbnail request.
#[derive(Clone, Debug, PartialEq)]
pub struct Options {
    /// Target width; 0 keeps the source width.
    pub width: u32,
    /// Target height; 0 keeps the source height.
    pub height: u32,
    /// Crop to the requested aspect ratio instead of fitting within it.
    pub crop: bool,
    /// Mildly sharpen when shrinking.
    pub sharpen: bool,
    /// Let the decoder and box filter shrink all the way down.
    pub fast_resize: bool,
    /// Gaussian blur sigma, 0 disables.
    pub blur_sigma: f64,
    /// Ceiling on decoded pixels; 0 disables.
    pub max_buffer_pixels: u64,
    /// How long a proxy request may wait for admission; `None` uses the proxy default.
    pub max_queue_duration: Option<Duration>,
    /// Watchdog budget for one pipeline run; `None` disables the watchdog.
    pub max_processing_duration: Option<Duration>,
    pub save: SaveOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            crop: false,
            sharpen: false,
            fast_resize: false,
            blur_sigma: 0.0,
            max_buffer_pixels: 0,
            max_queue_duration: None,
            max_processing_duration: None,
            save: SaveOptions::default(),
        }
    }
}

impl Options {
    /// Validate against the source metadata and fill in derived values.
    pub fn check(&self, m: &Metadata) -> Result<Options> {
        if m.width < MIN_DIMENSION || m.height < MIN_DIMENSION {
            return Err(ThumbnailError::too_small(m.width, m.height));
        }
        if m.width > MAX_DIMENSION || m.height > MAX_DIMENSION {
            return Err(ThumbnailError::too_big(format!(
                "source {}x{} exceeds {MAX_DIMENSION}px",
                m.width, m.height
            )));
        }

        let mut o = self.clone();
        if o.width == 0 {
            o.width = m.width;
        }
        if o.height == 0 {
            o.height = m.height;
        }
        if o.width > MAX_DIMENSION || o.height > MAX_DIMENSION {
            return Err(ThumbnailError::too_big(format!(
                "requested {}x{} exceeds {MAX_DIMENSION}px",
                o.width, o.height
            )));
        }

        // A crop box larger than the source shrinks to the largest box of
        // the same aspect ratio that still fits.
        if o.crop && (o.width > m.width || o.height > m.height) {
            let (w, h, _) = scale_aspect(o.width, o.height, m.width, m.height, true);
            o.width = w;
            o.height = h;
        }

        if o.max_buffer_pixels > 0 {
            let scale = m.format.max_pre_shrink() as u64;
            let pixels = m.width as u64 * m.height as u64;
            if pixels > o.max_buffer_pixels * scale * scale {
                return Err(ThumbnailError::too_big(format!(
                    "{pixels} source pixels exceed buffer ceiling {}",
                    o.max_buffer_pixels
                )));
            }
        }

        if !(0.0..=MAX_BLUR_SIGMA).contains(&o.blur_sigma) {
            return Err(ThumbnailError::bad_option(
                "blur_sigma",
                o.blur_sigma.to_string(),
                "must be within [0, 8]",
            ));
        }
        if o.save.quality > 100 {
            return Err(ThumbnailError::bad_option(
                "quality",
                o.save.quality.to_string(),
                "must be within [1, 100]",
            ));
        }
        if o.save.compression > 9 {
            return Err(ThumbnailError::bad_option(
                "compression",
                o.save.compression.to_string(),
                "must be within [1, 9]",
            ));
        }

        Ok(o)
    }
}
