// src/engine/format.rs
//
// Source format detection and the cheap metadata path.

use super::io::detect_exif_orientation;
use super::orientation::Orientation;
use crate::error::{Result, ThumbnailError};
use image::{ImageDecoder, ImageFormat, ImageReader};
use std::io::Cursor;

/// Formats the pipeline can load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    Jpeg,
    Png,
    Gif,
    WebP,
    Tiff,
}

impl SourceFormat {
    /// Detect by magic bytes. `None` for anything unrecognised.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some(Self::Png)
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if bytes.len() >= 16 && &bytes[..4] == b"RIFF" && &bytes[8..14] == b"WEBPVP" {
            Some(Self::WebP)
        } else if bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*") {
            Some(Self::Tiff)
        } else {
            None
        }
    }

    pub fn is_jpeg(self) -> bool {
        self == Self::Jpeg
    }

    /// Largest per-axis factor the decoder can shrink by while loading.
    /// Only JPEG counts towards the buffer ceiling allowance.
    pub fn max_pre_shrink(self) -> u32 {
        match self {
            Self::Jpeg => super::geometry::MAX_JPEG_SHRINK,
            _ => 1,
        }
    }

    /// True when `decoder::load` honours a shrink factor.
    pub fn supports_shrink_on_load(self) -> bool {
        matches!(self, Self::Jpeg | Self::WebP)
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
            Self::Gif => ImageFormat::Gif,
            Self::WebP => ImageFormat::WebP,
            Self::Tiff => ImageFormat::Tiff,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
            Self::Tiff => "image/tiff",
        }
    }
}

/// Header facts about a source blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    /// Display width: EXIF axis swaps already applied.
    pub width: u32,
    /// Display height.
    pub height: u32,
    pub format: SourceFormat,
    pub orientation: Orientation,
    pub has_alpha: bool,
}

/// Read dimensions, alpha and orientation without decoding pixels.
pub fn metadata(bytes: &[u8]) -> Result<Metadata> {
    let format = SourceFormat::detect(bytes).ok_or_else(ThumbnailError::unknown_format)?;

    let decoder = ImageReader::with_format(Cursor::new(bytes), format.image_format())
        .into_decoder()
        .map_err(|_| ThumbnailError::unknown_format())?;
    let (stored_w, stored_h) = decoder.dimensions();
    let has_alpha = decoder.color_type().has_alpha();
    drop(decoder);

    let orientation = match format {
        SourceFormat::Gif => Orientation::Undefined,
        _ => detect_exif_orientation(bytes),
    };
    let (width, height) = orientation.dimensions(stored_w, stored_h);

    Ok(Metadata {
        width,
        height,
        format,
        orientation,
        has_alpha,
    })
}
