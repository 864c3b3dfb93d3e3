// src/engine/io.rs
//
// Container-level reads on the source blob: embedded ICC profiles and the
// EXIF orientation tag. Neither needs decoded pixels.

use super::format::SourceFormat;
use super::orientation::Orientation;
use img_parts::{jpeg::Jpeg, png::Png, webp::WebP, ImageICC};
use std::io::Cursor;

/// Extract the embedded ICC profile, if present and structurally sane.
pub fn extract_icc_profile(data: &[u8], format: SourceFormat) -> Option<Vec<u8>> {
    let icc_data = match format {
        SourceFormat::Jpeg => extract_icc_from_jpeg(data)?,
        SourceFormat::Png => extract_icc_from_png(data)?,
        SourceFormat::WebP => extract_icc_from_webp(data)?,
        SourceFormat::Gif | SourceFormat::Tiff => return None,
    };

    if validate_icc_profile(&icc_data) {
        Some(icc_data)
    } else {
        None
    }
}

/// Validate ICC profile header
/// ICC profiles must start with a 128-byte header containing specific fields
pub(crate) fn validate_icc_profile(icc_data: &[u8]) -> bool {
    if icc_data.len() < 128 {
        return false;
    }

    // Profile size field (bytes 0-3, big-endian) must match the data
    let profile_size =
        u32::from_be_bytes([icc_data[0], icc_data[1], icc_data[2], icc_data[3]]) as usize;
    if profile_size != icc_data.len() {
        return false;
    }

    let printable = |range: std::ops::Range<usize>| {
        icc_data[range]
            .iter()
            .all(|&b| (32..=126).contains(&b) || b == 0)
    };

    // CMM type, profile class, data colour space and PCS are ASCII tags
    if !printable(4..8) || !printable(12..16) || !printable(16..20) || !printable(20..24) {
        return false;
    }

    // Major version is 2, 4 or 5 in practice
    icc_data[8] <= 10
}

pub(crate) fn extract_icc_from_jpeg(data: &[u8]) -> Option<Vec<u8>> {
    let jpeg = Jpeg::from_bytes(data.to_vec().into()).ok()?;
    jpeg.icc_profile().map(|icc| icc.to_vec())
}

pub(crate) fn extract_icc_from_png(data: &[u8]) -> Option<Vec<u8>> {
    let png = Png::from_bytes(data.to_vec().into()).ok()?;
    png.icc_profile().map(|icc| icc.to_vec())
}

pub(crate) fn extract_icc_from_webp(data: &[u8]) -> Option<Vec<u8>> {
    let webp = WebP::from_bytes(data.to_vec().into()).ok()?;
    webp.icc_profile().map(|icc| icc.to_vec())
}

/// Read the EXIF Orientation tag. Missing or invalid tags read as `Undefined`.
pub fn detect_exif_orientation(bytes: &[u8]) -> Orientation {
    let mut cursor = Cursor::new(bytes);
    let Ok(exif) = exif::Reader::new().read_from_container(&mut cursor) else {
        return Orientation::Undefined;
    };
    exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .and_then(|value| u16::try_from(value).ok())
        .map(Orientation::from_exif)
        .unwrap_or(Orientation::Undefined)
}
