// src/engine/color.rs
//
// Colour management: embedded ICC profile -> sRGB, CMYK -> sRGB.
// Profile failures are not fatal; the pixels are used as they are.

use super::raster::{Image, Interpretation};
use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
use moxcms::{ColorProfile, Layout, TransformOptions};
use tracing::{debug, warn};

/// Bring the image into sRGB (or leave greyscale alone).
pub fn to_srgb(image: Image) -> Image {
    let mut image = image;
    let icc = image.take_icc_profile();

    match (image.interpretation(), icc) {
        (Interpretation::Cmyk, icc) => {
            let pixels = cmyk_to_rgb(image.as_dynamic(), icc.as_deref());
            image.into_interpretation(pixels, Interpretation::Srgb)
        }
        (Interpretation::Srgb, Some(icc)) => match icc_to_srgb(image.as_dynamic(), &icc) {
            Ok(Some(pixels)) => image.into_interpretation(pixels, Interpretation::Srgb),
            Ok(None) => image,
            Err(reason) => {
                warn!("ignoring embedded ICC profile: {reason}");
                image
            }
        },
        _ => image,
    }
}

/// Transform RGB(A) pixels through `icc` into sRGB. `Ok(None)` means the
/// buffer layout has no ICC path (greyscale, float).
fn icc_to_srgb(img: &DynamicImage, icc: &[u8]) -> Result<Option<DynamicImage>, String> {
    let src = ColorProfile::new_from_slice(icc).map_err(|e| format!("bad profile: {e:?}"))?;
    let dst = ColorProfile::new_srgb();
    let options = TransformOptions::default();

    let (width, height) = (img.width(), img.height());
    let out = match img {
        DynamicImage::ImageRgb8(buf) => {
            let t = src
                .create_transform_8bit(Layout::Rgb, &dst, Layout::Rgb, options)
                .map_err(|e| format!("{e:?}"))?;
            let mut out = vec![0u8; buf.as_raw().len()];
            t.transform(buf.as_raw(), &mut out).map_err(|e| format!("{e:?}"))?;
            RgbImage::from_raw(width, height, out).map(DynamicImage::ImageRgb8)
        }
        DynamicImage::ImageRgba8(buf) => {
            let t = src
                .create_transform_8bit(Layout::Rgba, &dst, Layout::Rgba, options)
                .map_err(|e| format!("{e:?}"))?;
            let mut out = vec![0u8; buf.as_raw().len()];
            t.transform(buf.as_raw(), &mut out).map_err(|e| format!("{e:?}"))?;
            image::RgbaImage::from_raw(width, height, out).map(DynamicImage::ImageRgba8)
        }
        DynamicImage::ImageRgb16(buf) => {
            let t = src
                .create_transform_16bit(Layout::Rgb, &dst, Layout::Rgb, options)
                .map_err(|e| format!("{e:?}"))?;
            let mut out = vec![0u16; buf.as_raw().len()];
            t.transform(buf.as_raw(), &mut out).map_err(|e| format!("{e:?}"))?;
            ImageBuffer::<Rgb<u16>, _>::from_raw(width, height, out).map(DynamicImage::ImageRgb16)
        }
        DynamicImage::ImageRgba16(buf) => {
            let t = src
                .create_transform_16bit(Layout::Rgba, &dst, Layout::Rgba, options)
                .map_err(|e| format!("{e:?}"))?;
            let mut out = vec![0u16; buf.as_raw().len()];
            t.transform(buf.as_raw(), &mut out).map_err(|e| format!("{e:?}"))?;
            ImageBuffer::<image::Rgba<u16>, _>::from_raw(width, height, out)
                .map(DynamicImage::ImageRgba16)
        }
        _ => {
            debug!("no ICC transform for {:?}", img.color());
            return Ok(None);
        }
    };
    out.map(Some)
        .ok_or_else(|| "transformed buffer size mismatch".to_string())
}

/// CMYK -> RGB. Uses the embedded profile when it transforms cleanly,
/// otherwise the naive device conversion.
fn cmyk_to_rgb(img: &DynamicImage, icc: Option<&[u8]>) -> DynamicImage {
    let cmyk = img.to_rgba8();
    if let Some(icc) = icc {
        match cmyk_icc_to_rgb(&cmyk, icc) {
            Ok(rgb) => return DynamicImage::ImageRgb8(rgb),
            Err(reason) => warn!("CMYK profile unusable, using device conversion: {reason}"),
        }
    }

    // Adobe CMYK is stored inverted, so each band already reads as "ink left out".
    DynamicImage::ImageRgb8(RgbImage::from_fn(cmyk.width(), cmyk.height(), |x, y| {
        let [c, m, y, k] = cmyk.get_pixel(x, y).0;
        let k = k as u16;
        Rgb([
            (c as u16 * k / 255) as u8,
            (m as u16 * k / 255) as u8,
            (y as u16 * k / 255) as u8,
        ])
    }))
}

fn cmyk_icc_to_rgb(cmyk: &image::RgbaImage, icc: &[u8]) -> Result<RgbImage, String> {
    let src = ColorProfile::new_from_slice(icc).map_err(|e| format!("bad profile: {e:?}"))?;
    let dst = ColorProfile::new_srgb();
    let t = src
        .create_transform_8bit(Layout::Rgba, &dst, Layout::Rgb, TransformOptions::default())
        .map_err(|e| format!("{e:?}"))?;

    // Profiles expect ink amounts, Adobe stores the complement.
    let ink: Vec<u8> = cmyk.as_raw().iter().map(|v| 255 - v).collect();
    let mut out = vec![0u8; cmyk.width() as usize * cmyk.height() as usize * 3];
    t.transform(&ink, &mut out).map_err(|e| format!("{e:?}"))?;
    RgbImage::from_raw(cmyk.width(), cmyk.height(), out)
        .ok_or_else(|| "transformed buffer size mismatch".to_string())
}
