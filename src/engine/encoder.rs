// src/engine/encoder.rs
//
// Encoder operations: JPEG (mozjpeg), PNG (image + oxipng), WebP (libwebp).
//
// Inputs are upright 8-bit sRGB or grey images. Output never carries
// metadata: EXIF is already applied and colour is already sRGB.

use super::common::run_with_panic_policy;
use super::MAX_DIMENSION;
use crate::error::{Result, ThumbnailError};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::DynamicImage;
use mozjpeg::{ColorSpace, Compress};
use std::borrow::Cow;
use std::ops::RangeInclusive;

/// Pixel counts for which progressive JPEG pays off. Smaller images gain
/// nothing from extra scans; larger ones cost too much memory to encode.
pub const PROGRESSIVE_PIXELS: RangeInclusive<u64> = (200 * 200)..=(1024 * 1024);

fn check_encodable(img: &DynamicImage, format: &'static str) -> Result<(u32, u32)> {
    let (w, h) = (img.width(), img.height());
    if w == 0 || h == 0 {
        return Err(ThumbnailError::encode_failed(
            format,
            "width or height is zero",
        ));
    }
    if w > MAX_DIMENSION || h > MAX_DIMENSION {
        return Err(ThumbnailError::encode_failed(
            format,
            format!("{w}x{h} exceeds {MAX_DIMENSION}px"),
        ));
    }
    Ok((w, h))
}

/// Encode to JPEG with mozjpeg. Huffman tables are always optimised;
/// progressive mode only inside `PROGRESSIVE_PIXELS`.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        let (w, h) = check_encodable(img, "jpeg")?;
        let grey = !img.color().has_color();

        // Alpha never reaches here: callers flatten or pick PNG/WebP.
        let (pixels, components): (Cow<'_, [u8]>, usize) = match img {
            DynamicImage::ImageLuma8(buf) => (Cow::Borrowed(buf.as_raw()), 1),
            DynamicImage::ImageRgb8(buf) => (Cow::Borrowed(buf.as_raw()), 3),
            other if grey => (Cow::Owned(other.to_luma8().into_raw()), 1),
            other => (Cow::Owned(other.to_rgb8().into_raw()), 3),
        };

        let mut comp = if grey {
            Compress::new(ColorSpace::JCS_GRAYSCALE)
        } else {
            Compress::new(ColorSpace::JCS_RGB)
        };

        let progressive = PROGRESSIVE_PIXELS.contains(&(w as u64 * h as u64));
        if !progressive {
            // mozjpeg defaults to progressive + trellis; start from baseline.
            comp.set_fastest_defaults();
        }

        comp.set_size(w as usize, h as usize);
        if !grey {
            comp.set_color_space(ColorSpace::JCS_YCbCr);
            comp.set_chroma_sampling_pixel_sizes((2, 2), (2, 2));
        }
        comp.set_quality(quality.clamp(1, 100) as f32);
        if progressive {
            comp.set_progressive_mode();
        }
        comp.set_optimize_coding(true);

        let mut output = Vec::with_capacity((w as usize * h as usize * components / 10).max(4096));
        {
            let mut writer = comp.start_compress(&mut output).map_err(|e| {
                ThumbnailError::encode_failed(
                    "jpeg",
                    format!("mozjpeg: failed to start compress: {e:?}"),
                )
            })?;

            let stride = w as usize * components;
            for row in pixels.chunks(stride) {
                writer.write_scanlines(row).map_err(|e| {
                    ThumbnailError::encode_failed(
                        "jpeg",
                        format!("mozjpeg: failed to write scanlines: {e:?}"),
                    )
                })?;
            }

            writer.finish().map_err(|e| {
                ThumbnailError::encode_failed("jpeg", format!("mozjpeg: failed to finish: {e:?}"))
            })?;
        }

        Ok(output)
    })
}

/// Map a gzip-style level (1-9) onto an oxipng preset (0-6).
pub fn png_preset(compression: u8) -> u8 {
    (compression.clamp(1, 9) - 1) * 6 / 8
}

/// Encode to PNG, then re-deflate with oxipng. The image encoder never
/// interlaces and oxipng keeps the input's interlacing.
pub fn encode_png(img: &DynamicImage, compression: u8) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:png", || {
        check_encodable(img, "png")?;

        let mut buf = Vec::new();
        let encoder =
            PngEncoder::new_with_quality(&mut buf, CompressionType::Fast, FilterType::Adaptive);
        img.write_with_encoder(encoder)
            .map_err(|e| ThumbnailError::encode_failed("png", format!("PNG encode failed: {e}")))?;

        let mut options = oxipng::Options::from_preset(png_preset(compression));
        options.strip = oxipng::StripChunks::Safe;

        oxipng::optimize_from_memory(&buf, &options).map_err(|e| {
            ThumbnailError::encode_failed("png", format!("oxipng optimization failed: {e}"))
        })
    })
}

/// Encode to WebP. Alpha is kept when present.
pub fn encode_webp(img: &DynamicImage, quality: u8, lossless: bool) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:webp", || {
        let (w, h) = check_encodable(img, "webp")?;

        let has_alpha = img.color().has_alpha();
        let pixels: Cow<'_, [u8]> = match img {
            DynamicImage::ImageRgb8(buf) if !has_alpha => Cow::Borrowed(buf.as_raw()),
            DynamicImage::ImageRgba8(buf) => Cow::Borrowed(buf.as_raw()),
            other if has_alpha => Cow::Owned(other.to_rgba8().into_raw()),
            other => Cow::Owned(other.to_rgb8().into_raw()),
        };
        let encoder = if has_alpha {
            webp::Encoder::from_rgba(&pixels, w, h)
        } else {
            webp::Encoder::from_rgb(&pixels, w, h)
        };

        let mut config = webp::WebPConfig::new().map_err(|_| {
            ThumbnailError::encode_failed("webp", "failed to create WebPConfig")
        })?;
        config.lossless = i32::from(lossless);
        config.quality = quality.clamp(1, 100) as f32;
        config.method = 4;

        let mem = encoder.encode_advanced(&config).map_err(|e| {
            ThumbnailError::encode_failed("webp", format!("WebP encode failed: {e:?}"))
        })?;
        Ok(mem.to_vec())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Rgb, RgbImage, Rgba, RgbaImage};
    use img_parts::jpeg::Jpeg;
    use img_parts::Bytes;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }))
    }

    fn is_progressive(jpeg: &[u8]) -> bool {
        let parsed = Jpeg::from_bytes(Bytes::from(jpeg.to_vec())).unwrap();
        parsed.segments().iter().any(|s| s.marker() == 0xC2)
    }

    #[test]
    fn test_encode_jpeg_produces_valid_jpeg() {
        let result = encode_jpeg(&gradient(100, 100), 80).unwrap();
        assert_eq!(&result[0..2], &[0xFF, 0xD8]);
        assert_eq!(&result[result.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_jpeg_progressive_only_in_window() {
        assert!(!is_progressive(&encode_jpeg(&gradient(100, 100), 80).unwrap()));
        assert!(is_progressive(&encode_jpeg(&gradient(300, 300), 80).unwrap()));
        assert!(!is_progressive(&encode_jpeg(&gradient(1100, 1000), 80).unwrap()));
    }

    #[test]
    fn test_jpeg_grey_stays_single_channel() {
        let grey = DynamicImage::ImageLuma8(GrayImage::from_fn(32, 32, |x, _| {
            image::Luma([x as u8 * 8])
        }));
        let jpeg = encode_jpeg(&grey, 85).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!(decoded.color(), image::ColorType::L8);
    }

    #[test]
    fn test_png_is_lossless_and_not_interlaced() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_fn(20, 10, |x, y| {
            Rgba([x as u8 * 10, y as u8 * 20, 7, (x * y) as u8])
        }));
        for level in [1, 6, 9] {
            let png = encode_png(&img, level).unwrap();
            assert_eq!(&png[1..4], b"PNG");
            // IHDR interlace method byte
            assert_eq!(png[28], 0);
            let decoded = image::load_from_memory(&png).unwrap();
            assert_eq!(decoded.to_rgba8(), img.to_rgba8());
        }
    }

    #[test]
    fn test_png_preset_mapping() {
        assert_eq!(png_preset(0), 0);
        assert_eq!(png_preset(1), 0);
        assert_eq!(png_preset(6), 3);
        assert_eq!(png_preset(9), 6);
        assert_eq!(png_preset(200), 6);
    }

    #[test]
    fn test_webp_lossless_round_trip() {
        let img = gradient(16, 8);
        let encoded = encode_webp(&img, 85, true).unwrap();
        assert_eq!(&encoded[0..4], b"RIFF");
        assert_eq!(&encoded[8..12], b"WEBP");
        let decoded = webp::Decoder::new(&encoded).decode().unwrap().to_image();
        assert_eq!(decoded.to_rgb8(), img.to_rgb8());
    }

    #[test]
    fn test_webp_keeps_alpha() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 40])));
        let encoded = encode_webp(&img, 60, false).unwrap();
        let features = webp::BitstreamFeatures::new(&encoded).unwrap();
        assert!(features.has_alpha());
    }

    #[test]
    fn test_zero_sized_image_is_rejected() {
        let empty = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        assert!(matches!(
            encode_jpeg(&empty, 80),
            Err(ThumbnailError::EncodeFailed { .. })
        ));
    }
}
