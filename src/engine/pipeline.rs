// src/engine/pipeline.rs
//
// The thumbnail pipeline: compressed bytes in, compressed bytes out.
//
// Stages run strictly in order and each consumes the previous image:
// metadata, validation, geometry, decode (with pre-shrink), colour,
// resample, cast, crop, flatten, orient, encode. Any error ends the run.

use super::color::to_srgb;
use super::decoder;
use super::format::metadata;
use super::geometry::{crop_offset, pre_shrink_factor, scale_aspect, shrink_factor};
use super::save::save;
use super::watchdog::Watchdog;
use crate::error::{Result, ThumbnailError};
use crate::ops::Options;
use tracing::debug;

/// Alpha at or above this fraction everywhere is flattened away.
pub const FLATTEN_MIN_ALPHA: f64 = 0.9;

/// Produce a thumbnail of `blob` as described by `options`.
pub fn thumbnail(blob: &[u8], options: &Options) -> Result<Vec<u8>> {
    let _watchdog = options
        .max_processing_duration
        .map(|deadline| Watchdog::arm("thumbnail", deadline));

    let m = metadata(blob)?;
    let mut o = options.check(&m)?;
    if m.format.is_jpeg() {
        // JPEG noise does not compress losslessly.
        o.save.lossless = false;
    }

    // Intermediate box in display coordinates: fits inside the request, or
    // covers it when cropping.
    let (iw, ih, trust_width) = scale_aspect(m.width, m.height, o.width, o.height, !o.crop);
    let shrinking = iw < m.width - m.width / 40 && ih < m.height - m.height / 40;

    let shrink = if m.format.supports_shrink_on_load() {
        pre_shrink_factor(
            m.width,
            m.height,
            iw,
            ih,
            trust_width,
            o.fast_resize,
            m.format.is_jpeg(),
        )
    } else {
        1
    };
    // The coarse ceiling in `check` assumes the best-case pre-shrink.
    let decoded = m.width.div_ceil(shrink) as u64 * m.height.div_ceil(shrink) as u64;
    if o.max_buffer_pixels > 0 && decoded > o.max_buffer_pixels {
        return Err(ThumbnailError::too_big(format!(
            "{decoded} decoded pixels exceed buffer ceiling {}",
            o.max_buffer_pixels
        )));
    }
    debug!(
        format = ?m.format,
        source = %format_args!("{}x{}", m.width, m.height),
        target = %format_args!("{}x{}", o.width, o.height),
        intermediate = %format_args!("{iw}x{ih}"),
        shrink,
        crop = o.crop,
        "thumbnail"
    );

    let image = decoder::load(blob, m.format, shrink)?.with_orientation(m.orientation);
    let mut image = to_srgb(image);

    // Decoded pixels are still in stored orientation.
    let orientation = image.orientation();
    let (pw, ph) = orientation.dimensions(iw, ih);
    let needs_resize = pw < image.width() || ph < image.height();
    let sharpen = o.sharpen && shrinking;
    let has_work = needs_resize || o.blur_sigma > 0.0 || sharpen;

    if has_work {
        if image.has_alpha() {
            image = image.premultiply()?;
        }
        if needs_resize {
            let xshrink = shrink_factor(image.width(), pw, o.fast_resize);
            let yshrink = shrink_factor(image.height(), ph, o.fast_resize);
            if xshrink >= 2 || yshrink >= 2 {
                image = image.shrink(xshrink, yshrink)?;
            }
            if (image.width(), image.height()) != (pw, ph) {
                image = image.resize(pw, ph)?;
            }
        }
        if o.blur_sigma > 0.0 {
            image = image.gaussian_blur(o.blur_sigma);
        }
        if sharpen {
            image = image.mild_sharpen();
        }
        image = image.unpremultiply()?;
    }

    let mut image = image.cast_u8();

    if o.crop {
        let (dw, dh) = orientation.dimensions(image.width(), image.height());
        if (dw, dh) != (o.width, o.height) {
            let (x, y) = crop_offset(dw, dh, o.width, o.height);
            let (cw, ch, cx, cy) = orientation.crop(o.width, o.height, x, y, dw, dh);
            image = image.extract_area(cx, cy, cw, ch)?;
        }
    }

    if image.min_alpha().is_some_and(|min| min >= FLATTEN_MIN_ALPHA) {
        image = image.flatten()?;
    }

    let image = orientation.apply(image);
    save(&image, &o.save)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::decoder::tests::mozjpeg_bytes;
    use crate::engine::io::tests::jpeg_with_orientation;
    use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
    use mozjpeg::ColorSpace;
    use std::io::Cursor;

    fn gradient_jpeg(width: usize, height: usize) -> Vec<u8> {
        let mut rgb = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            for x in 0..width {
                rgb.extend_from_slice(&[(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]);
            }
        }
        mozjpeg_bytes(width, height, ColorSpace::JCS_RGB, &rgb)
    }

    fn encode(img: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    fn dims(out: &[u8]) -> (u32, u32) {
        image::load_from_memory(out).unwrap().dimensions()
    }

    fn sized(width: u32, height: u32, crop: bool) -> Options {
        Options {
            width,
            height,
            crop,
            ..Default::default()
        }
    }

    #[test]
    fn test_fit_within_box() {
        let jpeg = gradient_jpeg(398, 536);
        assert_eq!(dims(&thumbnail(&jpeg, &sized(200, 300, false)).unwrap()), (200, 270));
        assert_eq!(dims(&thumbnail(&jpeg, &sized(200, 0, false)).unwrap()), (200, 270));
        assert_eq!(dims(&thumbnail(&jpeg, &sized(0, 300, false)).unwrap()), (223, 300));
    }

    #[test]
    fn test_never_upscales() {
        let jpeg = gradient_jpeg(398, 536);
        assert_eq!(
            dims(&thumbnail(&jpeg, &sized(2048, 2048, false)).unwrap()),
            (398, 536)
        );
        assert_eq!(dims(&thumbnail(&jpeg, &Options::default()).unwrap()), (398, 536));
    }

    #[test]
    fn test_crop_exact_box() {
        let jpeg = gradient_jpeg(398, 536);
        assert_eq!(dims(&thumbnail(&jpeg, &sized(300, 400, true)).unwrap()), (300, 400));
        assert_eq!(dims(&thumbnail(&jpeg, &sized(100, 100, true)).unwrap()), (100, 100));
    }

    #[test]
    fn test_oversized_crop_keeps_aspect() {
        let jpeg = gradient_jpeg(398, 536);
        assert_eq!(
            dims(&thumbnail(&jpeg, &sized(2000, 1500, true)).unwrap()),
            (398, 299)
        );
    }

    #[test]
    fn test_exif_orientation_is_applied() {
        // Stored 80x48, tagged "rotate 90 clockwise": displayed 48x80.
        let jpeg = jpeg_with_orientation(&gradient_jpeg(80, 48), 6);
        let out = thumbnail(&jpeg, &Options::default()).unwrap();
        assert_eq!(dims(&out), (48, 80));

        let out = thumbnail(&jpeg, &sized(24, 0, false)).unwrap();
        assert_eq!(dims(&out), (24, 40));

        let out = thumbnail(&jpeg, &sized(40, 40, true)).unwrap();
        assert_eq!(dims(&out), (40, 40));
    }

    #[test]
    fn test_rejections() {
        let tiny = encode(
            DynamicImage::ImageRgb8(RgbImage::new(1, 1)),
            ImageFormat::Png,
        );
        assert!(matches!(
            thumbnail(&tiny, &Options::default()),
            Err(ThumbnailError::TooSmall { .. })
        ));

        let wide = encode(
            DynamicImage::ImageLuma8(image::GrayImage::new(34000, 16)),
            ImageFormat::Png,
        );
        assert!(matches!(
            thumbnail(&wide, &Options::default()),
            Err(ThumbnailError::TooBig { .. })
        ));

        assert!(matches!(
            thumbnail(b"just some text\n", &Options::default()),
            Err(ThumbnailError::UnknownFormat)
        ));

        let blurred = Options {
            blur_sigma: 9.0,
            ..Default::default()
        };
        assert!(matches!(
            thumbnail(&gradient_jpeg(16, 16), &blurred),
            Err(ThumbnailError::BadOption { .. })
        ));
    }

    #[test]
    fn test_buffer_ceiling_allows_jpeg_pre_shrink() {
        let limited = Options {
            max_buffer_pixels: 10_000,
            width: 50,
            ..Default::default()
        };
        let png = encode(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 200, Rgb([1, 2, 3]))),
            ImageFormat::Png,
        );
        assert!(matches!(
            thumbnail(&png, &limited),
            Err(ThumbnailError::TooBig { .. })
        ));
        assert_eq!(dims(&thumbnail(&gradient_jpeg(200, 200), &limited).unwrap()), (50, 50));
    }

    #[test]
    fn test_webp_and_jpeg_pre_shrink_agree() {
        let rgb = RgbImage::from_pixel(100, 99, Rgb([40, 80, 120]));
        let webp = webp::Encoder::from_rgb(rgb.as_raw(), 100, 99)
            .encode(90.0)
            .to_vec();
        let options = Options {
            width: 50,
            height: 50,
            fast_resize: true,
            ..Default::default()
        };
        assert_eq!(dims(&thumbnail(&webp, &options).unwrap()), (50, 50));
        assert_eq!(dims(&thumbnail(&gradient_jpeg(100, 99), &options).unwrap()), (50, 50));
    }

    #[test]
    fn test_buffer_ceiling_counts_actual_pre_shrink() {
        // Fits the 64x allowance, but source size means no pre-shrink.
        let jpeg = gradient_jpeg(200, 200);
        let limited = Options {
            max_buffer_pixels: 1_000,
            ..Default::default()
        };
        assert!(matches!(
            thumbnail(&jpeg, &limited),
            Err(ThumbnailError::TooBig { .. })
        ));

        // 200 -> 25 allows an 8x decode: 25x25 pixels.
        let small = Options {
            max_buffer_pixels: 625,
            width: 25,
            fast_resize: true,
            ..Default::default()
        };
        assert_eq!(dims(&thumbnail(&jpeg, &small).unwrap()), (25, 25));
    }

    #[test]
    fn test_default_format_follows_source() {
        let lossless = Options {
            save: crate::ops::SaveOptions {
                lossless: true,
                lossy_if_photo: true,
                ..Default::default()
            },
            ..Default::default()
        };

        let gif = encode(
            DynamicImage::ImageRgb8(RgbImage::from_fn(32, 32, |x, _| {
                if x < 16 {
                    Rgb([255, 0, 0])
                } else {
                    Rgb([0, 0, 255])
                }
            })),
            ImageFormat::Gif,
        );
        let out = thumbnail(&gif, &lossless).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Png);

        let out = thumbnail(&gradient_jpeg(32, 32), &lossless).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_nearly_opaque_alpha_is_flattened() {
        let png_with_alpha = |alpha| {
            encode(
                DynamicImage::ImageRgba8(RgbaImage::from_pixel(20, 20, Rgba([90, 90, 90, alpha]))),
                ImageFormat::Png,
            )
        };

        let out = thumbnail(&png_with_alpha(240), &sized(10, 10, false)).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Jpeg);

        let out = thumbnail(&png_with_alpha(100), &sized(10, 10, false)).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Png);
        let decoded = image::load_from_memory(&out).unwrap();
        assert!(decoded.color().has_alpha());
        assert_eq!(decoded.dimensions(), (10, 10));
    }

    #[test]
    fn test_preview_options_blur_and_shrink() {
        let options = Options {
            width: 64,
            height: 64,
            blur_sigma: 0.4,
            sharpen: true,
            save: crate::ops::SaveOptions {
                format: Some(crate::ops::OutputFormat::Jpeg),
                quality: 40,
                ..Default::default()
            },
            ..Default::default()
        };
        let out = thumbnail(&gradient_jpeg(640, 480), &options).unwrap();
        assert_eq!(dims(&out), (64, 48));
    }
}
