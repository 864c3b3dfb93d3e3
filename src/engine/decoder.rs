// src/engine/decoder.rs
//
// Decoder operations: JPEG (mozjpeg, with DCT-domain shrink), PNG (zune-png),
// WebP (libwebp), GIF/TIFF (image crate).
//
// Decoders never rotate. The returned image carries its pixels exactly as
// stored; the pipeline attaches the EXIF orientation.

use super::common::run_with_panic_policy;
use super::format::SourceFormat;
use super::geometry::MAX_JPEG_SHRINK;
use super::io::extract_icc_profile;
use super::raster::{Image, Interpretation};
use super::MAX_DIMENSION;
use crate::error::{Result, ThumbnailError};
use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};
use mozjpeg::{ColorSpace as JpegColorSpace, Decompress};
use webp::{BitstreamFeatures, Decoder as WebPDecoder};
use zune_core::bytestream::ZCursor;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_png::PngDecoder;

/// Load `bytes`, shrinking by `shrink` while decoding where the format
/// allows it. Formats without shrink-on-load ignore the factor.
pub fn load(bytes: &[u8], format: SourceFormat, shrink: u32) -> Result<Image> {
    let image = match format {
        SourceFormat::Jpeg => decode_jpeg_mozjpeg(bytes, shrink)?,
        SourceFormat::Png => plain(decode_png_zune(bytes)?),
        SourceFormat::WebP => {
            let image = plain(decode_webp_libwebp(bytes)?);
            if shrink > 1 {
                image.shrink(shrink, shrink)?
            } else {
                image
            }
        }
        SourceFormat::Gif | SourceFormat::Tiff => {
            plain(decode_with_image_crate(bytes, format)?)
        }
    };
    Ok(image.with_icc_profile(extract_icc_profile(bytes, format)))
}

/// Wrap an RGB(A)/grey buffer, picking the interpretation from its bands.
fn plain(pixels: DynamicImage) -> Image {
    let interpretation = if pixels.color().has_color() {
        Interpretation::Srgb
    } else {
        Interpretation::Grey
    };
    Image::new(pixels, interpretation)
}

/// Decode JPEG using mozjpeg (backed by libjpeg-turbo), scaled by 1/`shrink`
/// in the DCT domain. libjpeg rounds scaled dimensions up.
pub fn decode_jpeg_mozjpeg(data: &[u8], shrink: u32) -> Result<Image> {
    run_with_panic_policy("decode:mozjpeg", || {
        if !data.windows(2).any(|pair| pair == [0xFF, 0xD9]) {
            return Err(ThumbnailError::decode_failed(
                "mozjpeg: missing JPEG EOI marker",
            ));
        }

        let mut decompress = Decompress::new_mem(data).map_err(|e| {
            ThumbnailError::decode_failed(format!("mozjpeg decompress init failed: {e:?}"))
        })?;
        check_dimensions(decompress.width() as u32, decompress.height() as u32)?;

        let shrink = shrink.clamp(1, MAX_JPEG_SHRINK);
        if !shrink.is_power_of_two() {
            return Err(ThumbnailError::processing_failed(
                "decode:mozjpeg",
                format!("unsupported DCT shrink {shrink}"),
            ));
        }
        decompress.scale((MAX_JPEG_SHRINK / shrink) as u8);

        match decompress.color_space() {
            JpegColorSpace::JCS_CMYK | JpegColorSpace::JCS_YCCK => {
                let mut started = decompress
                    .to_colorspace(JpegColorSpace::JCS_CMYK)
                    .map_err(|e| {
                        ThumbnailError::decode_failed(format!("mozjpeg cmyk output failed: {e:?}"))
                    })?;
                let (width, height) = (started.width() as u32, started.height() as u32);
                let pixels: Vec<[u8; 4]> = started.read_scanlines().map_err(|e| {
                    ThumbnailError::decode_failed(format!(
                        "mozjpeg: failed to read scanlines: {e:?}"
                    ))
                })?;
                let buf = RgbaImage::from_raw(width, height, pixels.into_iter().flatten().collect())
                    .ok_or_else(|| {
                        ThumbnailError::decode_failed("mozjpeg: failed to build CMYK image")
                    })?;
                Ok(Image::new(
                    DynamicImage::ImageRgba8(buf),
                    Interpretation::Cmyk,
                ))
            }
            JpegColorSpace::JCS_GRAYSCALE => {
                let mut started = decompress.grayscale().map_err(|e| {
                    ThumbnailError::decode_failed(format!("mozjpeg grayscale output failed: {e:?}"))
                })?;
                let (width, height) = (started.width() as u32, started.height() as u32);
                let pixels: Vec<u8> = started.read_scanlines().map_err(|e| {
                    ThumbnailError::decode_failed(format!(
                        "mozjpeg: failed to read scanlines: {e:?}"
                    ))
                })?;
                let buf = GrayImage::from_raw(width, height, pixels).ok_or_else(|| {
                    ThumbnailError::decode_failed("mozjpeg: failed to build grey image")
                })?;
                Ok(Image::new(DynamicImage::ImageLuma8(buf), Interpretation::Grey))
            }
            _ => {
                let mut started = decompress.rgb().map_err(|e| {
                    ThumbnailError::decode_failed(format!("mozjpeg rgb conversion failed: {e:?}"))
                })?;
                let (width, height) = (started.width() as u32, started.height() as u32);
                let pixels: Vec<[u8; 3]> = started.read_scanlines().map_err(|e| {
                    ThumbnailError::decode_failed(format!(
                        "mozjpeg: failed to read scanlines: {e:?}"
                    ))
                })?;
                let buf = RgbImage::from_raw(width, height, pixels.into_iter().flatten().collect())
                    .ok_or_else(|| {
                        ThumbnailError::decode_failed(
                            "mozjpeg: failed to create image from raw data",
                        )
                    })?;
                Ok(Image::new(DynamicImage::ImageRgb8(buf), Interpretation::Srgb))
            }
        }
    })
}

/// Decode GIF/TIFF (and anything else the image crate knows) under the panic policy.
pub fn decode_with_image_crate(data: &[u8], format: SourceFormat) -> Result<DynamicImage> {
    run_with_panic_policy("decode:image", || {
        image::load_from_memory_with_format(data, format.image_format())
            .map_err(|e| ThumbnailError::decode_failed(format!("decode failed: {e}")))
    })
}

/// Decode PNG using zune-png. 16-bit input is reduced to 8 bits.
pub fn decode_png_zune(data: &[u8]) -> Result<DynamicImage> {
    run_with_panic_policy("decode:png", || {
        let options = DecoderOptions::default().png_set_strip_to_8bit(true);
        let mut decoder = PngDecoder::new_with_options(ZCursor::new(data), options);
        let pixels = decoder
            .decode()
            .map_err(|e| ThumbnailError::decode_failed(format!("png: decode failed: {e}")))?;

        let info = decoder
            .info()
            .ok_or_else(|| ThumbnailError::decode_failed("png: missing header info"))?;

        let width = info.width as u32;
        let height = info.height as u32;
        check_dimensions(width, height)?;

        let buf = match pixels {
            zune_core::result::DecodingResult::U8(v) => v,
            _ => {
                return Err(ThumbnailError::decode_failed(
                    "png: unexpected non-U8 pixel buffer",
                ))
            }
        };

        let colorspace = decoder
            .colorspace()
            .ok_or_else(|| ThumbnailError::decode_failed("png: missing colorspace"))?;

        let img = match colorspace {
            ColorSpace::RGB => RgbImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| ThumbnailError::decode_failed("png: failed to build RGB image"))?,
            ColorSpace::RGBA => RgbaImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageRgba8)
                .ok_or_else(|| ThumbnailError::decode_failed("png: failed to build RGBA image"))?,
            ColorSpace::Luma => GrayImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| ThumbnailError::decode_failed("png: failed to build Luma image"))?,
            ColorSpace::LumaA => GrayAlphaImage::from_raw(width, height, buf)
                .map(DynamicImage::ImageLumaA8)
                .ok_or_else(|| {
                    ThumbnailError::decode_failed("png: failed to build LumaA image")
                })?,
            other => {
                return Err(ThumbnailError::decode_failed(format!(
                    "png: unsupported colorspace {other:?}"
                )))
            }
        };

        Ok(img)
    })
}

/// Decode WebP using libwebp. Animated WebP falls back to the image crate
/// and keeps only the first frame.
pub fn decode_webp_libwebp(data: &[u8]) -> Result<DynamicImage> {
    run_with_panic_policy("decode:webp", || {
        // Parse header first to avoid allocating huge buffers on malformed files
        let features = BitstreamFeatures::new(data).ok_or_else(|| {
            ThumbnailError::decode_failed("webp: failed to read bitstream features")
        })?;

        if features.has_animation() {
            return image::load_from_memory_with_format(data, image::ImageFormat::WebP).map_err(
                |e| ThumbnailError::decode_failed(format!("webp (animated) decode failed: {e}")),
            );
        }

        check_dimensions(features.width(), features.height())?;

        let decoded = WebPDecoder::new(data)
            .decode()
            .ok_or_else(|| ThumbnailError::decode_failed("webp: decode failed"))?;
        check_dimensions(decoded.width(), decoded.height())?;

        Ok(decoded.to_image())
    })
}

/// Reject sources past the hard dimension limit before allocating pixels.
pub fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(ThumbnailError::too_big(format!(
            "{width}x{height} exceeds {MAX_DIMENSION}px"
        )));
    }
    Ok(())
}
