// src/engine/raster.rs
//
// Decoded image handle and the pixel primitives the pipeline is built from.
//
// `Image` is move-only: every operation consumes the handle and returns a
// new one, so each request owns exactly one live pixel buffer at a time.

use super::orientation::Orientation;
use crate::error::{Result, ThumbnailError};
use fast_image_resize::{self as fir, MulDiv, PixelType, ResizeAlg, ResizeOptions};
use image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageBuffer, Luma, LumaA, Rgb, RgbImage, Rgba,
    RgbaImage,
};
use std::cell::RefCell;

thread_local! {
    // Resizer keeps scratch buffers between calls on the same worker thread.
    static RESIZER: RefCell<Option<fir::Resizer>> = const { RefCell::new(None) };
}

/// Release per-thread codec caches. Workers call this once on exit.
pub fn thread_shutdown() {
    RESIZER.with(|cell| cell.borrow_mut().take());
}

/// How the bands of a decoded buffer are to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpretation {
    Srgb,
    Grey,
    /// Four 8-bit bands, Adobe-inverted C, M, Y, K.
    Cmyk,
}

/// Sample depth of a decoded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandFormat {
    U8,
    U16,
    F32,
}

/// A decoded image owned by exactly one pipeline run.
#[derive(Debug)]
pub struct Image {
    pixels: DynamicImage,
    interpretation: Interpretation,
    orientation: Orientation,
    icc: Option<Vec<u8>>,
    premultiplied: bool,
}

impl Image {
    pub fn new(pixels: DynamicImage, interpretation: Interpretation) -> Self {
        Self {
            pixels,
            interpretation,
            orientation: Orientation::Undefined,
            icc: None,
            premultiplied: false,
        }
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_icc_profile(mut self, icc: Option<Vec<u8>>) -> Self {
        self.icc = icc;
        self
    }

    fn replace(self, pixels: DynamicImage) -> Self {
        Self { pixels, ..self }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixel_count(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn interpretation(&self) -> Interpretation {
        self.interpretation
    }

    pub fn icc_profile(&self) -> Option<&[u8]> {
        self.icc.as_deref()
    }

    pub fn take_icc_profile(&mut self) -> Option<Vec<u8>> {
        self.icc.take()
    }

    pub fn has_alpha(&self) -> bool {
        self.interpretation != Interpretation::Cmyk && self.pixels.color().has_alpha()
    }

    pub fn is_premultiplied(&self) -> bool {
        self.premultiplied
    }

    pub fn band_format(&self) -> BandFormat {
        match &self.pixels {
            DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_)
            | DynamicImage::ImageRgb16(_)
            | DynamicImage::ImageRgba16(_) => BandFormat::U16,
            DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => BandFormat::F32,
            _ => BandFormat::U8,
        }
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.pixels
    }

    pub fn into_dynamic(self) -> DynamicImage {
        self.pixels
    }

    /// Replace the pixel buffer after a colourspace conversion.
    pub(crate) fn into_interpretation(self, pixels: DynamicImage, interpretation: Interpretation) -> Self {
        Self {
            pixels,
            interpretation,
            ..self
        }
    }

    /// Reduce to 8 bits per sample.
    pub fn cast_u8(self) -> Self {
        if self.band_format() == BandFormat::U8 {
            return self;
        }
        let pixels = match &self.pixels {
            DynamicImage::ImageLuma16(_) => DynamicImage::ImageLuma8(self.pixels.to_luma8()),
            DynamicImage::ImageLumaA16(_) => {
                DynamicImage::ImageLumaA8(self.pixels.to_luma_alpha8())
            }
            other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        };
        self.replace(pixels)
    }

    pub fn premultiply(self) -> Result<Self> {
        if self.premultiplied || !self.has_alpha() {
            return Ok(self);
        }
        let mut buffer = FirBuffer::from_dynamic(&self.pixels)?;
        MulDiv::default()
            .multiply_alpha_inplace(&mut buffer.image)
            .map_err(|e| ThumbnailError::processing_failed("premultiply", e.to_string()))?;
        let pixels = buffer.into_dynamic()?;
        Ok(Self {
            premultiplied: true,
            ..self.replace(pixels)
        })
    }

    pub fn unpremultiply(self) -> Result<Self> {
        if !self.premultiplied {
            return Ok(self);
        }
        let mut buffer = FirBuffer::from_dynamic(&self.pixels)?;
        MulDiv::default()
            .divide_alpha_inplace(&mut buffer.image)
            .map_err(|e| ThumbnailError::processing_failed("unpremultiply", e.to_string()))?;
        let pixels = buffer.into_dynamic()?;
        Ok(Self {
            premultiplied: false,
            ..self.replace(pixels)
        })
    }

    /// Box-filter shrink by integer factors. Partial blocks round up, as
    /// the JPEG DCT shrink does.
    pub fn shrink(self, xshrink: u32, yshrink: u32) -> Result<Self> {
        let width = self.width().div_ceil(xshrink.max(1));
        let height = self.height().div_ceil(yshrink.max(1));
        self.resample(width, height, ResizeAlg::Convolution(fir::FilterType::Box), "shrink")
    }

    /// High-quality resample to exactly `width`x`height`.
    pub fn resize(self, width: u32, height: u32) -> Result<Self> {
        self.resample(
            width,
            height,
            ResizeAlg::Convolution(fir::FilterType::Lanczos3),
            "resize",
        )
    }

    fn resample(self, width: u32, height: u32, alg: ResizeAlg, stage: &'static str) -> Result<Self> {
        if width == self.width() && height == self.height() {
            return Ok(self);
        }
        let src = FirBuffer::from_dynamic(&self.pixels)?;
        let mut dst = FirBuffer::new(width, height, src.image.pixel_type(), src.layout);
        // Premultiplied buffers must not be multiplied again inside the resizer.
        let options = ResizeOptions::new()
            .resize_alg(alg)
            .use_alpha(!self.premultiplied);

        RESIZER.with(|cell| {
            let mut cached = cell.borrow_mut();
            let resizer = cached.get_or_insert_with(fir::Resizer::new);
            resizer
                .resize(&src.image, &mut dst.image, &options)
                .map_err(|e| {
                    ThumbnailError::processing_failed(
                        stage,
                        format!(
                            "{}x{} -> {width}x{height}: {e:?}",
                            self.width(),
                            self.height()
                        ),
                    )
                })
        })?;

        let pixels = dst.into_dynamic()?;
        Ok(self.replace(pixels))
    }

    pub fn extract_area(self, x: u32, y: u32, width: u32, height: u32) -> Result<Self> {
        let (w, h) = (self.width(), self.height());
        if width == 0 || height == 0 || x as u64 + width as u64 > w as u64 || y as u64 + height as u64 > h as u64 {
            return Err(ThumbnailError::processing_failed(
                "extract_area",
                format!("({x}+{width}, {y}+{height}) outside {w}x{h}"),
            ));
        }
        let pixels = self.pixels.crop_imm(x, y, width, height);
        Ok(self.replace(pixels))
    }

    pub fn flip_horizontal(self) -> Self {
        let pixels = self.pixels.fliph();
        self.replace(pixels)
    }

    pub fn flip_vertical(self) -> Self {
        let pixels = self.pixels.flipv();
        self.replace(pixels)
    }

    pub fn rotate90(self) -> Self {
        let pixels = self.pixels.rotate90();
        self.replace(pixels)
    }

    pub fn rotate180(self) -> Self {
        let pixels = self.pixels.rotate180();
        self.replace(pixels)
    }

    pub fn rotate270(self) -> Self {
        let pixels = self.pixels.rotate270();
        self.replace(pixels)
    }

    pub fn gaussian_blur(self, sigma: f64) -> Self {
        let pixels = self.pixels.blur(sigma as f32);
        self.replace(pixels)
    }

    /// Light unsharp mask for downscaled images.
    pub fn mild_sharpen(self) -> Self {
        let pixels = self.pixels.unsharpen(0.5, 2);
        self.replace(pixels)
    }

    /// Smallest alpha value as a fraction of fully opaque, `None` without alpha.
    pub fn min_alpha(&self) -> Option<f64> {
        if !self.has_alpha() {
            return None;
        }
        let min = match &self.pixels {
            DynamicImage::ImageLumaA8(buf) => buf.pixels().map(|p| p.0[1]).min().map(|a| a as f64 / 255.0),
            DynamicImage::ImageRgba8(buf) => buf.pixels().map(|p| p.0[3]).min().map(|a| a as f64 / 255.0),
            DynamicImage::ImageLumaA16(buf) => {
                buf.pixels().map(|p| p.0[1]).min().map(|a| a as f64 / 65535.0)
            }
            DynamicImage::ImageRgba16(buf) => {
                buf.pixels().map(|p| p.0[3]).min().map(|a| a as f64 / 65535.0)
            }
            other => other
                .to_rgba8()
                .pixels()
                .map(|p| p.0[3])
                .min()
                .map(|a| a as f64 / 255.0),
        };
        Some(min.unwrap_or(1.0))
    }

    /// Composite over black and drop the alpha channel.
    pub fn flatten(self) -> Result<Self> {
        if !self.has_alpha() {
            return Ok(self);
        }
        let premultiplied = self.premultiply()?;
        let pixels = match &premultiplied.pixels {
            DynamicImage::ImageLumaA8(_) => DynamicImage::ImageLuma8(premultiplied.pixels.to_luma8()),
            DynamicImage::ImageLumaA16(_) => {
                DynamicImage::ImageLuma16(premultiplied.pixels.to_luma16())
            }
            DynamicImage::ImageRgba16(_) => DynamicImage::ImageRgb16(premultiplied.pixels.to_rgb16()),
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        };
        Ok(Self {
            premultiplied: false,
            ..premultiplied.replace(pixels)
        })
    }
}

/// Pixel layout of a fast_image_resize buffer, remembered so the result can
/// be turned back into the matching `DynamicImage` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    L8,
    La8,
    Rgb8,
    Rgba8,
    L16,
    La16,
    Rgb16,
    Rgba16,
}

impl Layout {
    fn pixel_type(self) -> PixelType {
        match self {
            Self::L8 => PixelType::U8,
            Self::La8 => PixelType::U8x2,
            Self::Rgb8 => PixelType::U8x3,
            Self::Rgba8 => PixelType::U8x4,
            Self::L16 => PixelType::U16,
            Self::La16 => PixelType::U16x2,
            Self::Rgb16 => PixelType::U16x3,
            Self::Rgba16 => PixelType::U16x4,
        }
    }
}

struct FirBuffer {
    image: fir::images::Image<'static>,
    layout: Layout,
}

impl FirBuffer {
    fn new(width: u32, height: u32, pixel_type: PixelType, layout: Layout) -> Self {
        Self {
            image: fir::images::Image::new(width, height, pixel_type),
            layout,
        }
    }

    /// Copy into a freshly allocated (and therefore aligned) fir buffer.
    fn from_dynamic(img: &DynamicImage) -> Result<Self> {
        let converted;
        let (source, layout) = match img {
            DynamicImage::ImageLuma8(_) => (img, Layout::L8),
            DynamicImage::ImageLumaA8(_) => (img, Layout::La8),
            DynamicImage::ImageRgb8(_) => (img, Layout::Rgb8),
            DynamicImage::ImageRgba8(_) => (img, Layout::Rgba8),
            DynamicImage::ImageLuma16(_) => (img, Layout::L16),
            DynamicImage::ImageLumaA16(_) => (img, Layout::La16),
            DynamicImage::ImageRgb16(_) => (img, Layout::Rgb16),
            DynamicImage::ImageRgba16(_) => (img, Layout::Rgba16),
            other if other.color().has_alpha() => {
                converted = DynamicImage::ImageRgba16(other.to_rgba16());
                (&converted, Layout::Rgba16)
            }
            other => {
                converted = DynamicImage::ImageRgb16(other.to_rgb16());
                (&converted, Layout::Rgb16)
            }
        };

        let mut buffer = Self::new(source.width(), source.height(), layout.pixel_type(), layout);
        let bytes = source.as_bytes();
        let dst = buffer.image.buffer_mut();
        if dst.len() != bytes.len() {
            return Err(ThumbnailError::processing_failed(
                "pixel buffer",
                format!("expected {} bytes, got {}", dst.len(), bytes.len()),
            ));
        }
        dst.copy_from_slice(bytes);
        Ok(buffer)
    }

    fn into_dynamic(self) -> Result<DynamicImage> {
        let (width, height) = (self.image.width(), self.image.height());
        let bytes = self.image.into_vec();
        let built = match self.layout {
            Layout::L8 => GrayImage::from_raw(width, height, bytes).map(DynamicImage::ImageLuma8),
            Layout::La8 => {
                GrayAlphaImage::from_raw(width, height, bytes).map(DynamicImage::ImageLumaA8)
            }
            Layout::Rgb8 => RgbImage::from_raw(width, height, bytes).map(DynamicImage::ImageRgb8),
            Layout::Rgba8 => {
                RgbaImage::from_raw(width, height, bytes).map(DynamicImage::ImageRgba8)
            }
            Layout::L16 => ImageBuffer::<Luma<u16>, _>::from_raw(width, height, to_u16(&bytes))
                .map(DynamicImage::ImageLuma16),
            Layout::La16 => {
                ImageBuffer::<LumaA<u16>, _>::from_raw(width, height, to_u16(&bytes))
                    .map(DynamicImage::ImageLumaA16)
            }
            Layout::Rgb16 => ImageBuffer::<Rgb<u16>, _>::from_raw(width, height, to_u16(&bytes))
                .map(DynamicImage::ImageRgb16),
            Layout::Rgba16 => {
                ImageBuffer::<Rgba<u16>, _>::from_raw(width, height, to_u16(&bytes))
                    .map(DynamicImage::ImageRgba16)
            }
        };
        built.ok_or_else(|| {
            ThumbnailError::processing_failed(
                "pixel buffer",
                format!("buffer does not match {width}x{height} {:?}", self.layout),
            )
        })
    }
}

fn to_u16(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn rgba(w: u32, h: u32, alpha: u8) -> Image {
        Image::new(
            DynamicImage::ImageRgba8(RgbaImage::from_fn(w, h, |x, y| {
                Rgba([(x * 20) as u8, (y * 20) as u8, 200, alpha])
            })),
            Interpretation::Srgb,
        )
    }

    #[test]
    fn test_resize_exact_dimensions() {
        let img = Image::new(
            DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([10, 20, 30]))),
            Interpretation::Srgb,
        );
        let out = img.resize(13, 7).unwrap();
        assert_eq!((out.width(), out.height()), (13, 7));
        let px = out.as_dynamic().get_pixel(6, 3).0;
        for (got, want) in px[..3].iter().zip([10u8, 20, 30]) {
            assert!(got.abs_diff(want) <= 1, "{px:?}");
        }
    }

    #[test]
    fn test_shrink_rounds_up() {
        let img = rgba(41, 20, 255);
        let out = img.shrink(4, 2).unwrap();
        assert_eq!((out.width(), out.height()), (11, 10));
    }

    #[test]
    fn test_resize_sixteen_bit_keeps_depth() {
        let img = Image::new(
            DynamicImage::ImageRgb16(ImageBuffer::from_pixel(8, 8, Rgb([1000u16, 2000, 3000]))),
            Interpretation::Srgb,
        );
        let out = img.resize(4, 4).unwrap();
        assert_eq!(out.band_format(), BandFormat::U16);
        let out = out.cast_u8();
        assert_eq!(out.band_format(), BandFormat::U8);
        assert_eq!((out.width(), out.height()), (4, 4));
    }

    #[test]
    fn test_premultiply_round_trip_opaque() {
        let img = rgba(4, 4, 255);
        let before = img.as_dynamic().clone();
        let img = img.premultiply().unwrap();
        assert!(img.is_premultiplied());
        let img = img.unpremultiply().unwrap();
        assert!(!img.is_premultiplied());
        assert_eq!(img.into_dynamic(), before);
    }

    #[test]
    fn test_premultiply_scales_colour_by_alpha() {
        let img = Image::new(
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([200, 100, 50, 0]))),
            Interpretation::Srgb,
        );
        let img = img.premultiply().unwrap();
        assert_eq!(img.as_dynamic().get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_min_alpha_and_flatten() {
        let img = rgba(3, 3, 240);
        let min = img.min_alpha().unwrap();
        assert!((min - 240.0 / 255.0).abs() < 1e-9);

        let flat = img.flatten().unwrap();
        assert!(!flat.has_alpha());
        assert!(!flat.is_premultiplied());
        // 200 * 240 / 255 ~= 188
        let b = flat.as_dynamic().get_pixel(1, 1).0[2];
        assert!((187..=189).contains(&b), "blue {b}");
    }

    #[test]
    fn test_min_alpha_none_without_alpha_channel() {
        let img = Image::new(
            DynamicImage::ImageLuma8(GrayImage::new(2, 2)),
            Interpretation::Grey,
        );
        assert_eq!(img.min_alpha(), None);
    }

    #[test]
    fn test_cmyk_has_no_alpha() {
        let img = Image::new(
            DynamicImage::ImageRgba8(RgbaImage::new(2, 2)),
            Interpretation::Cmyk,
        );
        assert!(!img.has_alpha());
    }

    #[test]
    fn test_extract_area_bounds() {
        let img = rgba(10, 10, 255);
        let err = rgba(10, 10, 255).extract_area(5, 5, 6, 1).unwrap_err();
        assert!(matches!(err, ThumbnailError::ProcessingFailed { .. }));
        let out = img.extract_area(2, 3, 4, 5).unwrap();
        assert_eq!((out.width(), out.height()), (4, 5));
        assert_eq!(out.as_dynamic().get_pixel(0, 0).0[0], 40);
    }

    #[test]
    fn test_thread_shutdown_is_repeatable() {
        let _ = rgba(8, 8, 255).resize(4, 4).unwrap();
        thread_shutdown();
        thread_shutdown();
        let out = rgba(8, 8, 255).resize(2, 2).unwrap();
        assert_eq!(out.width(), 2);
    }
}
