// src/engine/photo.rs
//
// Photo detection: Sobel edge magnitudes, histogrammed. Photographs spread
// their edge energy over a long continuous range of magnitudes; flat
// graphics leave most bins empty.

use super::raster::Image;
use image::GrayImage;

/// Fraction of the peak bin a bin must exceed to extend a run.
pub const PHOTO_THRESHOLD: f64 = 0.01;

/// Runs at least this long mean "photo".
pub const PHOTO_MIN_RUN: u32 = 16;

/// Sobel gradient magnitude per pixel, scaled into 0..=255.
pub fn sobel(luma: &GrayImage) -> GrayImage {
    let (w, h) = luma.dimensions();
    let at = |x: i64, y: i64| -> i32 {
        let x = x.clamp(0, w as i64 - 1) as u32;
        let y = y.clamp(0, h as i64 - 1) as u32;
        luma.get_pixel(x, y).0[0] as i32
    };

    GrayImage::from_fn(w, h, |x, y| {
        let (x, y) = (x as i64, y as i64);
        let gx = at(x + 1, y - 1) + 2 * at(x + 1, y) + at(x + 1, y + 1)
            - at(x - 1, y - 1)
            - 2 * at(x - 1, y)
            - at(x - 1, y + 1);
        let gy = at(x - 1, y + 1) + 2 * at(x, y + 1) + at(x + 1, y + 1)
            - at(x - 1, y - 1)
            - 2 * at(x, y - 1)
            - at(x + 1, y - 1);
        // Kernel weights sum to 4 per side.
        let magnitude = (((gx * gx + gy * gy) as f64).sqrt() / 4.0).min(255.0);
        image::Luma([magnitude as u8])
    })
}

/// Longest run of consecutive histogram bins above `threshold` x peak.
pub fn histogram_run(histogram: &[u64; 256], threshold: f64) -> u32 {
    let peak = histogram.iter().copied().max().unwrap_or(0);
    if peak == 0 {
        return 0;
    }
    let floor = peak as f64 * threshold;

    let mut longest = 0;
    let mut run = 0;
    for &count in histogram {
        if count as f64 > floor {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    longest
}

/// Photo metric of an image: the histogram run length of its Sobel edges.
pub fn photo_metric(image: &Image, threshold: f64) -> u32 {
    let luma = image.as_dynamic().to_luma8();
    let edges = sobel(&luma);

    let mut histogram = [0u64; 256];
    for p in edges.pixels() {
        histogram[p.0[0] as usize] += 1;
    }
    histogram_run(&histogram, threshold)
}

/// True when the image looks photographic.
pub fn is_photo(image: &Image) -> bool {
    photo_metric(image, PHOTO_THRESHOLD) >= PHOTO_MIN_RUN
}
