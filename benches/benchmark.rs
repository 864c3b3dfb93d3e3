use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::hint::black_box;
use std::io::Cursor;
use thumbnail_proxy::{thumbnail, Options, OutputFormat, SaveOptions};

fn source(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x ^ y) % 256) as u8])
    }));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

pub fn thumbnail_benchmark(c: &mut Criterion) {
    let jpeg = source(1600, 1200, ImageFormat::Jpeg);
    let png = source(800, 600, ImageFormat::Png);

    let mut group = c.benchmark_group("thumbnail");
    group.sample_size(20);
    for (name, blob) in [("jpeg_1600x1200", &jpeg), ("png_800x600", &png)] {
        for (mode, crop) in [("fit", false), ("crop", true)] {
            let options = Options {
                width: 200,
                height: 200,
                crop,
                ..Default::default()
            };
            group.bench_with_input(BenchmarkId::new(name, mode), blob, |b, blob| {
                b.iter(|| thumbnail(black_box(blob), &options).unwrap())
            });
        }
    }

    let fast = Options {
        width: 200,
        fast_resize: true,
        ..Default::default()
    };
    group.bench_function("jpeg_1600x1200/fast_resize", |b| {
        b.iter(|| thumbnail(black_box(&jpeg), &fast).unwrap())
    });

    let webp = Options {
        width: 200,
        save: SaveOptions {
            format: Some(OutputFormat::WebP),
            ..Default::default()
        },
        ..Default::default()
    };
    group.bench_function("jpeg_1600x1200/webp", |b| {
        b.iter(|| thumbnail(black_box(&jpeg), &webp).unwrap())
    });
    group.finish();
}

criterion_group!(benches, thumbnail_benchmark);
criterion_main!(benches);
