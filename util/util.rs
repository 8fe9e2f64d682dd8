#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};

use inkmix::{InkSet, PixelBuffer};
use palette::{Srgb, Srgba};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoroshiro128PlusPlus;

/// Benchmarks also load every image in this directory, if it exists.
pub const BENCH_IMAGE_DIR: &str = "img/bench";

pub fn load_images(images: &[PathBuf]) -> Vec<(String, PixelBuffer)> {
    images
        .iter()
        .map(|path| {
            image::open(path).map(|image| {
                let image = image.into_rgba8();
                (
                    path.file_name().unwrap().to_owned().into_string().unwrap(),
                    PixelBuffer::try_from(&image).unwrap(),
                )
            })
        })
        .collect::<Result<_, _>>()
        .expect("loaded each image")
}

pub fn load_image_dir(dir: impl AsRef<Path>) -> Vec<(String, PixelBuffer)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut paths = entries
        .collect::<Result<Vec<_>, _>>()
        .expect("read each file")
        .iter()
        .map(std::fs::DirEntry::path)
        .collect::<Vec<_>>();

    paths.sort();

    load_images(&paths)
}

/// Smooth color regions with some noise, roughly like a scanned illustration.
pub fn blobs(width: u32, height: u32, seed: u64) -> PixelBuffer {
    let mut rng = Xoroshiro128PlusPlus::seed_from_u64(seed);
    let centers = (0..6)
        .map(|_| {
            let x = rng.gen_range(0..width);
            let y = rng.gen_range(0..height);
            let color = Srgb::new(rng.gen(), rng.gen(), rng.gen());
            (x, y, color)
        })
        .collect::<Vec<(u32, u32, Srgb<u8>)>>();

    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        for x in 0..width {
            let &(_, _, color) = centers
                .iter()
                .min_by_key(|&&(cx, cy, _)| x.abs_diff(cx).pow(2) + y.abs_diff(cy).pow(2))
                .unwrap();

            let (r, g, b) = color.into_components();
            let mut jitter = |c: u8| c.saturating_add_signed(rng.gen_range(-8..=8));
            pixels.push(Srgba::new(jitter(r), jitter(g), jitter(b), 255));
        }
    }

    PixelBuffer::new(width, height, pixels).unwrap()
}

/// A full-range horizontal hue sweep fading to black from top to bottom.
pub fn sweep(width: u32, height: u32) -> PixelBuffer {
    let mut pixels = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        let fade = 1.0 - y as f32 / height as f32;
        for x in 0..width {
            let t = x as f32 / width as f32 * 3.0;
            let (r, g, b) = match t as u32 {
                0 => (1.0 - t, t, 0.0),
                1 => (0.0, 2.0 - t, t - 1.0),
                _ => (t - 2.0, 0.0, 3.0 - t),
            };
            let channel = |v: f32| (v * fade * 255.0).round() as u8;
            pixels.push(Srgba::new(channel(r), channel(g), channel(b), 255));
        }
    }

    PixelBuffer::new(width, height, pixels).unwrap()
}

fn load_bench_images() -> Vec<(String, PixelBuffer)> {
    let mut images = vec![
        ("blobs_1024".to_owned(), blobs(1024, 768, 0)),
        ("sweep_1024".to_owned(), sweep(1024, 768)),
    ];
    images.extend(load_image_dir(BENCH_IMAGE_DIR));
    images
}

static BENCH_IMAGES: OnceLock<Vec<(String, PixelBuffer)>> = OnceLock::new();

pub fn bench_images() -> &'static [(String, PixelBuffer)] {
    BENCH_IMAGES.get_or_init(load_bench_images)
}

/// A typical cup-printing ink kit.
pub fn ink_kit() -> InkSet {
    InkSet::from_colors([
        Srgb::new(0x1B, 0x1B, 0x1B),
        Srgb::new(0xE5, 0x39, 0x35),
        Srgb::new(0xFD, 0xD8, 0x35),
        Srgb::new(0x1E, 0x88, 0xE5),
        Srgb::new(0x43, 0xA0, 0x47),
        Srgb::new(0xFF, 0xFF, 0xFF),
    ])
}
