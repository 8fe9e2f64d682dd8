//! Palette extraction using Lloyd's k-means over a strided sample of the image.
//!
//! The sample grid keeps roughly [`TARGET_SAMPLES`] pixels regardless of image size,
//! and transparent pixels never contribute. Initial centroids are drawn from the samples
//! with a seeded generator, so the same image and options always produce the same palette.

use crate::{nearest::NearestPoints, Palette, PixelBuffer, ALPHA_THRESHOLD, MAX_COLORS, MIN_COLORS};
use palette::Srgb;
use rand::{prelude::Distribution, SeedableRng};
use rand_distr::Uniform;
use rand_xoshiro::Xoroshiro128PlusPlus;

#[cfg(feature = "threads")]
use rayon::prelude::*;

/// The approximate number of pixels sampled from an image.
pub const TARGET_SAMPLES: u32 = 20_000;

/// The maximum number of assignment passes.
pub const MAX_ITERATIONS: u32 = 16;

/// How many times a draw that duplicates an already chosen color is retried.
const MAX_REDRAWS: u32 = 32;

/// Options for [`palette`] and [`palette_par`].
///
/// # Examples
/// ```
/// # use inkmix::kmeans::KmeansOptions;
/// let options = KmeansOptions::new().k(6).seed(42);
/// assert_eq!(options.get_k(), 6);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KmeansOptions {
    /// The requested number of colors, clamped to [`MIN_COLORS`]`..=`[`MAX_COLORS`].
    k: u8,
    /// The seed for the initial centroid draws.
    seed: u64,
    /// The approximate number of pixels to sample.
    target_samples: u32,
    /// The maximum number of assignment passes.
    max_iterations: u32,
}

impl KmeansOptions {
    /// Creates a new [`KmeansOptions`] with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            k: 8,
            seed: 0,
            target_samples: TARGET_SAMPLES,
            max_iterations: MAX_ITERATIONS,
        }
    }

    /// Sets the number of colors to detect.
    ///
    /// The value is clamped to [`MIN_COLORS`]`..=`[`MAX_COLORS`].
    #[must_use]
    pub const fn k(mut self, k: u8) -> Self {
        self.k = if k < MIN_COLORS {
            MIN_COLORS
        } else if k > MAX_COLORS {
            MAX_COLORS
        } else {
            k
        };
        self
    }

    /// Sets the seed for the initial centroid draws.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the approximate number of pixels to sample. Must be at least one.
    #[must_use]
    pub const fn target_samples(mut self, target_samples: u32) -> Self {
        self.target_samples = if target_samples == 0 { 1 } else { target_samples };
        self
    }

    /// Sets the maximum number of assignment passes.
    #[must_use]
    pub const fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Gets the number of colors to detect.
    #[must_use]
    pub const fn get_k(&self) -> u8 {
        self.k
    }

    /// Gets the seed.
    #[must_use]
    pub const fn get_seed(&self) -> u64 {
        self.seed
    }

    /// Gets the approximate number of pixels to sample.
    #[must_use]
    pub const fn get_target_samples(&self) -> u32 {
        self.target_samples
    }

    /// Gets the maximum number of assignment passes.
    #[must_use]
    pub const fn get_max_iterations(&self) -> u32 {
        self.max_iterations
    }
}

impl Default for KmeansOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// The step between sampled pixels along both axes: `max(1, floor(sqrt(w·h / target)))`.
#[must_use]
pub fn sample_stride(width: u32, height: u32, target_samples: u32) -> u32 {
    #[allow(clippy::cast_precision_loss)]
    let ratio = (f64::from(width) * f64::from(height)) / f64::from(target_samples.max(1));

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let stride = ratio.sqrt().floor() as u32;

    stride.max(1)
}

/// Collects the opaque pixels on a `stride`-spaced grid.
fn samples(buffer: &PixelBuffer, stride: u32) -> Vec<[f32; 3]> {
    let (width, height) = buffer.dimensions();
    let pixels = buffer.pixels();

    let mut samples = Vec::new();
    for y in (0..height).step_by(stride as usize) {
        let row = &pixels[y as usize * width as usize..][..width as usize];
        for pixel in row.iter().step_by(stride as usize) {
            if pixel.alpha >= ALPHA_THRESHOLD {
                let (r, g, b) = pixel.color.into_components();
                samples.push([r.into(), g.into(), b.into()]);
            }
        }
    }
    samples
}

/// Draws `k` initial centroids from the samples.
///
/// A draw whose color was already chosen is retried a bounded number of times,
/// so that images with fewer distinct colors than `k` still terminate.
fn initial_centroids(samples: &[[f32; 3]], k: u8, seed: u64) -> Vec<[f32; 3]> {
    let rng = &mut Xoroshiro128PlusPlus::seed_from_u64(seed);
    let distribution = Uniform::new(0, samples.len());

    let mut centroids = Vec::with_capacity(usize::from(k));
    for _ in 0..k {
        let mut sample = samples[distribution.sample(rng)];
        for _ in 0..MAX_REDRAWS {
            if !centroids.contains(&sample) {
                break;
            }
            sample = samples[distribution.sample(rng)];
        }
        centroids.push(sample);
    }
    centroids
}

/// Moves each centroid to the mean of its assigned samples.
///
/// Centroids without any samples keep their position.
fn update_centroids(samples: &[[f32; 3]], assignments: &[u8], centroids: &mut [[f32; 3]]) {
    let mut sums = vec![[0.0f64; 3]; centroids.len()];
    let mut counts = vec![0u32; centroids.len()];

    for (sample, &cluster) in samples.iter().zip(assignments) {
        let i = usize::from(cluster);
        for (sum, &c) in sums[i].iter_mut().zip(sample) {
            *sum += f64::from(c);
        }
        counts[i] += 1;
    }

    for ((centroid, sum), &count) in centroids.iter_mut().zip(&sums).zip(&counts) {
        if count > 0 {
            #[allow(clippy::cast_possible_truncation)]
            {
                *centroid = sum.map(|s| (s / f64::from(count)) as f32);
            }
        }
    }
}

/// Assigns each sample to its nearest centroid, returning whether any assignment changed.
fn assign(samples: &[[f32; 3]], centroids: &NearestPoints, assignments: &mut [u8]) -> bool {
    let mut changed = false;
    for (&sample, assignment) in samples.iter().zip(assignments) {
        let cluster = nearest_cluster(centroids, sample);
        changed |= *assignment != cluster;
        *assignment = cluster;
    }
    changed
}

#[cfg(feature = "threads")]
fn assign_par(samples: &[[f32; 3]], centroids: &NearestPoints, assignments: &mut [u8]) -> bool {
    samples
        .par_iter()
        .zip(assignments)
        .map(|(&sample, assignment)| {
            let cluster = nearest_cluster(centroids, sample);
            let changed = *assignment != cluster;
            *assignment = cluster;
            changed
        })
        .reduce(|| false, |a, b| a || b)
}

#[inline]
fn nearest_cluster(centroids: &NearestPoints, sample: [f32; 3]) -> u8 {
    #[allow(clippy::cast_possible_truncation)]
    {
        centroids.nearest(sample).map_or(0, |(i, _)| i as u8)
    }
}

/// The result of a k-means run before rounding.
struct Clustering {
    centroids: Vec<[f32; 3]>,
    iterations: u32,
}

fn cluster(
    samples: &[[f32; 3]],
    options: &KmeansOptions,
    assign: impl Fn(&[[f32; 3]], &NearestPoints, &mut [u8]) -> bool,
) -> Clustering {
    let mut centroids = initial_centroids(samples, options.k, options.seed);

    // no sample starts in a cluster, so the first pass always counts as a change
    let mut assignments = vec![u8::MAX; samples.len()];

    let mut iterations = 0;
    while iterations < options.max_iterations {
        iterations += 1;
        let table = NearestPoints::new(&centroids);
        if !assign(samples, &table, &mut assignments) {
            break;
        }
        update_centroids(samples, &assignments, &mut centroids);
    }

    Clustering { centroids, iterations }
}

/// Rounds centroids to 8-bit colors, dropping duplicates.
fn into_palette(centroids: &[[f32; 3]]) -> Palette {
    Palette::from_colors(centroids.iter().map(|c| {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let [r, g, b] = c.map(|x| x.round().clamp(0.0, 255.0) as u8);
        Srgb::new(r, g, b)
    }))
}

fn extract(
    buffer: &PixelBuffer,
    options: &KmeansOptions,
    assign: impl Fn(&[[f32; 3]], &NearestPoints, &mut [u8]) -> bool,
) -> Palette {
    let stride = sample_stride(buffer.width(), buffer.height(), options.target_samples);
    let samples = samples(buffer, stride);

    if samples.is_empty() {
        tracing::debug!("no opaque samples, returning an empty palette");
        return Palette::new();
    }

    let Clustering { centroids, iterations } = cluster(&samples, options, assign);
    let palette = into_palette(&centroids);

    tracing::debug!(
        samples = samples.len(),
        stride,
        k = options.k,
        iterations,
        colors = palette.len(),
        "extracted palette"
    );

    palette
}

/// Detects up to `k` dominant colors of an image.
///
/// Returns an empty palette if the image has no pixel at or above the transparency threshold.
/// The result has no duplicate colors and may hold fewer than `k` colors.
///
/// # Examples
/// ```
/// # use inkmix::{kmeans::{self, KmeansOptions}, PixelBuffer};
/// # use palette::Srgba;
/// let image = PixelBuffer::filled(4, 4, Srgba::new(10, 20, 30, 255));
/// let palette = kmeans::palette(&image, &KmeansOptions::new().k(3));
/// assert_eq!(palette.len(), 1);
/// ```
#[must_use]
pub fn palette(buffer: &PixelBuffer, options: &KmeansOptions) -> Palette {
    extract(buffer, options, assign)
}

/// Detects up to `k` dominant colors of an image in parallel.
///
/// Produces the same palette as [`palette`] for the same options.
#[cfg(feature = "threads")]
#[must_use]
pub fn palette_par(buffer: &PixelBuffer, options: &KmeansOptions) -> Palette {
    extract(buffer, options, assign_par)
}
