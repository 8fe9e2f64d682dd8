//! The per-pixel mapping pass from a source image to the active inks.
//!
//! Pixels are visited in raster order. Each opaque pixel is first matched to its nearest palette
//! color by RGB distance; if that color has an active rule, the pixel takes the color of the rule's
//! tile at its position. Otherwise it takes the nearest active ink by weighted Lab distance.
//! Floyd–Steinberg error diffusion and an unsharp mask can be layered on top.

use crate::{
    color::{self, Lab65, Weights},
    nearest::NearestPoints,
    tile, EngineError, InkSet, PixelBuffer, Rule, Tile, ALPHA_THRESHOLD,
};
use palette::{Srgb, Srgba};
use std::{ops::ControlFlow, sync::Arc};

#[cfg(feature = "threads")]
use rayon::prelude::*;

/// The number of rows between progress reports.
pub const PROGRESS_ROWS: u32 = 64;

/// The default [`MapOptions::snap_epsilon`].
pub const DEFAULT_SNAP_EPSILON: f32 = 1.2;

/// Unsharp mask parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sharpen {
    /// The radius of the box blur. `1` gives a 3x3 window.
    pub radius: u32,
    /// How much of the difference to the blur is added back.
    pub amount: f32,
}

impl Sharpen {
    /// Creates a new [`Sharpen`].
    #[must_use]
    pub const fn new(radius: u32, amount: f32) -> Self {
        Self { radius, amount }
    }
}

impl Default for Sharpen {
    fn default() -> Self {
        Self::new(1, 0.5)
    }
}

/// How far a mapping pass has come.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// The number of finished rows.
    pub rows_done: u32,
    /// The number of rows in the image.
    pub rows_total: u32,
}

/// Options for a mapping pass.
///
/// # Examples
/// ```
/// # use inkmix::{MapOptions, Sharpen};
/// let options = MapOptions::new().dither(true).sharpen(Some(Sharpen::default()));
/// assert!(options.get_dither());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapOptions {
    /// The weights of the nearest-ink distance.
    weights: Weights,
    /// Whether to diffuse quantization error.
    dither: bool,
    /// The unsharp mask applied after mapping, if any.
    sharpen: Option<Sharpen>,
    /// Distances below this end the nearest-ink search early.
    snap_epsilon: f32,
}

impl MapOptions {
    /// Creates a new [`MapOptions`] with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            weights: Weights::new(1.0, 1.0),
            dither: false,
            sharpen: None,
            snap_epsilon: DEFAULT_SNAP_EPSILON,
        }
    }

    /// Sets the weights of the nearest-ink distance.
    #[must_use]
    pub const fn weights(mut self, weights: Weights) -> Self {
        self.weights = weights;
        self
    }

    /// Sets whether to apply Floyd–Steinberg dithering.
    #[must_use]
    pub const fn dither(mut self, dither: bool) -> Self {
        self.dither = dither;
        self
    }

    /// Sets the unsharp mask applied after mapping.
    #[must_use]
    pub const fn sharpen(mut self, sharpen: Option<Sharpen>) -> Self {
        self.sharpen = sharpen;
        self
    }

    /// Sets the distance below which the nearest-ink search takes the current ink immediately.
    ///
    /// Inks are searched in order, so with a nonzero epsilon an earlier ink that is
    /// close enough wins over a later, closer one. `0.0` always finds the nearest ink.
    #[must_use]
    pub const fn snap_epsilon(mut self, snap_epsilon: f32) -> Self {
        self.snap_epsilon = snap_epsilon;
        self
    }

    /// Gets the weights of the nearest-ink distance.
    #[must_use]
    pub const fn get_weights(&self) -> Weights {
        self.weights
    }

    /// Gets whether dithering is enabled.
    #[must_use]
    pub const fn get_dither(&self) -> bool {
        self.dither
    }

    /// Gets the unsharp mask, if any.
    #[must_use]
    pub const fn get_sharpen(&self) -> Option<Sharpen> {
        self.sharpen
    }

    /// Gets the early-exit distance of the nearest-ink search.
    #[must_use]
    pub const fn get_snap_epsilon(&self) -> f32 {
        self.snap_epsilon
    }
}

impl Default for MapOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Multiplies `other` by a scalar, `alpha`, and adds the result to `arr`.
#[inline]
fn arr_mul_add_assign(arr: &mut [f32; 3], alpha: f32, other: [f32; 3]) {
    for i in 0..3 {
        arr[i] += alpha * other[i];
    }
}

/// Multiplies `other` by a scalar, `alpha`, and assigns the result to `arr`.
#[inline]
fn arr_mul_assign(arr: &mut [f32; 3], alpha: f32, other: [f32; 3]) {
    for i in 0..3 {
        arr[i] = alpha * other[i];
    }
}

/// Holds the diffusion error for the current and the next row.
///
/// Both rows are padded by one slot on each side,
/// so error pushed past the left or right edge lands in a slot that is never read.
struct ErrorBuf<'a> {
    /// The propagated error for the current row of pixels.
    this_err: &'a mut [[f32; 3]],
    /// The propagated error for the next row of pixels.
    next_err: &'a mut [[f32; 3]],
}

impl<'a> ErrorBuf<'a> {
    /// Create the backing buffer for a new `ErrorBuf`.
    fn new_buf(width: usize) -> Vec<[f32; 3]> {
        vec![[0.0; 3]; 2 * (width + 2)]
    }

    /// Create a new `ErrorBuf` using the given `buf`.
    fn new(width: usize, buf: &'a mut [[f32; 3]]) -> Self {
        let (this_err, next_err) = buf.split_at_mut(width + 2);
        Self { this_err, next_err }
    }

    /// Spread the error of pixel `i`: 7/16 right, 3/16 below left, 5/16 below, 1/16 below right.
    ///
    /// This must be called for every pixel of a row, left to right.
    #[inline]
    fn propagate(&mut self, i: usize, err: [f32; 3]) {
        arr_mul_add_assign(&mut self.this_err[i + 2], 7.0 / 16.0, err);
        arr_mul_add_assign(&mut self.next_err[i], 3.0 / 16.0, err);
        arr_mul_add_assign(&mut self.next_err[i + 1], 5.0 / 16.0, err);
        arr_mul_assign(&mut self.next_err[i + 2], 1.0 / 16.0, err);
    }

    /// Apply the accumulated error to pixel `i`.
    #[inline]
    fn apply(&self, i: usize, point: &mut [f32; 3]) {
        let err = self.this_err[i + 1];
        for c in 0..3 {
            point[c] += err[c];
        }
    }

    /// Reset and swap the error buffers for the next row of pixels.
    #[inline]
    fn next_row(&mut self) {
        std::mem::swap(&mut self.this_err, &mut self.next_err);
        // every other slot is assigned before it is added to
        self.next_err[0] = [0.0; 3];
        self.next_err[1] = [0.0; 3];
    }
}

/// A prepared mapping pass: palette buckets, rule tiles and ink Lab values.
///
/// Building a [`Mapper`] once and reusing it avoids re-rendering tiles for every image.
#[derive(Debug, Clone)]
pub struct Mapper {
    /// The palette colors, for bucket lookup.
    buckets: NearestPoints,
    /// The tile of each palette color's active rule, parallel to the palette.
    tiles: Vec<Option<Arc<Tile>>>,
    /// Whether any tile is present, and so whether bucket lookup is needed at all.
    has_tiles: bool,
    /// The active inks with their Lab values, in search order.
    inks: Vec<(Srgb<u8>, Lab65)>,
    /// The options for the pass.
    options: MapOptions,
}

impl Mapper {
    /// Prepares a mapping pass, rendering a tile for every active rule.
    ///
    /// `rules` is parallel to `palette`. Returns [`EngineError::EmptyInkSet`] if no ink is active.
    pub fn new(
        palette: &[Srgb<u8>],
        inks: &InkSet,
        rules: &[Option<Rule>],
        options: &MapOptions,
    ) -> Result<Self, EngineError> {
        let tiles = rules
            .iter()
            .map(|rule| {
                rule.as_ref()
                    .filter(|rule| rule.is_active())
                    .and_then(|rule| tile::synthesize(rule, inks))
                    .map(Arc::new)
            })
            .collect();

        Self::with_tiles(palette, inks, tiles, options)
    }

    /// Prepares a mapping pass with already rendered tiles, parallel to `palette`.
    ///
    /// Returns [`EngineError::EmptyInkSet`] if no ink is active.
    pub fn with_tiles(
        palette: &[Srgb<u8>],
        inks: &InkSet,
        mut tiles: Vec<Option<Arc<Tile>>>,
        options: &MapOptions,
    ) -> Result<Self, EngineError> {
        let inks = inks
            .active()
            .into_iter()
            .map(|ink| (ink.color, color::rgb_to_lab(ink.color)))
            .collect::<Vec<_>>();

        if inks.is_empty() {
            return Err(EngineError::EmptyInkSet);
        }

        tiles.resize(palette.len(), None);
        let has_tiles = tiles.iter().any(Option::is_some);
        let buckets = palette.iter().map(|&c| color::rgb_f32(c)).collect::<Vec<_>>();

        Ok(Self {
            buckets: NearestPoints::new(&buckets),
            tiles,
            has_tiles,
            inks,
            options: *options,
        })
    }

    /// Returns the first ink nearest to `rgb`, stopping early at a distance below the snap epsilon.
    #[inline]
    fn nearest_ink(&self, rgb: [f32; 3]) -> Srgb<u8> {
        let lab = color::rgb_f32_to_lab(rgb);
        let mut chosen = self.inks[0].0;
        let mut best = f32::INFINITY;
        for &(ink, ink_lab) in &self.inks {
            let dist = color::lab_distance(lab, ink_lab, self.options.weights);
            if dist < best {
                best = dist;
                chosen = ink;
            }
            if dist < self.options.snap_epsilon {
                chosen = ink;
                break;
            }
        }
        chosen
    }

    /// Maps one opaque pixel.
    #[inline]
    fn map_pixel(&self, x: u32, y: u32, rgb: [f32; 3]) -> Srgb<u8> {
        if self.has_tiles {
            if let Some((bucket, _)) = self.buckets.nearest(rgb) {
                if let Some(tile) = &self.tiles[bucket] {
                    return tile.sample(x, y);
                }
            }
        }
        self.nearest_ink(rgb)
    }

    /// Maps one row of pixels, diffusing error if `error` is given.
    fn map_row(
        &self,
        y: u32,
        src: &[Srgba<u8>],
        dst: &mut [Srgba<u8>],
        mut error: Option<&mut ErrorBuf>,
    ) {
        for (i, (&pixel, out)) in src.iter().zip(dst).enumerate() {
            if pixel.alpha < ALPHA_THRESHOLD {
                *out = Srgba::new(0, 0, 0, 0);
                if let Some(error) = error.as_deref_mut() {
                    error.propagate(i, [0.0; 3]);
                }
                continue;
            }

            let mut rgb = color::rgb_f32(pixel.color);
            if let Some(error) = error.as_deref() {
                error.apply(i, &mut rgb);
                rgb = rgb.map(|c| c.clamp(0.0, 255.0));
            }

            #[allow(clippy::cast_possible_truncation)]
            let mapped = self.map_pixel(i as u32, y, rgb);
            let (r, g, b) = mapped.into_components();
            *out = Srgba::new(r, g, b, pixel.alpha);

            if let Some(error) = error.as_deref_mut() {
                let q = color::rgb_f32(mapped);
                error.propagate(i, [rgb[0] - q[0], rgb[1] - q[1], rgb[2] - q[2]]);
            }
        }

        if let Some(error) = error {
            error.next_row();
        }
    }

    /// Applies the unsharp mask, if enabled.
    fn finish(&self, mut output: PixelBuffer) -> PixelBuffer {
        if let Some(sharpen) = self.options.sharpen {
            unsharp(&mut output, sharpen);
        }
        output
    }

    /// Maps `source`, reporting progress every [`PROGRESS_ROWS`] rows and once at the end.
    ///
    /// Returns [`EngineError::Cancelled`] if `progress` breaks.
    pub fn map(
        &self,
        source: &PixelBuffer,
        mut progress: impl FnMut(Progress) -> ControlFlow<()>,
    ) -> Result<PixelBuffer, EngineError> {
        let (width, height) = source.dimensions();
        let mut output = PixelBuffer::filled(width, height, Srgba::new(0, 0, 0, 0));

        tracing::debug!(
            width,
            height,
            inks = self.inks.len(),
            tiles = self.tiles.iter().flatten().count(),
            dither = self.options.dither,
            "mapping image"
        );

        let mut report = |rows_done| {
            let rows_total = height;
            if progress(Progress { rows_done, rows_total }).is_break() {
                tracing::debug!(rows_done, rows_total, "mapping cancelled");
                Err(EngineError::Cancelled)
            } else {
                Ok(())
            }
        };

        if width > 0 {
            let width_usize = width as usize;
            let mut buf = ErrorBuf::new_buf(width_usize);
            let mut error = if self.options.dither {
                Some(ErrorBuf::new(width_usize, &mut buf))
            } else {
                None
            };

            let rows = source
                .pixels()
                .chunks_exact(width_usize)
                .zip(output.pixels_mut().chunks_exact_mut(width_usize));

            for (y, (src, dst)) in (0..height).zip(rows) {
                self.map_row(y, src, dst, error.as_mut());
                let rows_done = y + 1;
                if rows_done % PROGRESS_ROWS == 0 && rows_done < height {
                    report(rows_done)?;
                }
            }
        }

        report(height)?;

        Ok(self.finish(output))
    }

    /// Maps `source`, processing rows in parallel.
    ///
    /// Error diffusion carries state from each row to the next,
    /// so with dithering enabled this runs the sequential pass instead.
    /// The output is identical to [`Mapper::map`] either way.
    #[cfg(feature = "threads")]
    pub fn map_par(&self, source: &PixelBuffer) -> Result<PixelBuffer, EngineError> {
        if self.options.dither {
            return self.map(source, |_| ControlFlow::Continue(()));
        }

        let (width, height) = source.dimensions();
        let mut output = PixelBuffer::filled(width, height, Srgba::new(0, 0, 0, 0));

        if width > 0 {
            let width = width as usize;
            output
                .pixels_mut()
                .par_chunks_mut(width)
                .zip(source.pixels().par_chunks(width))
                .enumerate()
                .for_each(|(y, (dst, src))| {
                    #[allow(clippy::cast_possible_truncation)]
                    self.map_row(y as u32, src, dst, None);
                });
        }

        Ok(self.finish(output))
    }
}

/// Maps `source` onto the active inks, honoring the rules of each palette color.
///
/// `rules` is parallel to `palette`; missing entries count as no rule.
/// The output has the same dimensions as `source`.
///
/// # Errors
/// Returns [`EngineError::EmptyInkSet`] if no ink is active.
///
/// # Examples
/// ```
/// # use inkmix::{pipeline, InkSet, MapOptions, PixelBuffer};
/// # use palette::{Srgb, Srgba};
/// # fn main() -> Result<(), inkmix::EngineError> {
/// let source = PixelBuffer::filled(2, 2, Srgba::new(200, 100, 50, 255));
/// let inks = InkSet::from_colors([Srgb::new(255, 0, 0), Srgb::new(255, 255, 0)]);
///
/// let mapped = pipeline::map_image(&source, &[], &inks, &[], &MapOptions::new())?;
/// assert!(mapped.pixels().iter().all(|&p| p == Srgba::new(255, 0, 0, 255)));
/// # Ok(())
/// # }
/// ```
pub fn map_image(
    source: &PixelBuffer,
    palette: &[Srgb<u8>],
    inks: &InkSet,
    rules: &[Option<Rule>],
    options: &MapOptions,
) -> Result<PixelBuffer, EngineError> {
    map_image_with_progress(source, palette, inks, rules, options, |_| ControlFlow::Continue(()))
}

/// Like [`map_image`], but reports progress every [`PROGRESS_ROWS`] rows and at the end.
///
/// # Errors
/// Returns [`EngineError::EmptyInkSet`] if no ink is active,
/// or [`EngineError::Cancelled`] if `progress` returns [`ControlFlow::Break`].
pub fn map_image_with_progress(
    source: &PixelBuffer,
    palette: &[Srgb<u8>],
    inks: &InkSet,
    rules: &[Option<Rule>],
    options: &MapOptions,
    progress: impl FnMut(Progress) -> ControlFlow<()>,
) -> Result<PixelBuffer, EngineError> {
    Mapper::new(palette, inks, rules, options)?.map(source, progress)
}

/// Like [`map_image`], but maps rows in parallel when dithering is off.
///
/// # Errors
/// Returns [`EngineError::EmptyInkSet`] if no ink is active.
#[cfg(feature = "threads")]
pub fn map_image_par(
    source: &PixelBuffer,
    palette: &[Srgb<u8>],
    inks: &InkSet,
    rules: &[Option<Rule>],
    options: &MapOptions,
) -> Result<PixelBuffer, EngineError> {
    Mapper::new(palette, inks, rules, options)?.map_par(source)
}

/// Sharpens the color channels of `buffer` with an unsharp mask, leaving alpha untouched.
///
/// Each channel becomes `clamp(round(v + amount · (v - blur)), 0, 255)`, where `blur` is the mean
/// of the `(2·radius + 1)²` window around the pixel, with coordinates clamped to the image edges.
pub fn unsharp(buffer: &mut PixelBuffer, sharpen: Sharpen) {
    let (width, height) = buffer.dimensions();
    if width == 0 || height == 0 {
        return;
    }

    let Sharpen { radius, amount } = sharpen;
    let radius = i64::from(radius);
    let source = buffer.pixels().to_vec();
    let at = |x: i64, y: i64| {
        let x = x.clamp(0, i64::from(width) - 1);
        let y = y.clamp(0, i64::from(height) - 1);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            color::rgb_f32(source[(y as usize) * width as usize + x as usize].color)
        }
    };

    #[allow(clippy::cast_precision_loss)]
    let count = ((2 * radius + 1) * (2 * radius + 1)) as f32;

    for y in 0..i64::from(height) {
        for x in 0..i64::from(width) {
            let mut sum = [0.0f32; 3];
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let v = at(x + dx, y + dy);
                    for c in 0..3 {
                        sum[c] += v[c];
                    }
                }
            }

            let v = at(x, y);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let [r, g, b] = [0, 1, 2].map(|c| {
                let blur = sum[c] / count;
                (v[c] + amount * (v[c] - blur)).round().clamp(0.0, 255.0) as u8
            });

            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let pixel = &mut buffer.pixels_mut()[y as usize * width as usize + x as usize];
            pixel.color = Srgb::new(r, g, b);
        }
    }
}
