//! Rendering the repeating tiles of mix and pattern rules.
//!
//! A mix tile is a `block × block` grid of single-ink cells, each drawn as a solid `cell × cell` square.
//! How many cells each ink gets follows its percentage, and which cells it gets follows a [`MixPattern`].
//!
//! A pattern tile repeats one `cell × cell` shape over a background color, `block × block` times.

use crate::{
    mix::{MixParams, PatternParams, RuleMode},
    InkSet, Rule,
};
use palette::Srgb;
use rand::{seq::SliceRandom, SeedableRng};
use rand_xoshiro::Xoroshiro128PlusPlus;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The 4x4 Bayer matrix used by [`MixPattern::Bayer`].
const BAYER: [[u32; 4]; 4] = [[0, 8, 2, 10], [12, 4, 14, 6], [3, 11, 1, 9], [15, 7, 13, 5]];

/// The smallest cell of a pattern tile.
const MIN_PATTERN_CELL: u32 = 2;

/// The largest number of cells per tile side. Larger blocks are clamped to this.
pub const MAX_BLOCK: u32 = 64;

/// The largest cell side in pixels. Larger cells are clamped to this.
pub const MAX_CELL: u32 = 64;

/// The order in which the cells of a mix tile are handed out to inks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MixPattern {
    /// Alternate cells by the parity of `x + y`.
    Checker,
    /// Row-major order, giving horizontal bands.
    StripeH,
    /// Column-major order, giving vertical bands.
    StripeV,
    /// Ordered dithering by a tiled 4x4 Bayer matrix.
    Bayer,
    /// A fixed pseudo-random permutation of the cells.
    #[default]
    BlueNoise,
}

/// The shape stamped into each cell of a pattern tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Shape {
    /// A filled circle.
    #[default]
    Dot,
    /// An axis-aligned square.
    Square,
    /// An upward-pointing isosceles triangle.
    Triangle,
    /// A square rotated by 45 degrees.
    Diamond,
    /// A plus sign.
    Cross,
    /// A horizontal band across the cell.
    StripeH,
    /// A vertical band across the cell.
    StripeV,
    /// Two diagonally opposite quadrants.
    Checker,
}

/// A square, repeating block of pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    /// The side length in pixels.
    size: u32,
    /// `size * size` pixels in row-major order.
    pixels: Vec<Srgb<u8>>,
}

impl Tile {
    /// The side length of the tile in pixels.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// The pixels of the tile in row-major order.
    #[must_use]
    pub fn pixels(&self) -> &[Srgb<u8>] {
        &self.pixels
    }

    /// Returns the tile color at image coordinates `(x, y)`, wrapping around the tile.
    #[inline]
    #[must_use]
    pub fn sample(&self, x: u32, y: u32) -> Srgb<u8> {
        let x = x % self.size;
        let y = y % self.size;
        self.pixels[(y * self.size + x) as usize]
    }
}

/// Returns how many of the `block²` cells each ink gets.
///
/// `block` is clamped to `1..=MAX_BLOCK`.
///
/// Counts start at `round(block² · percent / 100)`. While their sum is short of `block²`,
/// the first smallest count is incremented; while it is over, the first largest is decremented.
///
/// # Examples
/// ```
/// # use inkmix::tile::cell_counts;
/// assert_eq!(cell_counts(6, &[95, 5]), vec![34, 2]);
/// assert_eq!(cell_counts(4, &[34, 33, 33]), vec![6, 5, 5]);
/// ```
#[must_use]
pub fn cell_counts(block: u32, percents: &[u8]) -> Vec<u32> {
    if percents.is_empty() {
        return Vec::new();
    }

    let block = block.clamp(1, MAX_BLOCK);
    let total = block * block;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let mut counts = percents
        .iter()
        .map(|&p| (f64::from(total) * f64::from(p) / 100.0).round() as u32)
        .collect::<Vec<_>>();

    let mut sum = counts.iter().sum::<u32>();
    while sum < total {
        let min = counts.iter().copied().min().unwrap_or(0);
        if let Some(count) = counts.iter_mut().find(|c| **c == min) {
            *count += 1;
        }
        sum += 1;
    }
    while sum > total {
        let max = counts.iter().copied().max().unwrap_or(0);
        if let Some(count) = counts.iter_mut().find(|c| **c == max) {
            *count -= 1;
        }
        sum -= 1;
    }

    counts
}

/// Returns the rank of each cell of a `block × block` grid, in row-major cell order.
fn cell_ranks(pattern: MixPattern, block: u32) -> Vec<u32> {
    let block = block.clamp(1, MAX_BLOCK);
    let cells = (0..block).flat_map(|y| (0..block).map(move |x| (x, y)));
    match pattern {
        MixPattern::Checker => cells.map(|(x, y)| (x + y) % 2).collect(),
        MixPattern::StripeH => cells.map(|(x, y)| y * block + x).collect(),
        MixPattern::StripeV => cells.map(|(x, y)| x * block + y).collect(),
        MixPattern::Bayer => cells
            .map(|(x, y)| BAYER[(y % 4) as usize][(x % 4) as usize])
            .collect(),
        MixPattern::BlueNoise => {
            let mut ranks = (0..block * block).collect::<Vec<_>>();
            let mut rng = Xoroshiro128PlusPlus::seed_from_u64(u64::from(block));
            ranks.shuffle(&mut rng);
            ranks
        }
    }
}

/// Returns the cells of a `block × block` grid in the order they are handed out to inks.
///
/// Cells are row-major indices. Cells of equal rank keep their index order.
/// `block` is clamped to `1..=MAX_BLOCK`.
#[must_use]
pub fn cell_order(pattern: MixPattern, block: u32) -> Vec<usize> {
    let ranks = cell_ranks(pattern, block);
    let mut order = (0..ranks.len()).collect::<Vec<_>>();
    order.sort_by_key(|&i| ranks[i]);
    order
}

/// Renders a mix tile for the given ink colors, parallel to `params.percents`.
///
/// Returns `None` if `colors` is empty or its length differs from the percentages.
#[must_use]
pub fn mix_tile(params: &MixParams, colors: &[Srgb<u8>]) -> Option<Tile> {
    if colors.is_empty() || colors.len() != params.percents.len() {
        return None;
    }

    let block = params.block.clamp(1, MAX_BLOCK);
    let cell = params.cell.clamp(1, MAX_CELL);

    let counts = cell_counts(block, &params.percents);
    let order = cell_order(params.pattern, block);

    let mut cell_colors = vec![colors[0]; order.len()];
    let mut cells = order.into_iter();
    for (&color, &count) in colors.iter().zip(&counts) {
        for index in cells.by_ref().take(count as usize) {
            cell_colors[index] = color;
        }
    }

    let size = block * cell;
    let pixels = (0..size)
        .flat_map(|y| (0..size).map(move |x| (x, y)))
        .map(|(x, y)| cell_colors[((y / cell) * block + x / cell) as usize])
        .collect();

    Some(Tile { size, pixels })
}

/// Whether the pixel at `(x, y)` within a `cell × cell` square is covered by `shape`.
///
/// `size` is the shape's size relative to the cell in `0.1..=1.0`.
fn covers(shape: Shape, cell: u32, size: f32, x: u32, y: u32) -> bool {
    #[allow(clippy::cast_precision_loss)]
    let c = cell as f32;
    let half = cell / 2;

    // pixel centers relative to the cell center
    #[allow(clippy::cast_precision_loss)]
    let (dx, dy) = (x as f32 + 0.5 - c / 2.0, y as f32 + 0.5 - c / 2.0);
    let extent = c * size.sqrt() / 2.0;

    match shape {
        Shape::Dot => {
            let r = extent.round().max(1.0);
            dx * dx + dy * dy <= r * r
        }
        Shape::Square => dx.abs() <= extent && dy.abs() <= extent,
        Shape::Diamond => dx.abs() + dy.abs() <= extent,
        Shape::Triangle => dy <= extent && dx.abs() <= (dy + extent) / 2.0,
        Shape::Cross => {
            let arm = extent / 3.0;
            (dx.abs() <= extent && dy.abs() <= arm) || (dy.abs() <= extent && dx.abs() <= arm)
        }
        Shape::StripeH | Shape::StripeV => {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let thickness = ((c * size).round() as u32).clamp(1, cell);
            let start = half.min(cell - thickness);
            let v = if shape == Shape::StripeH { y } else { x };
            (start..start + thickness).contains(&v)
        }
        Shape::Checker => {
            let upper = cell.div_ceil(2);
            (x < upper && y < upper) || (x >= half && y >= half)
        }
    }
}

/// Renders a pattern tile with the given foreground color.
#[must_use]
pub fn pattern_tile(params: &PatternParams, foreground: Srgb<u8>) -> Tile {
    let block = params.block.clamp(1, MAX_BLOCK);
    let cell = params.cell.clamp(MIN_PATTERN_CELL, MAX_CELL);
    let size = f32::from(params.size.clamp(10, 100)) / 100.0;

    let stamp = (0..cell)
        .flat_map(|y| (0..cell).map(move |x| (x, y)))
        .map(|(x, y)| covers(params.shape, cell, size, x, y))
        .collect::<Vec<_>>();

    let tile_size = block * cell;
    let pixels = (0..tile_size)
        .flat_map(|y| (0..tile_size).map(move |x| (x, y)))
        .map(|(x, y)| {
            let shift = if params.stagger && (y / cell) % 2 == 1 { cell / 2 } else { 0 };
            let lx = (x + shift) % cell;
            let ly = y % cell;
            if stamp[(ly * cell + lx) as usize] {
                foreground
            } else {
                params.background
            }
        })
        .collect();

    Tile { size: tile_size, pixels }
}

/// Renders the tile for `rule`, resolving its ink references through `inks`.
///
/// Returns `None` if the rule has no inks, references an ink that no longer exists,
/// or has mismatched mix percentages.
#[must_use]
pub fn synthesize(rule: &Rule, inks: &InkSet) -> Option<Tile> {
    let colors = rule
        .inks()
        .iter()
        .map(|&id| inks.color_of(id))
        .collect::<Option<Vec<_>>>()?;

    match rule.mode {
        RuleMode::Mix => mix_tile(&rule.mix, &colors),
        RuleMode::Pattern => colors.first().map(|&fg| pattern_tile(&rule.pattern, fg)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MixOptions;
    use rand::{Rng, SeedableRng};

    const A: Srgb<u8> = Srgb::new(10, 20, 30);
    const B: Srgb<u8> = Srgb::new(200, 210, 220);

    fn mix_params(percents: Vec<u8>, block: u32, cell: u32, pattern: MixPattern) -> MixParams {
        MixParams { inks: Vec::new(), percents, block, cell, pattern }
    }

    /// The color of each logical cell of a mix tile.
    fn cells(tile: &Tile, cell: u32) -> Vec<Srgb<u8>> {
        let block = tile.size() / cell;
        (0..block)
            .flat_map(|y| (0..block).map(move |x| (x, y)))
            .map(|(x, y)| tile.sample(x * cell, y * cell))
            .collect()
    }

    #[test]
    fn counts_always_fill_the_block() {
        let mut rng = Xoroshiro128PlusPlus::seed_from_u64(1);
        for block in 1..=9 {
            for _ in 0..100 {
                let a = rng.gen_range(0..=100);
                let b = rng.gen_range(0..=100 - a);
                let percents = [a, b, 100 - a - b];
                let counts = cell_counts(block, &percents);
                assert_eq!(counts.iter().sum::<u32>(), block * block, "{percents:?}");
            }
        }
        assert!(cell_counts(4, &[]).is_empty());
    }

    #[test]
    fn checker_half_and_half() {
        let params = mix_params(vec![50, 50], 4, 3, MixPattern::Checker);
        let tile = mix_tile(&params, &[A, B]).unwrap();
        assert_eq!(tile.size(), 12);

        let cells = cells(&tile, 3);
        assert_eq!(cells.iter().filter(|&&c| c == A).count(), 8);
        assert_eq!(cells.iter().filter(|&&c| c == B).count(), 8);
        for (i, &color) in cells.iter().enumerate() {
            let (x, y) = (i % 4, i / 4);
            assert_eq!(color, if (x + y) % 2 == 0 { A } else { B });
        }
    }

    #[test]
    fn cells_render_as_solid_squares() {
        let params = mix_params(vec![30, 70], 5, 4, MixPattern::BlueNoise);
        let tile = mix_tile(&params, &[A, B]).unwrap();
        for y in 0..tile.size() {
            for x in 0..tile.size() {
                assert_eq!(tile.sample(x, y), tile.sample(x / 4 * 4, y / 4 * 4));
            }
        }
    }

    #[test]
    fn orders_are_permutations() {
        for pattern in [
            MixPattern::Checker,
            MixPattern::StripeH,
            MixPattern::StripeV,
            MixPattern::Bayer,
            MixPattern::BlueNoise,
        ] {
            for block in [1, 4, 6, 7] {
                let mut order = cell_order(pattern, block);
                order.sort_unstable();
                assert_eq!(order, (0..(block * block) as usize).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn named_orders() {
        assert_eq!(cell_order(MixPattern::StripeH, 3), vec![0, 1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(cell_order(MixPattern::StripeV, 3), vec![0, 3, 6, 1, 4, 7, 2, 5, 8]);
        assert_eq!(cell_order(MixPattern::Checker, 3), vec![0, 2, 4, 6, 8, 1, 3, 5, 7]);
        assert_eq!(&cell_order(MixPattern::Bayer, 4)[..4], &[0, 10, 2, 8]);
        assert_eq!(cell_order(MixPattern::BlueNoise, 6), cell_order(MixPattern::BlueNoise, 6));
    }

    #[test]
    fn sample_wraps_around() {
        let params = mix_params(vec![100], 2, 2, MixPattern::StripeH);
        let tile = mix_tile(&params, &[A]).unwrap();
        assert_eq!(tile.sample(1000, 3), A);
        assert!(tile.pixels().iter().all(|&c| c == A));
        assert!(mix_tile(&params, &[A, B]).is_none());
    }

    #[test]
    fn dot_sits_in_the_middle() {
        let params = PatternParams {
            shape: Shape::Dot,
            background: B,
            cell: 6,
            block: 2,
            ..Default::default()
        };
        let tile = pattern_tile(&params, A);
        assert_eq!(tile.size(), 12);
        assert_eq!(tile.sample(3, 3), A);
        assert_eq!(tile.sample(0, 0), B);
        assert_eq!(tile.sample(9, 9), A);
        assert_eq!(tile.sample(6, 6), B);
    }

    #[test]
    fn full_size_square_covers_the_cell() {
        let params = PatternParams {
            shape: Shape::Square,
            size: 100,
            background: B,
            ..Default::default()
        };
        assert!(pattern_tile(&params, A).pixels().iter().all(|&c| c == A));
    }

    #[test]
    fn every_shape_draws_something_but_not_everything() {
        for shape in [
            Shape::Dot,
            Shape::Triangle,
            Shape::Diamond,
            Shape::Cross,
            Shape::StripeH,
            Shape::StripeV,
            Shape::Checker,
        ] {
            let params = PatternParams {
                shape,
                size: 50,
                cell: 8,
                background: B,
                ..Default::default()
            };
            let tile = pattern_tile(&params, A);
            let fg = tile.pixels().iter().filter(|&&c| c == A).count();
            assert!(fg > 0 && fg < tile.pixels().len(), "{shape:?}");
        }
    }

    #[test]
    fn stripes_are_bands() {
        let params = PatternParams {
            shape: Shape::StripeH,
            size: 50,
            cell: 6,
            block: 1,
            background: B,
            ..Default::default()
        };
        let tile = pattern_tile(&params, A);
        for y in 0..6 {
            let expected = if y >= 3 { A } else { B };
            assert!((0..6).all(|x| tile.sample(x, y) == expected));
        }
    }

    #[test]
    fn stagger_shifts_odd_rows() {
        let base = PatternParams {
            shape: Shape::StripeV,
            size: 50,
            cell: 4,
            block: 2,
            background: B,
            ..Default::default()
        };
        let plain = pattern_tile(&base, A);
        let staggered = pattern_tile(&PatternParams { stagger: true, ..base }, A);

        for x in 0..8 {
            assert_eq!(staggered.sample(x, 0), plain.sample(x, 0));
            assert_eq!(staggered.sample(x, 4), plain.sample(x + 2, 4));
        }
    }

    #[test]
    fn synthesize_resolves_inks() {
        let mut inks = InkSet::new();
        let a = inks.add(A);
        let b = inks.add(B);

        let mut rule = Rule::mix(MixParams {
            inks: vec![a, b],
            ..mix_params(vec![50, 50], 4, 1, MixPattern::Checker)
        });
        let tile = synthesize(&rule, &inks).unwrap();
        assert_eq!(tile.sample(0, 0), A);
        assert_eq!(tile.sample(1, 0), B);

        // edits to an ink show up in the next tile
        inks.get_mut(a).unwrap().color = Srgb::new(1, 2, 3);
        assert_eq!(synthesize(&rule, &inks).unwrap().sample(0, 0), Srgb::new(1, 2, 3));

        inks.remove(b).unwrap();
        assert!(synthesize(&rule, &inks).is_none());

        rule.mix.inks.clear();
        assert!(synthesize(&rule, &inks).is_none());

        let pattern = Rule::pattern(PatternParams {
            inks: vec![a],
            background: B,
            ..Default::default()
        });
        assert_eq!(synthesize(&pattern, &inks).unwrap().sample(0, 0), B);
    }

    #[test]
    fn bayer_repeats_every_four_cells() {
        let params = mix_params(vec![50, 50], 8, 1, MixPattern::Bayer);
        let tile = mix_tile(&params, &[A, B]).unwrap();
        assert_eq!(tile.size(), 8);

        let cells = cells(&tile, 1);
        assert_eq!(cells.iter().filter(|&&c| c == A).count(), 32);
        for y in 0..8 {
            for x in 0..8 {
                let expected = if BAYER[y % 4][x % 4] < 8 { A } else { B };
                assert_eq!(cells[y * 8 + x], expected, "({x}, {y})");
            }
        }
    }

    #[test]
    fn oversized_blocks_and_cells_are_clamped() {
        assert_eq!(cell_counts(70_000, &[100]), vec![MAX_BLOCK * MAX_BLOCK]);
        assert_eq!(cell_counts(70_000, &[50, 50]).iter().sum::<u32>(), MAX_BLOCK * MAX_BLOCK);
        assert_eq!(cell_order(MixPattern::StripeH, 70_000).len(), (MAX_BLOCK * MAX_BLOCK) as usize);

        let mix = mix_tile(&mix_params(vec![100], u32::MAX, 1, MixPattern::Checker), &[A]).unwrap();
        assert_eq!(mix.size(), MAX_BLOCK);

        let params = PatternParams { cell: u32::MAX, block: 1, ..Default::default() };
        assert_eq!(pattern_tile(&params, A).size(), MAX_CELL);

        let options = MixOptions::new().block(u32::MAX).cell(u32::MAX);
        assert_eq!((options.get_block(), options.get_cell()), (MAX_BLOCK, MAX_CELL));
    }
}
