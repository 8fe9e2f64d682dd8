//! Finding ink mixes that approximate colors missing from the ink set, and the rules built from them.
//!
//! The search works in two metrics. Candidate weights are scored by squared RGB distance
//! between the target and the linear-light mix, which is cheap enough for the full grid.
//! The winning mix is then checked once with the weighted Lab distance of
//! [`lab_distance`](crate::color::lab_distance), and replaced by a single ink if it is still too far off.

use crate::{
    color::{self, Weights},
    tile::{self, MixPattern, Shape},
    Ink, InkId, WHITE,
};
use palette::{LinSrgb, Srgb};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The grid step for the weight of the first ink of a pair, in `1/PAIR_STEPS`.
const PAIR_STEPS: u8 = 20;

/// The grid step for the weights of the first two inks of a triple, in `1/TRIPLE_STEPS`.
const TRIPLE_STEPS: u8 = 10;

/// The maximum number of inks combined in a single mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MaxInks {
    /// Only pairs of inks.
    #[default]
    Two,
    /// Pairs and triples of inks.
    Three,
}

impl MaxInks {
    /// The number of inks as an integer.
    #[must_use]
    pub const fn get(self) -> usize {
        match self {
            MaxInks::Two => 2,
            MaxInks::Three => 3,
        }
    }
}

/// Whether a rule renders as an ink mix or as a shape pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RuleMode {
    /// Interleave several inks in proportion.
    #[default]
    Mix,
    /// Stamp a shape in one ink over a background color.
    Pattern,
}

/// The parameters of a [`RuleMode::Mix`] rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MixParams {
    /// The inks to interleave.
    pub inks: Vec<InkId>,
    /// The share of each ink in percent, parallel to `inks`. Sums to 100.
    pub percents: Vec<u8>,
    /// The number of cells along each side of the tile.
    pub block: u32,
    /// The size of each cell in pixels.
    pub cell: u32,
    /// The order in which cells are handed out to inks.
    pub pattern: MixPattern,
}

/// The parameters of a [`RuleMode::Pattern`] rule.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PatternParams {
    /// The shape stamped in each cell.
    pub shape: Shape,
    /// The color behind the shape.
    #[cfg_attr(feature = "serde", serde(with = "crate::color::serde_hex"))]
    pub background: Srgb<u8>,
    /// The foreground inks. Only the first one is drawn.
    pub inks: Vec<InkId>,
    /// The size of each cell in pixels.
    pub cell: u32,
    /// The size of the shape relative to the cell, in percent (`10..=100`).
    pub size: u8,
    /// Whether odd rows of cells are shifted by half a cell.
    pub stagger: bool,
    /// The number of cells along each side of the tile.
    pub block: u32,
}

impl Default for PatternParams {
    fn default() -> Self {
        Self {
            shape: Shape::Dot,
            background: WHITE,
            inks: Vec::new(),
            cell: 6,
            size: 65,
            stagger: false,
            block: 6,
        }
    }
}

/// An override for how one palette color is rendered.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rule {
    /// Whether the rule takes part in mapping.
    pub on: bool,
    /// Which of `mix` and `pattern` is rendered.
    pub mode: RuleMode,
    /// Used in [`RuleMode::Mix`].
    pub mix: MixParams,
    /// Used in [`RuleMode::Pattern`].
    pub pattern: PatternParams,
    /// The perceptual distance between the target color and the realized mix.
    /// `None` for pattern rules.
    pub error: Option<f32>,
}

impl Rule {
    /// Creates an enabled mix rule.
    #[must_use]
    pub fn mix(mix: MixParams) -> Self {
        Self {
            on: true,
            mode: RuleMode::Mix,
            mix,
            pattern: PatternParams::default(),
            error: None,
        }
    }

    /// Creates an enabled pattern rule.
    #[must_use]
    pub fn pattern(pattern: PatternParams) -> Self {
        Self {
            on: true,
            mode: RuleMode::Pattern,
            mix: MixParams::default(),
            pattern,
            error: None,
        }
    }

    /// The inks referenced by the rendered mode.
    #[must_use]
    pub fn inks(&self) -> &[InkId] {
        match self.mode {
            RuleMode::Mix => &self.mix.inks,
            RuleMode::Pattern => &self.pattern.inks,
        }
    }

    /// Whether the rule is on and has at least one ink to render with.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.on && !self.inks().is_empty()
    }
}

/// Options for [`build_rule`] and [`auto_rules`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MixOptions {
    /// The number of cells along each side of generated tiles.
    block: u32,
    /// The size of each cell in pixels.
    cell: u32,
    /// The cell order of generated tiles.
    pattern: MixPattern,
    /// How willing the optimizer is to keep a mix instead of falling back to one ink.
    sensitivity: u8,
    /// The maximum number of inks per mix.
    max_inks: MaxInks,
    /// How many of the nearest inks take part in the search. `0` disables pruning.
    prune: u8,
    /// The weights of the gamut check.
    weights: Weights,
}

impl MixOptions {
    /// Creates a new [`MixOptions`] with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            block: 6,
            cell: 3,
            pattern: MixPattern::BlueNoise,
            sensitivity: 60,
            max_inks: MaxInks::Two,
            prune: 5,
            weights: Weights::new(1.0, 1.0),
        }
    }

    /// Sets the number of cells along each side of generated tiles,
    /// clamped to `1..=`[`tile::MAX_BLOCK`].
    #[must_use]
    pub const fn block(mut self, block: u32) -> Self {
        self.block = if block == 0 {
            1
        } else if block > tile::MAX_BLOCK {
            tile::MAX_BLOCK
        } else {
            block
        };
        self
    }

    /// Sets the size of each cell in pixels, clamped to `1..=`[`tile::MAX_CELL`].
    #[must_use]
    pub const fn cell(mut self, cell: u32) -> Self {
        self.cell = if cell == 0 {
            1
        } else if cell > tile::MAX_CELL {
            tile::MAX_CELL
        } else {
            cell
        };
        self
    }

    /// Sets the cell order of generated tiles.
    #[must_use]
    pub const fn pattern(mut self, pattern: MixPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Sets the gamut sensitivity, clamped to `0..=100`.
    ///
    /// Higher values tighten the allowed error before a mix is replaced by a single ink.
    #[must_use]
    pub const fn sensitivity(mut self, sensitivity: u8) -> Self {
        self.sensitivity = if sensitivity > 100 { 100 } else { sensitivity };
        self
    }

    /// Sets the maximum number of inks per mix.
    #[must_use]
    pub const fn max_inks(mut self, max_inks: MaxInks) -> Self {
        self.max_inks = max_inks;
        self
    }

    /// Sets how many of the nearest inks take part in the search. `0` disables pruning.
    #[must_use]
    pub const fn prune(mut self, prune: u8) -> Self {
        self.prune = prune;
        self
    }

    /// Sets the weights of the gamut check.
    #[must_use]
    pub const fn weights(mut self, weights: Weights) -> Self {
        self.weights = weights;
        self
    }

    /// Gets the number of cells along each side of generated tiles.
    #[must_use]
    pub const fn get_block(&self) -> u32 {
        self.block
    }

    /// Gets the size of each cell in pixels.
    #[must_use]
    pub const fn get_cell(&self) -> u32 {
        self.cell
    }

    /// Gets the cell order of generated tiles.
    #[must_use]
    pub const fn get_pattern(&self) -> MixPattern {
        self.pattern
    }

    /// Gets the gamut sensitivity.
    #[must_use]
    pub const fn get_sensitivity(&self) -> u8 {
        self.sensitivity
    }

    /// Gets the maximum number of inks per mix.
    #[must_use]
    pub const fn get_max_inks(&self) -> MaxInks {
        self.max_inks
    }

    /// Gets the number of nearest inks that take part in the search.
    #[must_use]
    pub const fn get_prune(&self) -> u8 {
        self.prune
    }

    /// Gets the weights of the gamut check.
    #[must_use]
    pub const fn get_weights(&self) -> Weights {
        self.weights
    }
}

impl Default for MixOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// The outcome of [`best_mix`].
#[derive(Debug, Clone, PartialEq)]
pub struct Mix {
    /// The mixed inks.
    pub inks: Vec<Ink>,
    /// The share of each ink in percent. Sums to 100.
    pub percents: Vec<u8>,
    /// The squared RGB distance between the target and the best mix found by the search.
    pub score: f32,
}

impl Mix {
    /// The color produced by mixing the inks in their percentages, in linear light.
    #[must_use]
    pub fn realized(&self) -> Srgb<u8> {
        let colors = self.inks.iter().map(|ink| color::to_linear(ink.color)).collect::<Vec<_>>();
        let weights = self.percents.iter().map(|&p| f32::from(p) / 100.0).collect::<Vec<_>>();
        color::from_linear(color::mix_linear(&colors, &weights))
    }
}

/// The Lab error above which a mix is replaced by a single ink.
///
/// This is `6 + (100 - sensitivity)·0.05`, with `sensitivity` clamped to `0..=100`.
#[must_use]
pub fn snap_threshold(sensitivity: u8) -> f32 {
    6.0 + f32::from(100 - sensitivity.min(100)) * 0.05
}

/// Converts weights into integer percentages that sum to exactly 100.
///
/// Negative weights count as zero. After rounding, the first smallest percentage is
/// incremented while the sum is below 100, and the first largest is decremented while above.
///
/// # Examples
/// ```
/// # use inkmix::mix::normalize_percents;
/// assert_eq!(normalize_percents(&[1.0, 1.0, 1.0]), vec![34, 33, 33]);
/// assert_eq!(normalize_percents(&[0.0, 0.0]), vec![50, 50]);
/// ```
#[must_use]
pub fn normalize_percents(weights: &[f32]) -> Vec<u8> {
    if weights.is_empty() {
        return Vec::new();
    }

    let weights = weights.iter().map(|&w| f64::from(w.max(0.0))).collect::<Vec<_>>();
    let sum = weights.iter().sum::<f64>();
    let sum = if sum > 0.0 { sum } else { 1.0 };

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let mut percents = weights
        .iter()
        .map(|w| (w / sum * 100.0).round() as i32)
        .collect::<Vec<_>>();

    let mut total = percents.iter().sum::<i32>();
    while total != 100 {
        let (target, step) = if total < 100 {
            (percents.iter().min(), 1)
        } else {
            (percents.iter().max(), -1)
        };
        let index = target
            .and_then(|&t| percents.iter().position(|&p| p == t))
            .unwrap_or(0);
        percents[index] += step;
        total += step;
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    percents.into_iter().map(|p| p as u8).collect()
}

/// Keeps the `n` inks nearest to `target` by squared RGB distance, in order of distance.
fn prune(target: [f32; 3], inks: &[Ink], n: u8) -> Vec<Ink> {
    let mut inks = inks.to_vec();
    if n > 0 && inks.len() > usize::from(n) {
        inks.sort_by(|a, b| {
            let da = color::rgb_distance(target, color::rgb_f32(a.color));
            let db = color::rgb_distance(target, color::rgb_f32(b.color));
            da.total_cmp(&db)
        });
        inks.truncate(usize::from(n));
    }
    inks
}

/// Returns the index of the first ink nearest to `target` by squared RGB distance.
fn nearest_rgb(target: [f32; 3], inks: &[Ink]) -> Option<usize> {
    let mut best = None;
    let mut best_dist = f32::INFINITY;
    for (i, ink) in inks.iter().enumerate() {
        let dist = color::rgb_distance(target, color::rgb_f32(ink.color));
        if dist < best_dist {
            best_dist = dist;
            best = Some(i);
        }
    }
    best
}

/// Tracks the best weights seen during the grid search.
struct Search<'a> {
    target: [f32; 3],
    colors: &'a [LinSrgb],
    best: Option<(Vec<usize>, Vec<f32>)>,
    best_score: f32,
}

impl Search<'_> {
    fn try_weights(&mut self, combo: &[usize], weights: &[f32]) {
        let colors = combo.iter().map(|&i| self.colors[i]).collect::<Vec<_>>();
        let mixed = color::from_linear_f32(color::mix_linear(&colors, weights));
        let score = color::rgb_distance(self.target, mixed);
        if score < self.best_score {
            self.best_score = score;
            self.best = Some((combo.to_vec(), weights.to_vec()));
        }
    }

    fn pair(&mut self, i: usize, j: usize) {
        for step in 0..=PAIR_STEPS {
            let a = f32::from(step) / f32::from(PAIR_STEPS);
            self.try_weights(&[i, j], &[a, 1.0 - a]);
        }
    }

    fn triple(&mut self, i: usize, j: usize, k: usize) {
        for step_a in 0..=TRIPLE_STEPS {
            for step_b in 0..=(TRIPLE_STEPS - step_a) {
                let a = f32::from(step_a) / f32::from(TRIPLE_STEPS);
                let b = f32::from(step_b) / f32::from(TRIPLE_STEPS);
                let c = (1.0 - a - b).max(0.0);
                self.try_weights(&[i, j, k], &[a, b, c]);
            }
        }
    }
}

/// Searches for the pair (or triple) of inks whose linear-light mix comes closest to `target`.
///
/// Inks are first pruned to the `prune` nearest (`0` disables pruning). With fewer than two
/// candidates the nearest ink is returned at 100 %. Returns `None` only if `inks` is empty.
///
/// Ties keep the first minimum in enumeration order: for each pair `(i, j)`,
/// the pair itself followed by the triples `(i, j, k)` with `k > j`.
#[must_use]
pub fn best_mix(target: Srgb<u8>, inks: &[Ink], max_inks: MaxInks, prune: u8) -> Option<Mix> {
    let target_rgb = color::rgb_f32(target);
    let candidates = self::prune(target_rgb, inks, prune);

    if candidates.len() < 2 {
        let ink = *candidates.first()?;
        let score = color::rgb_distance(target_rgb, color::rgb_f32(ink.color));
        return Some(Mix { inks: vec![ink], percents: vec![100], score });
    }

    let colors = candidates.iter().map(|ink| color::to_linear(ink.color)).collect::<Vec<_>>();
    let mut search = Search {
        target: target_rgb,
        colors: &colors,
        best: None,
        best_score: f32::INFINITY,
    };

    let n = candidates.len();
    for i in 0..n {
        for j in (i + 1)..n {
            search.pair(i, j);
            if max_inks == MaxInks::Three {
                for k in (j + 1)..n {
                    search.triple(i, j, k);
                }
            }
        }
    }

    let score = search.best_score;
    let (combo, weights) = search.best?;

    Some(Mix {
        inks: combo.iter().map(|&i| candidates[i]).collect(),
        percents: normalize_percents(&weights),
        score,
    })
}

/// Builds a mix rule for `target` from the active `inks`.
///
/// If the realized mix is further than [`snap_threshold`] from the target in weighted Lab distance,
/// the mix is replaced by the single ink nearest to the realized color.
/// The rule's `error` is the distance between the target and the color the rule actually renders.
///
/// Returns `None` if `inks` is empty.
#[must_use]
pub fn build_rule(target: Srgb<u8>, inks: &[Ink], options: &MixOptions) -> Option<Rule> {
    let mix = best_mix(target, inks, options.max_inks, options.prune)?;

    let target_lab = color::rgb_to_lab(target);
    let error_of = |c: Srgb<u8>| {
        color::lab_distance(target_lab, color::rgb_to_lab(c), options.weights).sqrt()
    };

    let realized = mix.realized();
    let mix_error = error_of(realized);
    let threshold = snap_threshold(options.sensitivity);

    let (ids, percents, error) = if mix_error > threshold {
        let index = nearest_rgb(color::rgb_f32(realized), inks)?;
        let ink = inks[index];
        tracing::trace!(
            target = %color::to_hex(target),
            mix_error,
            threshold,
            fallback = %color::to_hex(ink.color),
            "mix out of gamut, using a single ink"
        );
        (vec![ink.id], vec![100], error_of(ink.color))
    } else {
        let ids = mix.inks.iter().map(|ink| ink.id).collect();
        (ids, mix.percents, mix_error)
    };

    Some(Rule {
        error: Some(error),
        ..Rule::mix(MixParams {
            inks: ids,
            percents,
            block: options.block,
            cell: options.cell,
            pattern: options.pattern,
        })
    })
}

/// Builds a rule for every palette color.
///
/// Colors already present among the active `inks` get no rule.
#[must_use]
pub fn auto_rules(palette: &[Srgb<u8>], inks: &[Ink], options: &MixOptions) -> Vec<Option<Rule>> {
    let rules = palette
        .iter()
        .map(|&target| {
            if inks.iter().any(|ink| ink.color == target) {
                None
            } else {
                build_rule(target, inks, options)
            }
        })
        .collect::<Vec<_>>();

    tracing::debug!(
        colors = palette.len(),
        inks = inks.len(),
        rules = rules.iter().flatten().count(),
        "generated mix rules"
    );

    rules
}
