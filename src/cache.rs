//! Memoization of rendered tiles and mapped images.
//!
//! Both caches are keyed by a [`Fingerprint`]: a structural hash over every input that affects the
//! output. Ink references are hashed as the colors they currently resolve to,
//! so editing an ink changes the fingerprint of every rule and mapping that uses it.

use crate::{
    mix::{PatternParams, RuleMode},
    tile, BackgroundMode, InkSet, MapOptions, PixelBuffer, Rule, Tile,
};
use ordered_float::OrderedFloat;
use palette::Srgb;
use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    sync::Arc,
};

/// A 64-bit structural hash of the inputs to a tile or a mapping pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Hashes a single value.
    fn of(value: impl Hash) -> Self {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// The fingerprint of the tile `rule` renders with the current `inks`.
    #[must_use]
    pub fn of_tile(rule: &Rule, inks: &InkSet) -> Self {
        Self::of(TileKey { rule, inks })
    }

    /// The fingerprint of a mapping pass.
    ///
    /// `scale` is the factor the source was resampled by before mapping.
    #[must_use]
    pub fn of_mapping(
        palette: &[Srgb<u8>],
        inks: &InkSet,
        rules: &[Option<Rule>],
        options: &MapOptions,
        background: BackgroundMode,
        scale: f32,
    ) -> Self {
        let mut hasher = DefaultHasher::new();

        // each run is length-prefixed so colors cannot shift between runs
        let active = inks.active();
        active.len().hash(&mut hasher);
        for ink in &active {
            ink.color.into_components().hash(&mut hasher);
        }
        palette.len().hash(&mut hasher);
        for &color in palette {
            color.into_components().hash(&mut hasher);
        }
        rules.len().hash(&mut hasher);
        for rule in rules {
            rule.as_ref()
                .filter(|rule| rule.is_active())
                .map(|rule| TileKey { rule, inks })
                .hash(&mut hasher);
        }

        let weights = options.get_weights();
        OrderedFloat(weights.lightness).hash(&mut hasher);
        OrderedFloat(weights.chroma).hash(&mut hasher);
        options.get_dither().hash(&mut hasher);
        options
            .get_sharpen()
            .map(|s| (s.radius, OrderedFloat(s.amount)))
            .hash(&mut hasher);
        OrderedFloat(options.get_snap_epsilon()).hash(&mut hasher);
        background.hash(&mut hasher);
        OrderedFloat(scale).hash(&mut hasher);

        Self(hasher.finish())
    }

    /// The raw hash.
    #[must_use]
    pub const fn into_inner(self) -> u64 {
        self.0
    }
}

/// The parts of a rule that affect its tile.
struct TileKey<'a> {
    rule: &'a Rule,
    inks: &'a InkSet,
}

impl Hash for TileKey<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let Self { rule, inks } = self;
        rule.mode.hash(state);
        match rule.mode {
            RuleMode::Mix => rule.mix.hash(state),
            RuleMode::Pattern => {
                let PatternParams { shape, background, inks: ids, cell, size, stagger, block } =
                    &rule.pattern;
                shape.hash(state);
                background.into_components().hash(state);
                ids.hash(state);
                (cell, size, stagger, block).hash(state);
            }
        }
        for &id in rule.inks() {
            inks.color_of(id).map(|c| c.into_components()).hash(state);
        }
    }
}

/// Rendered tiles, keyed by [`Fingerprint::of_tile`].
#[derive(Debug, Clone, Default)]
pub struct TileCache {
    /// The rendered tiles.
    tiles: HashMap<Fingerprint, Arc<Tile>>,
}

impl TileCache {
    /// Creates an empty [`TileCache`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tile for `rule`, rendering it if it is not cached yet.
    ///
    /// Returns `None` if the rule's inks cannot be resolved.
    pub fn get(&mut self, rule: &Rule, inks: &InkSet) -> Option<Arc<Tile>> {
        let key = Fingerprint::of_tile(rule, inks);
        if let Some(tile) = self.tiles.get(&key) {
            return Some(Arc::clone(tile));
        }

        let tile = Arc::new(tile::synthesize(rule, inks)?);
        tracing::trace!(size = tile.size(), "rendered tile");
        self.tiles.insert(key, Arc::clone(&tile));
        Some(tile)
    }

    /// Returns the tiles of the active rules, parallel to `rules`.
    ///
    /// Tiles no longer used by any rule are evicted.
    pub fn tiles_for(&mut self, rules: &[Option<Rule>], inks: &InkSet) -> Vec<Option<Arc<Tile>>> {
        let tiles = rules
            .iter()
            .map(|rule| {
                let rule = rule.as_ref().filter(|rule| rule.is_active())?;
                self.get(rule, inks)
            })
            .collect::<Vec<_>>();

        self.tiles
            .retain(|_, tile| tiles.iter().flatten().any(|used| Arc::ptr_eq(used, tile)));

        tiles
    }

    /// The number of cached tiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Whether no tile is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Removes every tile.
    pub fn clear(&mut self) {
        self.tiles.clear();
    }
}

/// The render contexts that each keep one mapped image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScaleContext {
    /// The on-screen preview, usually at a reduced scale.
    Preview,
    /// The full resolution image used for export.
    Export,
}

/// A mapped image together with the fingerprint of the inputs that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedBuffer {
    /// The mapped image.
    pub buffer: PixelBuffer,
    /// The fingerprint of the mapping inputs.
    pub fingerprint: Fingerprint,
    /// The factor the source was resampled by before mapping.
    pub scale: f32,
}

/// Holds at most one [`MappedBuffer`] per [`ScaleContext`].
#[derive(Debug, Clone, Default)]
pub struct ResultCache {
    /// The last preview.
    preview: Option<MappedBuffer>,
    /// The last full resolution mapping.
    export: Option<MappedBuffer>,
}

impl ResultCache {
    /// Creates an empty [`ResultCache`].
    #[must_use]
    pub const fn new() -> Self {
        Self { preview: None, export: None }
    }

    fn slot(&self, context: ScaleContext) -> &Option<MappedBuffer> {
        match context {
            ScaleContext::Preview => &self.preview,
            ScaleContext::Export => &self.export,
        }
    }

    fn slot_mut(&mut self, context: ScaleContext) -> &mut Option<MappedBuffer> {
        match context {
            ScaleContext::Preview => &mut self.preview,
            ScaleContext::Export => &mut self.export,
        }
    }

    /// Returns the cached buffer for `context` if it was produced from `fingerprint`.
    #[must_use]
    pub fn get(&self, context: ScaleContext, fingerprint: Fingerprint) -> Option<&MappedBuffer> {
        self.slot(context)
            .as_ref()
            .filter(|mapped| mapped.fingerprint == fingerprint)
    }

    /// Removes and returns the cached buffer for `context` if it was produced from `fingerprint`.
    ///
    /// A buffer with a different fingerprint stays in place.
    pub fn take(&mut self, context: ScaleContext, fingerprint: Fingerprint) -> Option<MappedBuffer> {
        let slot = self.slot_mut(context);
        if slot.as_ref().is_some_and(|mapped| mapped.fingerprint == fingerprint) {
            slot.take()
        } else {
            None
        }
    }

    /// Stores `mapped` for `context`, replacing any previous buffer.
    pub fn insert(&mut self, context: ScaleContext, mapped: MappedBuffer) -> &MappedBuffer {
        self.slot_mut(context).insert(mapped)
    }

    /// Drops every cached buffer.
    pub fn invalidate(&mut self) {
        self.preview = None;
        self.export = None;
    }

    /// Whether no buffer is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.preview.is_none() && self.export.is_none()
    }
}
