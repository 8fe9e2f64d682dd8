//! The editing context that owns a source image, its palette, the inks and the rules.

use crate::{
    color::{self, Weights},
    kmeans::{self, KmeansOptions},
    mix::{self, MixOptions, Rule},
    pipeline::{Mapper, Progress, DEFAULT_SNAP_EPSILON},
    scale::{self, BackgroundMode, EXPORT_TILE},
    EngineError, Fingerprint, Ink, InkId, InkSet, MapOptions, MappedBuffer, Palette, PixelBuffer,
    ResultCache, ScaleContext, Sharpen, TileCache, WHITE,
};
use palette::Srgb;
use std::ops::ControlFlow;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The number of palette colors promoted to inks by [`Session::inks_from_palette`]
/// and by an export without any active ink.
pub const MAX_PROMOTED_INKS: usize = 10;

/// The user-facing settings of a [`Session`].
///
/// Every field that affects mapping is part of the mapping fingerprint,
/// so settings can be changed freely through [`Session::settings_mut`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Settings {
    /// The weights of the Lab distance, used for mapping and for mixing.
    pub weights: Weights,
    /// Whether to apply Floyd–Steinberg dithering.
    pub dither: bool,
    /// The unsharp mask applied after mapping, if any.
    pub sharpen: Option<Sharpen>,
    /// What to do with the alpha channel of mapped images.
    pub background: BackgroundMode,
    /// See [`MapOptions::snap_epsilon`].
    pub snap_epsilon: f32,
    /// Palette extraction options.
    pub kmeans: KmeansOptions,
    /// Defaults for generated mix rules. Its weights are replaced by [`Settings::weights`].
    pub mix: MixOptions,
}

impl Settings {
    /// Creates a new [`Settings`] with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            weights: Weights::new(1.0, 1.0),
            dither: false,
            sharpen: None,
            background: BackgroundMode::Keep,
            snap_epsilon: DEFAULT_SNAP_EPSILON,
            kmeans: KmeansOptions::new(),
            mix: MixOptions::new(),
        }
    }

    /// The options of a mapping pass with these settings.
    #[must_use]
    pub const fn map_options(&self) -> MapOptions {
        MapOptions::new()
            .weights(self.weights)
            .dither(self.dither)
            .sharpen(self.sharpen)
            .snap_epsilon(self.snap_epsilon)
    }

    /// The options used to generate mix rules with these settings.
    #[must_use]
    pub const fn mix_options(&self) -> MixOptions {
        self.mix.weights(self.weights)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

/// One ink of a [`Kit`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KitInk {
    /// The ink color.
    #[cfg_attr(feature = "serde", serde(with = "crate::color::serde_hex"))]
    pub color: Srgb<u8>,
    /// Whether the ink is enabled.
    pub enabled: bool,
}

/// A named, reusable list of inks.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Kit {
    /// The name of the kit.
    pub name: String,
    /// The inks in display order.
    pub inks: Vec<KitInk>,
}

/// A snapshot of everything in a [`Session`] except the source image and the caches.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Project {
    /// The name of the project.
    pub name: String,
    /// The original colors.
    pub palette: Palette,
    /// The inks.
    pub inks: InkSet,
    /// The rules, parallel to `palette`.
    pub rules: Vec<Option<Rule>>,
    /// The settings.
    #[cfg_attr(feature = "serde", serde(default))]
    pub settings: Settings,
}

/// The explicit editing context of the engine.
///
/// A [`Session`] owns the source image, the detected palette, the inks,
/// one optional [`Rule`] per palette color and the [`Settings`].
/// Mapped images and rule tiles are memoized by the fingerprint of their inputs,
/// so repeated calls to [`Session::map_preview`] or [`Session::map_full`]
/// only redo work after something relevant changed.
///
/// # Examples
/// ```
/// # use inkmix::{PixelBuffer, Session};
/// # use palette::{Srgb, Srgba};
/// # fn main() -> Result<(), inkmix::EngineError> {
/// let mut session = Session::new();
/// session.set_source(PixelBuffer::filled(4, 4, Srgba::new(250, 10, 10, 255)));
/// let red = session.add_ink(Srgb::new(255, 0, 0));
/// session.set_ink_hex(red, "#FE0000")?;
///
/// let preview = session.map_preview(0.5)?;
/// assert_eq!(preview.dimensions(), (2, 2));
/// assert_eq!(preview.pixels()[0], Srgba::new(254, 0, 0, 255));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// The image being mapped.
    source: Option<PixelBuffer>,
    /// The original colors.
    palette: Palette,
    /// The available inks.
    inks: InkSet,
    /// One optional rule per palette color.
    rules: Vec<Option<Rule>>,
    /// The user settings.
    settings: Settings,
    /// Rendered rule tiles.
    tiles: TileCache,
    /// The last preview and export.
    results: ResultCache,
}

impl Session {
    /// Creates an empty [`Session`] with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The source image, if any.
    #[must_use]
    pub fn source(&self) -> Option<&PixelBuffer> {
        self.source.as_ref()
    }

    /// Replaces the source image.
    pub fn set_source(&mut self, source: PixelBuffer) {
        let (width, height) = source.dimensions();
        tracing::debug!(width, height, "source set");
        self.source = Some(source);
        self.results.invalidate();
    }

    /// Removes the source image.
    pub fn clear_source(&mut self) {
        self.source = None;
        self.results.invalidate();
    }

    /// The settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The settings, for editing.
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// The original colors.
    #[must_use]
    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Detects up to `k` original colors in the source, replacing the palette and every rule.
    pub fn extract_palette(&mut self, k: u8) -> Result<&Palette, EngineError> {
        let source = self.source.as_ref().ok_or(EngineError::NoSource)?;
        self.settings.kmeans = self.settings.kmeans.k(k);

        #[cfg(feature = "threads")]
        let palette = kmeans::palette_par(source, &self.settings.kmeans);
        #[cfg(not(feature = "threads"))]
        let palette = kmeans::palette(source, &self.settings.kmeans);

        self.rules = vec![None; palette.len()];
        self.palette = palette;
        Ok(&self.palette)
    }

    /// Adds a color to the palette, returning its index.
    ///
    /// If the color is already present, its existing index is returned.
    pub fn add_palette_color(&mut self, color: Srgb<u8>) -> usize {
        if let Some(index) = self.palette.position(color) {
            index
        } else {
            self.palette.push(color);
            self.rules.push(None);
            self.palette.len() - 1
        }
    }

    /// Replaces the palette color at `index`. Its rule is cleared.
    ///
    /// A color already present at another index is rejected and the palette is left as is.
    pub fn set_palette_color(&mut self, index: usize, color: Srgb<u8>) -> Result<(), EngineError> {
        self.palette.set(index, color)?;
        self.rules[index] = None;
        Ok(())
    }

    /// Removes the palette color at `index` together with its rule.
    pub fn remove_palette_color(&mut self, index: usize) -> Result<Srgb<u8>, EngineError> {
        let color = self.palette.remove(index)?;
        self.rules.remove(index);
        Ok(color)
    }

    /// The inks.
    #[must_use]
    pub fn inks(&self) -> &InkSet {
        &self.inks
    }

    /// Adds an enabled ink, returning its id.
    pub fn add_ink(&mut self, color: Srgb<u8>) -> InkId {
        self.inks.add(color)
    }

    /// Sets the color of an ink from a `#RRGGBB` literal.
    ///
    /// A malformed literal is rejected and the ink keeps its previous color.
    pub fn set_ink_hex(&mut self, id: InkId, literal: &str) -> Result<(), EngineError> {
        let color = color::parse_hex(literal)?;
        self.set_ink_color(id, color)
    }

    /// Sets the color of an ink.
    pub fn set_ink_color(&mut self, id: InkId, color: Srgb<u8>) -> Result<(), EngineError> {
        self.inks.get_mut(id)?.color = color;
        Ok(())
    }

    /// Enables or disables an ink.
    pub fn set_ink_enabled(&mut self, id: InkId, enabled: bool) -> Result<(), EngineError> {
        self.inks.get_mut(id)?.enabled = enabled;
        Ok(())
    }

    /// Removes an ink. Rules that use it fall back to the nearest ink when mapping.
    pub fn remove_ink(&mut self, id: InkId) -> Result<Ink, EngineError> {
        self.inks.remove(id)
    }

    /// Sets whether white may be used as an ink.
    pub fn set_allow_white(&mut self, allow_white: bool) {
        self.inks.set_allow_white(allow_white);
    }

    /// Replaces the inks with the first [`MAX_PROMOTED_INKS`] palette colors,
    /// followed by white if it is allowed.
    pub fn inks_from_palette(&mut self) {
        self.inks.clear();
        for &color in self.palette.iter().take(MAX_PROMOTED_INKS) {
            self.inks.add(color);
        }
        if self.inks.allow_white() && !self.palette.iter().take(MAX_PROMOTED_INKS).any(|&c| c == WHITE)
        {
            self.inks.add(WHITE);
        }
    }

    /// The inks as a [`Kit`] named `name`.
    #[must_use]
    pub fn kit(&self, name: impl Into<String>) -> Kit {
        Kit {
            name: name.into(),
            inks: self
                .inks
                .inks()
                .iter()
                .map(|ink| KitInk { color: ink.color, enabled: ink.enabled })
                .collect(),
        }
    }

    /// Replaces the inks with those of `kit`.
    ///
    /// The new inks get fresh ids, so existing rules no longer resolve.
    pub fn replace_inks(&mut self, kit: &Kit) {
        self.inks.clear();
        for ink in &kit.inks {
            let id = self.inks.add(ink.color);
            if let Ok(added) = self.inks.get_mut(id) {
                added.enabled = ink.enabled;
            }
        }
        tracing::debug!(kit = %kit.name, inks = kit.inks.len(), "loaded kit");
    }

    /// The rules, parallel to the palette.
    #[must_use]
    pub fn rules(&self) -> &[Option<Rule>] {
        &self.rules
    }

    /// The rule of the palette color at `index`, if any.
    #[must_use]
    pub fn rule(&self, index: usize) -> Option<&Rule> {
        self.rules.get(index).and_then(Option::as_ref)
    }

    /// Sets the rule of the palette color at `index`.
    pub fn set_rule(&mut self, index: usize, rule: Rule) -> Result<(), EngineError> {
        let slot = self.rules.get_mut(index).ok_or(EngineError::PaletteIndex(index))?;
        *slot = Some(rule);
        Ok(())
    }

    /// Removes the rule of the palette color at `index`.
    pub fn clear_rule(&mut self, index: usize) -> Result<Option<Rule>, EngineError> {
        let slot = self.rules.get_mut(index).ok_or(EngineError::PaletteIndex(index))?;
        Ok(slot.take())
    }

    /// Replaces every rule with an automatically generated mix.
    ///
    /// Palette colors that are themselves active inks get no rule.
    pub fn generate_rules(&mut self) {
        self.rules = mix::auto_rules(&self.palette, &self.inks.active(), &self.settings.mix_options());
    }

    /// A snapshot of the palette, inks, rules and settings.
    #[must_use]
    pub fn project(&self, name: impl Into<String>) -> Project {
        Project {
            name: name.into(),
            palette: self.palette.clone(),
            inks: self.inks.clone(),
            rules: self.rules.clone(),
            settings: self.settings,
        }
    }

    /// Restores a snapshot taken with [`Session::project`]. The source image is kept.
    pub fn load_project(&mut self, project: Project) {
        let Project { name, palette, inks, mut rules, settings } = project;
        rules.resize(palette.len(), None);

        self.palette = palette;
        self.inks = inks;
        self.rules = rules;
        self.settings = settings;
        self.tiles.clear();
        self.results.invalidate();

        tracing::debug!(project = %name, colors = self.palette.len(), "loaded project");
    }

    /// The fingerprint of a mapping at the given `scale` with the current state.
    #[must_use]
    pub fn fingerprint(&self, scale: f32) -> Fingerprint {
        Fingerprint::of_mapping(
            &self.palette,
            &self.inks,
            &self.rules,
            &self.settings.map_options(),
            self.settings.background,
            scale,
        )
    }

    /// Maps the source resampled by `scale`, reusing the last preview if nothing changed.
    pub fn map_preview(&mut self, scale: f32) -> Result<&PixelBuffer, EngineError> {
        self.render(ScaleContext::Preview, scale, |_| ControlFlow::Continue(()))
    }

    /// Maps the source at full resolution, reusing the last export if nothing changed.
    ///
    /// If no ink is active, the first [`MAX_PROMOTED_INKS`] palette colors become the inks.
    pub fn map_full(&mut self) -> Result<&PixelBuffer, EngineError> {
        self.map_full_with_progress(|_| ControlFlow::Continue(()))
    }

    /// Like [`Session::map_full`], reporting progress through `progress`.
    pub fn map_full_with_progress(
        &mut self,
        progress: impl FnMut(Progress) -> ControlFlow<()>,
    ) -> Result<&PixelBuffer, EngineError> {
        if self.source.is_none() {
            return Err(EngineError::NoSource);
        }
        if self.inks.active().is_empty() {
            tracing::debug!("no active inks, promoting palette colors");
            self.inks_from_palette();
        }

        self.render(ScaleContext::Export, 1.0, progress)
    }

    /// Maps the source at full resolution and upscales it by `desired_scale`,
    /// clamped with [`scale::clamp_export_scale`].
    ///
    /// `progress` is called during mapping and again during upscaling.
    pub fn export(
        &mut self,
        desired_scale: f32,
        mut progress: impl FnMut(Progress) -> ControlFlow<()>,
    ) -> Result<PixelBuffer, EngineError> {
        let mapped = self.map_full_with_progress(&mut progress)?;
        let (width, height) = mapped.dimensions();
        let factor = scale::clamp_export_scale(width, height, desired_scale);

        if f64::from(factor) < f64::from(desired_scale).floor() {
            tracing::debug!(desired_scale, factor, "export scale clamped");
        }

        if factor == 1 {
            Ok(mapped.clone())
        } else {
            scale::upscale_tiled(mapped, factor, EXPORT_TILE, progress)
        }
    }

    /// Returns the cached buffer for `context` or maps the source anew.
    fn render(
        &mut self,
        context: ScaleContext,
        scale: f32,
        progress: impl FnMut(Progress) -> ControlFlow<()>,
    ) -> Result<&PixelBuffer, EngineError> {
        let source = self.source.as_ref().ok_or(EngineError::NoSource)?;
        let fingerprint = self.fingerprint(scale);

        let mapped = if let Some(cached) = self.results.take(context, fingerprint) {
            tracing::trace!(?context, "reusing mapped image");
            cached
        } else {
            let options = self.settings.map_options();
            let tiles = self.tiles.tiles_for(&self.rules, &self.inks);
            let mapper = Mapper::with_tiles(&self.palette, &self.inks, tiles, &options)?;

            let mut buffer = if context == ScaleContext::Preview {
                mapper.map(&scale::scale_nearest(source, scale), progress)?
            } else {
                mapper.map(source, progress)?
            };
            self.settings.background.apply(&mut buffer);

            MappedBuffer { buffer, fingerprint, scale }
        };

        Ok(&self.results.insert(context, mapped).buffer)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{tests::*, MixParams, MixPattern};
    use palette::Srgba;

    const RED: Srgb<u8> = Srgb::new(255, 0, 0);
    const BLUE: Srgb<u8> = Srgb::new(0, 0, 255);
    const YELLOW: Srgb<u8> = Srgb::new(255, 255, 0);

    fn split_session() -> Session {
        let mut session = Session::new();
        session.set_source(split_image(8, 4, RED, BLUE));
        session
    }

    #[test]
    fn mapping_requires_a_source() {
        let mut session = Session::new();
        session.add_ink(RED);
        assert_eq!(session.map_full().unwrap_err(), EngineError::NoSource);
        assert_eq!(session.map_preview(0.5).unwrap_err(), EngineError::NoSource);
        assert_eq!(session.extract_palette(2).unwrap_err(), EngineError::NoSource);

        session.set_source(PixelBuffer::filled(2, 2, opaque(RED)));
        assert!(session.map_full().is_ok());
        session.clear_source();
        assert_eq!(session.map_full().unwrap_err(), EngineError::NoSource);
    }

    #[test]
    fn empty_palette_and_inks() {
        let mut session = split_session();
        assert_eq!(session.map_full().unwrap_err(), EngineError::EmptyInkSet);
    }

    #[test]
    fn extract_palette_resets_rules() {
        let mut session = split_session();
        session.add_palette_color(YELLOW);
        session.set_rule(0, Rule::mix(MixParams::default())).unwrap();

        let palette = session.extract_palette(2).unwrap();
        assert_eq!(palette.len(), 2);
        assert!(palette.contains(&RED));
        assert!(palette.contains(&BLUE));
        assert_eq!(session.rules().len(), 2);
        assert!(session.rules().iter().all(Option::is_none));
        assert_eq!(session.settings().kmeans.get_k(), 2);
    }

    #[test]
    fn palette_edits_keep_rules_parallel() {
        let mut session = Session::new();
        assert_eq!(session.add_palette_color(RED), 0);
        assert_eq!(session.add_palette_color(BLUE), 1);
        assert_eq!(session.add_palette_color(RED), 0);
        assert_eq!(session.rules().len(), 2);

        let rule = Rule::mix(MixParams { percents: vec![100], ..MixParams::default() });
        session.set_rule(1, rule.clone()).unwrap();
        assert_eq!(session.remove_palette_color(0), Ok(RED));
        assert_eq!(session.rule(0), Some(&rule));

        session.set_palette_color(0, YELLOW).unwrap();
        assert_eq!(session.palette().colors(), [YELLOW]);
        assert_eq!(session.rule(0), None);

        assert_eq!(session.set_rule(3, rule), Err(EngineError::PaletteIndex(3)));
        assert_eq!(session.remove_palette_color(3), Err(EngineError::PaletteIndex(3)));
        assert_eq!(session.clear_rule(0), Ok(None));
    }

    #[test]
    fn palette_color_cannot_duplicate_another() {
        let mut session = Session::new();
        session.add_palette_color(RED);
        session.add_palette_color(BLUE);
        let rule = Rule::mix(MixParams { percents: vec![100], ..MixParams::default() });
        session.set_rule(1, rule.clone()).unwrap();

        assert_eq!(session.set_palette_color(1, RED), Err(EngineError::DuplicatePaletteColor(0)));
        assert_eq!(session.palette().colors(), [RED, BLUE]);
        assert_eq!(session.rule(1), Some(&rule));

        session.set_palette_color(1, BLUE).unwrap();
        assert_eq!(session.palette().colors(), [RED, BLUE]);
    }

    #[test]
    fn ink_edits() {
        let mut session = Session::new();
        let id = session.add_ink(RED);

        assert!(matches!(
            session.set_ink_hex(id, "#12345"),
            Err(EngineError::InvalidColorLiteral(_))
        ));
        assert_eq!(session.inks().color_of(id), Some(RED));

        session.set_ink_hex(id, "00ff00").unwrap();
        assert_eq!(session.inks().color_of(id), Some(Srgb::new(0, 255, 0)));

        session.set_ink_enabled(id, false).unwrap();
        assert!(session.inks().active().is_empty());

        session.remove_ink(id).unwrap();
        assert_eq!(session.set_ink_color(id, BLUE), Err(EngineError::UnknownInk(id)));
    }

    #[test]
    fn inks_from_palette_takes_the_first_ten() {
        let mut session = Session::new();
        for i in 0..12 {
            session.add_palette_color(Srgb::new(i * 10, 0, 0));
        }

        session.inks_from_palette();
        assert_eq!(session.inks().len(), MAX_PROMOTED_INKS);
        assert_eq!(session.inks().inks()[9].color, Srgb::new(90, 0, 0));

        session.set_allow_white(true);
        session.inks_from_palette();
        assert_eq!(session.inks().len(), MAX_PROMOTED_INKS + 1);
        assert_eq!(session.inks().inks()[10].color, WHITE);
    }

    #[test]
    fn export_promotes_palette_colors() {
        let mut session = split_session();
        session.add_palette_color(RED);
        session.add_palette_color(BLUE);

        let source = session.source().unwrap().clone();
        assert_eq!(session.map_full().unwrap(), &source);
        assert_eq!(session.inks().len(), 2);
    }

    #[test]
    fn preview_is_scaled_and_cached() {
        let mut session = split_session();
        session.add_ink(RED);
        let blue = session.add_ink(BLUE);

        let first = session.map_preview(0.5).unwrap();
        assert_eq!(first.dimensions(), (4, 2));
        let first = first.pixels().as_ptr();

        let second = session.map_preview(0.5).unwrap().pixels().as_ptr();
        assert_eq!(first, second);

        let before = session.fingerprint(0.5);
        session.set_ink_color(blue, Srgb::new(0, 0, 250)).unwrap();
        assert_ne!(before, session.fingerprint(0.5));
        let changed = session.map_preview(0.5).unwrap();
        assert_eq!(changed.get(3, 0), Some(Srgba::new(0, 0, 250, 255)));
    }

    #[test]
    fn preview_and_export_are_cached_separately() {
        let mut session = split_session();
        session.add_ink(RED);
        session.add_ink(BLUE);

        assert_eq!(session.map_preview(0.5).unwrap().dimensions(), (4, 2));
        assert_eq!(session.map_full().unwrap().dimensions(), (8, 4));
        assert_eq!(session.map_preview(0.5).unwrap().dimensions(), (4, 2));
    }

    #[test]
    fn background_is_applied() {
        let mut session = Session::new();
        let pixels = vec![opaque(RED), Srgba::new(0, 0, 0, 0)];
        session.set_source(PixelBuffer::new(2, 1, pixels).unwrap());
        session.add_ink(RED);

        assert_eq!(session.map_full().unwrap().pixels()[1], Srgba::new(0, 0, 0, 0));

        session.settings_mut().background = BackgroundMode::White;
        assert_eq!(session.map_full().unwrap().pixels()[1], Srgba::new(255, 255, 255, 255));
    }

    #[test]
    fn generated_rules_render_inks_only() {
        let purple = color::from_linear(color::mix_linear(
            &[color::to_linear(RED), color::to_linear(BLUE)],
            &[0.5, 0.5],
        ));

        // one full 6x6 block of 3x3 cells
        let mut session = Session::new();
        session.set_source(PixelBuffer::filled(18, 18, opaque(purple)));
        session.add_palette_color(purple);
        session.add_ink(RED);
        session.add_ink(BLUE);

        session.generate_rules();
        let rule = session.rule(0).unwrap();
        assert_eq!(rule.mix.percents, [50, 50]);

        let mapped = session.map_full().unwrap();
        assert!(mapped.pixels().iter().all(|p| p.color == RED || p.color == BLUE));
        assert!(mapped.pixels().iter().any(|p| p.color == RED));
        assert!(mapped.pixels().iter().any(|p| p.color == BLUE));
    }

    #[test]
    fn out_of_gamut_rules_use_one_ink() {
        let mut session = Session::new();
        session.add_palette_color(Srgb::new(128, 64, 32));
        let red = session.add_ink(RED);
        session.add_ink(YELLOW);

        session.generate_rules();
        let rule = session.rule(0).unwrap();
        assert_eq!(rule.mix.inks, [red]);
        assert_eq!(rule.mix.percents, [100]);
    }

    #[test]
    fn rule_changes_invalidate() {
        let mut session = Session::new();
        session.set_source(PixelBuffer::filled(4, 4, opaque(Srgb::new(120, 0, 120))));
        session.add_palette_color(Srgb::new(120, 0, 120));
        let red = session.add_ink(RED);
        let blue = session.add_ink(BLUE);

        let plain = session.map_full().unwrap().clone();
        session
            .set_rule(
                0,
                Rule::mix(MixParams {
                    inks: vec![red, blue],
                    percents: vec![50, 50],
                    block: 2,
                    cell: 1,
                    pattern: MixPattern::Checker,
                }),
            )
            .unwrap();

        let mixed = session.map_full().unwrap();
        assert_ne!(&plain, mixed);
        assert_eq!(mixed.get(0, 0).unwrap().color, RED);
        assert_eq!(mixed.get(1, 0).unwrap().color, BLUE);
    }

    #[test]
    fn export_upscales() {
        let mut session = split_session();
        session.add_ink(RED);
        session.add_ink(BLUE);

        let export = session.export(2.0, |_| ControlFlow::Continue(())).unwrap();
        assert_eq!(export.dimensions(), (16, 8));
        assert_eq!(export.get(7, 0).unwrap().color, RED);
        assert_eq!(export.get(8, 0).unwrap().color, BLUE);

        let cancelled = session.export(2.0, |_| ControlFlow::Break(()));
        assert_eq!(cancelled, Err(EngineError::Cancelled));
    }

    #[test]
    fn kits_replace_inks() {
        let mut session = Session::new();
        let old = session.add_ink(RED);
        let blue = session.add_ink(BLUE);
        session.set_ink_enabled(blue, false).unwrap();

        let kit = session.kit("basic");
        assert_eq!(kit.inks, [
            KitInk { color: RED, enabled: true },
            KitInk { color: BLUE, enabled: false },
        ]);

        session.replace_inks(&kit);
        assert_eq!(session.inks().len(), 2);
        assert!(session.inks().get(old).is_none());
        assert_eq!(session.inks().active().len(), 1);
    }

    #[test]
    fn projects_restore_state() {
        let mut session = split_session();
        session.add_palette_color(RED);
        session.add_palette_color(BLUE);
        session.add_ink(RED);
        session.add_ink(YELLOW);
        session.generate_rules();
        session.settings_mut().dither = true;

        let project = session.project("split");
        let mut restored = Session::new();
        restored.load_project(project.clone());

        assert_eq!(restored.palette(), session.palette());
        assert_eq!(restored.rules(), session.rules());
        assert_eq!(restored.inks(), session.inks());
        assert!(restored.settings().dither);
        assert_eq!(restored.project("split"), project);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn project_json() {
        let mut session = Session::new();
        session.add_palette_color(Srgb::new(128, 64, 32));
        session.add_ink(RED);
        session.add_ink(YELLOW);
        session.generate_rules();

        let project = session.project("json");
        let json = serde_json::to_string(&project).unwrap();
        assert!(json.contains("\"#804020\""));
        assert!(json.contains("\"#FFFF00\""));

        let parsed: Project = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, project);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn kit_json() {
        let kit: Kit = serde_json::from_str(
            r##"{ "name": "cups", "inks": [{ "color": "#ff0000", "enabled": true }] }"##,
        )
        .unwrap();
        assert_eq!(kit.inks, [KitInk { color: RED, enabled: true }]);

        let bad = serde_json::from_str::<Kit>(
            r##"{ "name": "cups", "inks": [{ "color": "#ff00", "enabled": true }] }"##,
        );
        assert!(bad.is_err());
    }
}
