//! Contains the buffer, palette and ink types shared across the crate.

use crate::{EngineError, ALPHA_THRESHOLD};
use palette::{
    cast::{ComponentsAs, IntoComponents},
    Srgb, Srgba,
};
use std::{
    fmt::{self, Display},
    ops::Deref,
};
#[cfg(feature = "image")]
use image::RgbaImage;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An RGBA image with 8 bits per channel, stored row-major.
///
/// This is the engine's exchange format: sources are handed in as a [`PixelBuffer`]
/// and every mapping pass produces a new one with the same dimensions.
///
/// # Examples
/// ```
/// # use inkmix::PixelBuffer;
/// # fn main() -> Result<(), inkmix::EngineError> {
/// let bytes = [255, 0, 0, 255, 0, 0, 255, 255];
/// let buffer = PixelBuffer::from_rgba_bytes(2, 1, &bytes)?;
/// assert_eq!(buffer.dimensions(), (2, 1));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    /// The width of the image.
    width: u32,
    /// The height of the image.
    height: u32,
    /// `width * height` pixels.
    pixels: Vec<Srgba<u8>>,
}

impl PixelBuffer {
    /// Creates a new [`PixelBuffer`], checking that `pixels` holds exactly `width * height` pixels.
    pub fn new(width: u32, height: u32, pixels: Vec<Srgba<u8>>) -> Result<Self, EngineError> {
        let expected = width as usize * height as usize;
        if pixels.len() == expected {
            Ok(Self { width, height, pixels })
        } else {
            Err(EngineError::DimensionMismatch { expected, actual: pixels.len() })
        }
    }

    /// Creates a new [`PixelBuffer`] from interleaved RGBA bytes.
    pub fn from_rgba_bytes(width: u32, height: u32, bytes: &[u8]) -> Result<Self, EngineError> {
        let expected = width as usize * height as usize;
        if bytes.len() != expected * 4 {
            return Err(EngineError::DimensionMismatch { expected, actual: bytes.len() / 4 });
        }

        let pixels: &[Srgba<u8>] = bytes.components_as();
        Ok(Self { width, height, pixels: pixels.to_vec() })
    }

    /// Creates a [`PixelBuffer`] where every pixel is `color`.
    #[must_use]
    pub fn filled(width: u32, height: u32, color: Srgba<u8>) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; width as usize * height as usize],
        }
    }

    /// The width of the image in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// The height of the image in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// The `(width, height)` of the image.
    #[must_use]
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Whether the image has no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// The pixels in row-major order.
    #[must_use]
    pub fn pixels(&self) -> &[Srgba<u8>] {
        &self.pixels
    }

    /// The pixels in row-major order.
    pub fn pixels_mut(&mut self) -> &mut [Srgba<u8>] {
        &mut self.pixels
    }

    /// Returns the pixel at `(x, y)`, or `None` if out of bounds.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<Srgba<u8>> {
        if x < self.width && y < self.height {
            Some(self.pixels[y as usize * self.width as usize + x as usize])
        } else {
            None
        }
    }

    /// Consumes the buffer, returning its pixels.
    #[must_use]
    pub fn into_pixels(self) -> Vec<Srgba<u8>> {
        self.pixels
    }

    /// Consumes the buffer, returning interleaved RGBA bytes.
    #[must_use]
    pub fn into_rgba_bytes(self) -> Vec<u8> {
        self.pixels.into_components()
    }

    /// Composites every pixel over an opaque `background`, leaving a fully opaque image.
    ///
    /// Pixels below the transparency threshold become `background` outright.
    pub fn flatten_onto(&mut self, background: Srgb<u8>) {
        let bg = background.into_components();
        for pixel in &mut self.pixels {
            let alpha = u32::from(pixel.alpha);
            let fg = pixel.color.into_components();
            let blend = |f: u8, b: u8| {
                #[allow(clippy::cast_possible_truncation)]
                {
                    ((u32::from(f) * alpha + u32::from(b) * (255 - alpha) + 127) / 255) as u8
                }
            };

            *pixel = if pixel.alpha < ALPHA_THRESHOLD {
                Srgba::new(bg.0, bg.1, bg.2, 255)
            } else {
                Srgba::new(blend(fg.0, bg.0), blend(fg.1, bg.1), blend(fg.2, bg.2), 255)
            };
        }
    }
}

#[cfg(feature = "image")]
impl TryFrom<&RgbaImage> for PixelBuffer {
    type Error = EngineError;

    fn try_from(image: &RgbaImage) -> Result<Self, Self::Error> {
        Self::from_rgba_bytes(image.width(), image.height(), image.as_raw())
    }
}

#[cfg(feature = "image")]
impl PixelBuffer {
    /// Converts the buffer into an [`RgbaImage`].
    #[must_use]
    pub fn into_rgbaimage(self) -> RgbaImage {
        let (width, height) = self.dimensions();

        #[allow(clippy::expect_used)]
        {
            // the buffer always holds width * height pixels
            RgbaImage::from_vec(width, height, self.into_rgba_bytes()).expect("large enough buffer")
        }
    }
}

/// The "original" colors of an image, usually detected by [`kmeans::palette`](crate::kmeans::palette).
///
/// Colors keep their insertion order and are unique: pushing a color that is already present is a no-op.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Palette(#[cfg_attr(feature = "serde", serde(with = "crate::color::serde_hex_list"))] Vec<Srgb<u8>>);

impl Palette {
    /// Creates an empty [`Palette`].
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Creates a [`Palette`] from the given colors, dropping duplicates but otherwise keeping their order.
    #[must_use]
    pub fn from_colors(colors: impl IntoIterator<Item = Srgb<u8>>) -> Self {
        let mut palette = Self::new();
        for color in colors {
            palette.push(color);
        }
        palette
    }

    /// Appends `color` unless it is already present.
    ///
    /// Returns whether the color was added.
    pub fn push(&mut self, color: Srgb<u8>) -> bool {
        if self.position(color).is_some() {
            false
        } else {
            self.0.push(color);
            true
        }
    }

    /// Replaces the color at `index`.
    ///
    /// Fails without changing anything if `color` is already present at another index.
    pub fn set(&mut self, index: usize, color: Srgb<u8>) -> Result<(), EngineError> {
        if index >= self.0.len() {
            return Err(EngineError::PaletteIndex(index));
        }
        match self.position(color) {
            Some(other) if other != index => Err(EngineError::DuplicatePaletteColor(other)),
            _ => {
                self.0[index] = color;
                Ok(())
            }
        }
    }

    /// Removes and returns the color at `index`.
    pub fn remove(&mut self, index: usize) -> Result<Srgb<u8>, EngineError> {
        if index < self.0.len() {
            Ok(self.0.remove(index))
        } else {
            Err(EngineError::PaletteIndex(index))
        }
    }

    /// Returns the index of `color` if it is in the palette.
    #[must_use]
    pub fn position(&self, color: Srgb<u8>) -> Option<usize> {
        self.0.iter().position(|&c| c == color)
    }

    /// The colors as a slice.
    #[must_use]
    pub fn colors(&self) -> &[Srgb<u8>] {
        &self.0
    }

    /// Consumes the palette, returning its colors.
    #[must_use]
    pub fn into_inner(self) -> Vec<Srgb<u8>> {
        self.0
    }
}

impl Deref for Palette {
    type Target = [Srgb<u8>];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Palette> for Vec<Srgb<u8>> {
    fn from(palette: Palette) -> Self {
        palette.into_inner()
    }
}

/// A stable identifier for an [`Ink`] inside an [`InkSet`].
///
/// Rules store these instead of colors,
/// so that editing an ink is immediately visible to every rule that uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct InkId(u32);

impl InkId {
    /// The synthetic white ink added to the active set when white backgrounds are allowed.
    pub const WHITE: Self = Self(u32::MAX);

    /// The raw id.
    #[must_use]
    pub const fn into_inner(self) -> u32 {
        self.0
    }
}

impl Display for InkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::WHITE {
            write!(f, "ink#white")
        } else {
            write!(f, "ink#{}", self.0)
        }
    }
}

/// An available output color.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Ink {
    /// The id of the ink within its [`InkSet`].
    pub id: InkId,
    /// The ink color.
    #[cfg_attr(feature = "serde", serde(with = "crate::color::serde_hex"))]
    pub color: Srgb<u8>,
    /// Whether the ink takes part in mapping and mixing.
    pub enabled: bool,
}

/// Pure white, the color of the synthetic background ink.
pub const WHITE: Srgb<u8> = Srgb::new(255, 255, 255);

/// The user's inks together with the "allow background white" option.
///
/// # Examples
/// ```
/// # use inkmix::InkSet;
/// # use palette::Srgb;
/// let mut inks = InkSet::new();
/// let red = inks.add(Srgb::new(255, 0, 0));
/// inks.set_allow_white(true);
///
/// let active = inks.active();
/// assert_eq!(active.len(), 2);
/// assert_eq!(active[0].id, red);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InkSet {
    /// The inks in display order.
    inks: Vec<Ink>,
    /// The id handed out by the next call to `add`.
    next_id: u32,
    /// Whether a white ink is appended to the active set.
    allow_white: bool,
}

impl InkSet {
    /// Creates an empty [`InkSet`].
    #[must_use]
    pub const fn new() -> Self {
        Self { inks: Vec::new(), next_id: 0, allow_white: false }
    }

    /// Creates an [`InkSet`] with one enabled ink per color.
    #[must_use]
    pub fn from_colors(colors: impl IntoIterator<Item = Srgb<u8>>) -> Self {
        let mut inks = Self::new();
        for color in colors {
            inks.add(color);
        }
        inks
    }

    /// Adds an enabled ink, returning its id.
    pub fn add(&mut self, color: Srgb<u8>) -> InkId {
        let id = InkId(self.next_id);
        self.next_id += 1;
        self.inks.push(Ink { id, color, enabled: true });
        id
    }

    /// Removes the ink with the given id.
    pub fn remove(&mut self, id: InkId) -> Result<Ink, EngineError> {
        let index = self
            .inks
            .iter()
            .position(|ink| ink.id == id)
            .ok_or(EngineError::UnknownInk(id))?;

        Ok(self.inks.remove(index))
    }

    /// Removes every ink. Ids are never reused.
    pub fn clear(&mut self) {
        self.inks.clear();
    }

    /// Returns the ink with the given id.
    #[must_use]
    pub fn get(&self, id: InkId) -> Option<&Ink> {
        self.inks.iter().find(|ink| ink.id == id)
    }

    /// Returns the ink with the given id.
    pub fn get_mut(&mut self, id: InkId) -> Result<&mut Ink, EngineError> {
        self.inks
            .iter_mut()
            .find(|ink| ink.id == id)
            .ok_or(EngineError::UnknownInk(id))
    }

    /// Resolves an ink reference to its current color, whether or not the ink is enabled.
    #[must_use]
    pub fn color_of(&self, id: InkId) -> Option<Srgb<u8>> {
        if id == InkId::WHITE {
            Some(WHITE)
        } else {
            self.get(id).map(|ink| ink.color)
        }
    }

    /// All inks, enabled or not.
    #[must_use]
    pub fn inks(&self) -> &[Ink] {
        &self.inks
    }

    /// The number of inks, not counting the synthetic white ink.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inks.len()
    }

    /// Whether there are no inks, not counting the synthetic white ink.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inks.is_empty()
    }

    /// Whether the synthetic white ink is part of the active set.
    #[must_use]
    pub const fn allow_white(&self) -> bool {
        self.allow_white
    }

    /// Sets whether the synthetic white ink is part of the active set.
    pub fn set_allow_white(&mut self, allow_white: bool) {
        self.allow_white = allow_white;
    }

    /// The inks used for searching: the enabled inks,
    /// followed by the synthetic white ink if allowed and no enabled ink is already white.
    #[must_use]
    pub fn active(&self) -> Vec<Ink> {
        let mut active = self
            .inks
            .iter()
            .copied()
            .filter(|ink| ink.enabled)
            .collect::<Vec<_>>();

        if self.allow_white && !active.iter().any(|ink| ink.color == WHITE) {
            active.push(Ink { id: InkId::WHITE, color: WHITE, enabled: true });
        }

        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_rejects_wrong_length() {
        let err = PixelBuffer::from_rgba_bytes(2, 2, &[0; 12]).unwrap_err();
        assert_eq!(err, EngineError::DimensionMismatch { expected: 4, actual: 3 });

        let err = PixelBuffer::new(1, 2, vec![Srgba::new(0, 0, 0, 0)]).unwrap_err();
        assert_eq!(err, EngineError::DimensionMismatch { expected: 2, actual: 1 });
    }

    #[test]
    fn buffer_bytes_roundtrip_preserves_layout() {
        let bytes = (0..24).collect::<Vec<u8>>();
        let buffer = PixelBuffer::from_rgba_bytes(3, 2, &bytes).unwrap();
        assert_eq!(buffer.get(1, 0), Some(Srgba::new(4, 5, 6, 7)));
        assert_eq!(buffer.get(0, 1), Some(Srgba::new(12, 13, 14, 15)));
        assert_eq!(buffer.get(3, 0), None);
        assert_eq!(buffer.into_rgba_bytes(), bytes);
    }

    #[test]
    fn flatten_composites_over_background() {
        let mut buffer = PixelBuffer::new(
            3,
            1,
            vec![
                Srgba::new(0, 0, 0, 255),
                Srgba::new(0, 0, 0, 0),
                Srgba::new(0, 0, 0, 128),
            ],
        )
        .unwrap();

        buffer.flatten_onto(WHITE);

        assert_eq!(buffer.pixels()[0], Srgba::new(0, 0, 0, 255));
        assert_eq!(buffer.pixels()[1], Srgba::new(255, 255, 255, 255));
        assert_eq!(buffer.pixels()[2], Srgba::new(127, 127, 127, 255));
    }

    #[test]
    fn palette_set_rejects_duplicates() {
        let mut palette = Palette::from_colors([Srgb::new(1, 1, 1), Srgb::new(2, 2, 2)]);
        assert_eq!(palette.set(1, Srgb::new(1, 1, 1)), Err(EngineError::DuplicatePaletteColor(0)));
        assert_eq!(palette.set(2, Srgb::new(3, 3, 3)), Err(EngineError::PaletteIndex(2)));
        assert_eq!(palette.set(1, Srgb::new(2, 2, 2)), Ok(()));
        assert_eq!(palette.set(0, Srgb::new(3, 3, 3)), Ok(()));
        assert_eq!(palette.colors(), [Srgb::new(3, 3, 3), Srgb::new(2, 2, 2)]);
    }

    #[test]
    fn palette_dedups_and_keeps_order() {
        let palette = Palette::from_colors([
            Srgb::new(3, 3, 3),
            Srgb::new(1, 1, 1),
            Srgb::new(3, 3, 3),
            Srgb::new(2, 2, 2),
        ]);
        assert_eq!(
            palette.colors(),
            &[Srgb::new(3, 3, 3), Srgb::new(1, 1, 1), Srgb::new(2, 2, 2)]
        );
        assert_eq!(Palette::new().remove(0), Err(EngineError::PaletteIndex(0)));
    }

    #[test]
    fn active_inks_skip_disabled_and_append_white() {
        let mut inks = InkSet::from_colors([Srgb::new(255, 0, 0), Srgb::new(0, 0, 255)]);
        let blue = inks.inks()[1].id;
        inks.get_mut(blue).unwrap().enabled = false;

        assert_eq!(inks.active().len(), 1);

        inks.set_allow_white(true);
        let active = inks.active();
        assert_eq!(active.len(), 2);
        assert_eq!(active[1].id, InkId::WHITE);

        // a real white ink replaces the synthetic one
        inks.add(WHITE);
        let active = inks.active();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|ink| ink.id != InkId::WHITE));
    }

    #[test]
    fn ids_are_stable_across_removal() {
        let mut inks = InkSet::from_colors([Srgb::new(1, 0, 0), Srgb::new(2, 0, 0)]);
        let first = inks.inks()[0].id;
        let second = inks.inks()[1].id;
        inks.remove(first).unwrap();
        let third = inks.add(Srgb::new(3, 0, 0));

        assert_ne!(third, first);
        assert_eq!(inks.color_of(second), Some(Srgb::new(2, 0, 0)));
        assert_eq!(inks.color_of(first), None);
        assert_eq!(inks.color_of(InkId::WHITE), Some(WHITE));
        assert_eq!(inks.remove(first), Err(EngineError::UnknownInk(first)));
    }
}
