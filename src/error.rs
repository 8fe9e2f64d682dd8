//! The error type shared by the engine's fallible operations.

use crate::InkId;
use thiserror::Error;

/// Errors surfaced to callers of the engine.
///
/// Degenerate inputs that have a sensible fallback (an empty sample set during palette extraction,
/// rounding drift, search ties) are resolved internally and never show up here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Mapping was requested without a source image.
    #[error("no source image")]
    NoSource,

    /// Mapping was requested, but no ink is enabled.
    #[error("the active ink set is empty")]
    EmptyInkSet,

    /// A color literal was not of the form `#RRGGBB`.
    #[error("invalid color literal: {0:?}")]
    InvalidColorLiteral(String),

    /// A pixel buffer did not match its declared dimensions.
    #[error("pixel buffer has {actual} pixels, expected {expected}")]
    DimensionMismatch {
        /// `width * height`.
        expected: usize,
        /// The number of pixels actually supplied.
        actual: usize,
    },

    /// An ink id that does not belong to the session's ink set.
    #[error("unknown ink {0}")]
    UnknownInk(InkId),

    /// A palette index out of bounds.
    #[error("palette index {0} is out of bounds")]
    PaletteIndex(usize),

    /// A palette edit would duplicate the color already at the given index.
    #[error("color is already in the palette at index {0}")]
    DuplicatePaletteColor(usize),

    /// The mapping pass was cancelled through its progress callback.
    #[error("mapping was cancelled")]
    Cancelled,
}
