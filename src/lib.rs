//! A library for mapping images onto a small, user-chosen set of inks.
//!
//! Colors that none of the inks reproduce can be approximated by interleaving several inks
//! in a repeating tile (a "mix"), or by stamping a repeating shape over a background (a "pattern").
//!
//! # Overview
//! The engine is built from a handful of pure functions that can be used on their own:
//! - [`kmeans::palette`] detects the "original" colors of an image.
//! - [`mix::build_rule`] finds the best 2- or 3-ink mix for a color, falling back
//!   to the nearest single ink when the mix is still too far off.
//! - [`tile::synthesize`] renders the repeating tile for a [`Rule`].
//! - [`pipeline::map_image`] walks the image, dispatching each pixel to a rule tile or to the
//!   nearest ink, with optional Floyd–Steinberg dithering and sharpening.
//!
//! [`Session`] ties these together: it owns the palette, inks, rules and settings,
//! and memoizes mapped images and tiles.
//!
//! ```
//! # use inkmix::{PixelBuffer, Session};
//! # use palette::{Srgb, Srgba};
//! # fn main() -> Result<(), inkmix::EngineError> {
//! let image = PixelBuffer::filled(8, 8, Srgba::new(200, 100, 50, 255));
//!
//! let mut session = Session::new();
//! session.set_source(image);
//! session.extract_palette(2)?;
//! session.add_ink(Srgb::new(255, 0, 0));
//! session.add_ink(Srgb::new(255, 255, 0));
//! session.generate_rules();
//!
//! let mapped = session.map_full()?;
//! assert_eq!(mapped.dimensions(), (8, 8));
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//! - `threads`: exposes parallel versions of the palette extractor and the mapping pass via [`rayon`].
//! - `image`: enables conversions between [`PixelBuffer`] and [`image::RgbaImage`].
//! - `serde`: derives `Serialize`/`Deserialize` for [`Project`] snapshots and ink kits.

#![deny(unsafe_code, unsafe_op_in_unsafe_fn)]
#![warn(
    clippy::pedantic,
    clippy::cargo,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used,
    clippy::unwrap_in_result,
    clippy::expect_used,
    clippy::unneeded_field_pattern,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::unnecessary_self_imports,
    clippy::str_to_string,
    clippy::string_to_string,
    clippy::string_slice,
    missing_docs,
    rustdoc::all,
    clippy::float_cmp_const,
    clippy::lossy_float_literal
)]
#![allow(
    clippy::doc_markdown,
    clippy::module_name_repetitions,
    clippy::many_single_char_names,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::unreadable_literal,
    clippy::wildcard_imports
)]

mod cache;
mod error;
mod nearest;
mod session;
mod types;

pub mod color;
pub mod kmeans;
pub mod mix;
pub mod pipeline;
pub mod scale;
pub mod tile;

pub use cache::*;
pub use error::EngineError;
pub use mix::{MaxInks, MixOptions, MixParams, PatternParams, Rule, RuleMode};
pub use pipeline::{MapOptions, Mapper, Progress, Sharpen};
pub use scale::BackgroundMode;
pub use session::*;
pub use tile::{MixPattern, Shape, Tile};
pub use types::*;

/// Pixels with an alpha below this value are treated as fully transparent.
pub const ALPHA_THRESHOLD: u8 = 10;

/// The maximum number of colors [`kmeans::palette`] will detect.
pub const MAX_COLORS: u8 = 16;

/// The minimum number of colors [`kmeans::palette`] will detect.
pub const MIN_COLORS: u8 = 2;
