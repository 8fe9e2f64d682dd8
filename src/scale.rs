//! Resampling for previews and exports, and background handling of mapped images.
//!
//! Everything here is nearest-neighbor: the mapped images are made of flat ink colors,
//! so any interpolation would introduce colors that are not inks.

use crate::{pipeline::Progress, EngineError, PixelBuffer, ALPHA_THRESHOLD, WHITE};
use palette::Srgba;
use std::ops::ControlFlow;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The largest width or height [`clamp_export_scale`] allows.
pub const MAX_DIM: u32 = 16384;

/// The largest area [`clamp_export_scale`] allows.
pub const MAX_PIXELS: u64 = 268_000_000;

/// The default tile size of [`upscale_tiled`], in source pixels.
pub const EXPORT_TILE: u32 = 512;

/// What to do with the background of a mapped image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BackgroundMode {
    /// Leave the alpha channel of the source as is.
    #[default]
    Keep,
    /// Composite over white, producing an opaque image.
    White,
    /// Make every pixel either fully transparent or fully opaque.
    Transparent,
}

impl BackgroundMode {
    /// Applies the mode to `buffer` in place.
    pub fn apply(self, buffer: &mut PixelBuffer) {
        match self {
            Self::Keep => (),
            Self::White => buffer.flatten_onto(WHITE),
            Self::Transparent => {
                for pixel in buffer.pixels_mut() {
                    if pixel.alpha < ALPHA_THRESHOLD {
                        *pixel = Srgba::new(0, 0, 0, 0);
                    } else {
                        pixel.alpha = u8::MAX;
                    }
                }
            }
        }
    }
}

/// The source coordinate sampled for output coordinate `i` when resizing `from` to `to` pixels.
#[inline]
fn source_index(i: u32, from: u32, to: u32) -> usize {
    let s = (2 * u64::from(i) + 1) * u64::from(from) / (2 * u64::from(to));
    #[allow(clippy::cast_possible_truncation)]
    {
        s.min(u64::from(from) - 1) as usize
    }
}

/// Resamples `buffer` by `factor` with nearest-neighbor sampling.
///
/// The output is `round(width * factor)` by `round(height * factor)` pixels,
/// clamped to `1..=MAX_DIM` per axis unless `buffer` is empty.
///
/// # Examples
/// ```
/// # use inkmix::{scale, PixelBuffer};
/// # use palette::Srgba;
/// let buffer = PixelBuffer::filled(10, 4, Srgba::new(1, 2, 3, 255));
/// assert_eq!(scale::scale_nearest(&buffer, 0.5).dimensions(), (5, 2));
/// ```
#[must_use]
pub fn scale_nearest(buffer: &PixelBuffer, factor: f32) -> PixelBuffer {
    let (width, height) = buffer.dimensions();
    if buffer.is_empty() {
        return buffer.clone();
    }

    let scaled = |n: u32| {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        {
            ((n as f32 * factor).round().clamp(1.0, MAX_DIM as f32)) as u32
        }
    };
    let (out_width, out_height) = (scaled(width), scaled(height));
    if (out_width, out_height) == (width, height) {
        return buffer.clone();
    }

    let columns = (0..out_width)
        .map(|x| source_index(x, width, out_width))
        .collect::<Vec<_>>();

    let src = buffer.pixels();
    let mut pixels = Vec::with_capacity(out_width as usize * out_height as usize);
    for y in 0..out_height {
        let row = &src[source_index(y, height, out_height) * width as usize..][..width as usize];
        pixels.extend(columns.iter().map(|&x| row[x]));
    }

    tracing::trace!(width, height, out_width, out_height, "resampled buffer");

    PixelBuffer::new(out_width, out_height, pixels).unwrap_or_else(|_| buffer.clone())
}

/// Clamps an export upscale factor so the output stays within [`MAX_DIM`] per axis
/// and [`MAX_PIXELS`] in area.
///
/// The result is always at least `1`.
///
/// # Examples
/// ```
/// # use inkmix::scale::clamp_export_scale;
/// assert_eq!(clamp_export_scale(100, 100, 4.0), 4);
/// assert_eq!(clamp_export_scale(4000, 100, 8.0), 4);
/// ```
#[must_use]
pub fn clamp_export_scale(width: u32, height: u32, desired: f32) -> u32 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let scale = desired.floor().clamp(1.0, MAX_DIM as f32) as u32;
    clamp_scale(width, height, scale)
}

/// Integer form of [`clamp_export_scale`].
fn clamp_scale(width: u32, height: u32, mut scale: u32) -> u32 {
    scale = scale.clamp(1, MAX_DIM);
    scale = scale.min(MAX_DIM / width.max(1));
    scale = scale.min(MAX_DIM / height.max(1));

    let area = |scale: u32| u64::from(width * scale) * u64::from(height * scale);
    while scale > 1 && area(scale) > MAX_PIXELS {
        scale -= 1;
    }

    scale.max(1)
}

/// Upscales `buffer` by the integer `scale`, copying `tile × tile` source blocks at a time.
///
/// `scale` is clamped the same way as [`clamp_export_scale`].
///
/// `progress` is called after each band of tiles with the number of source rows done.
///
/// # Errors
/// Returns [`EngineError::Cancelled`] if `progress` returns [`ControlFlow::Break`].
pub fn upscale_tiled(
    buffer: &PixelBuffer,
    scale: u32,
    tile: u32,
    mut progress: impl FnMut(Progress) -> ControlFlow<()>,
) -> Result<PixelBuffer, EngineError> {
    let (width, height) = buffer.dimensions();
    let scale = clamp_scale(width, height, scale);
    let tile = tile.max(1);
    let (out_width, out_height) = (width * scale, height * scale);
    let mut output = PixelBuffer::filled(out_width, out_height, Srgba::new(0, 0, 0, 0));

    tracing::debug!(width, height, scale, tile, "upscaling buffer");

    let src = buffer.pixels();
    let dst = output.pixels_mut();
    let (width_usize, out_width_usize, scale_usize) =
        (width as usize, out_width as usize, scale as usize);

    for sy in (0..height).step_by(tile as usize) {
        let band = tile.min(height - sy);
        for sx in (0..width).step_by(tile as usize) {
            let span = tile.min(width - sx) as usize;
            for y in sy..sy + band {
                let row = &src[y as usize * width_usize + sx as usize..][..span];
                let first = (y * scale) as usize * out_width_usize + sx as usize * scale_usize;
                for (i, &pixel) in row.iter().enumerate() {
                    let start = first + i * scale_usize;
                    dst[start..start + scale_usize].fill(pixel);
                }
                for dy in 1..scale_usize {
                    let start = first + dy * out_width_usize;
                    dst.copy_within(first..first + span * scale_usize, start);
                }
            }
        }

        let rows_done = sy + band;
        if progress(Progress { rows_done, rows_total: height }).is_break() {
            tracing::debug!(rows_done, "upscale cancelled");
            return Err(EngineError::Cancelled);
        }
    }

    Ok(output)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::tests::*;

    #[test]
    fn background_modes() {
        let pixels = vec![
            Srgba::new(10, 20, 30, 0),
            Srgba::new(10, 20, 30, 128),
            Srgba::new(10, 20, 30, 255),
        ];
        let buffer = PixelBuffer::new(3, 1, pixels).unwrap();

        let mut keep = buffer.clone();
        BackgroundMode::Keep.apply(&mut keep);
        assert_eq!(keep, buffer);

        let mut white = buffer.clone();
        BackgroundMode::White.apply(&mut white);
        assert_eq!(white.pixels()[0], Srgba::new(255, 255, 255, 255));
        assert_eq!(white.pixels()[1], Srgba::new(132, 137, 142, 255));
        assert_eq!(white.pixels()[2], Srgba::new(10, 20, 30, 255));

        let mut transparent = buffer;
        BackgroundMode::Transparent.apply(&mut transparent);
        assert_eq!(transparent.pixels()[0], Srgba::new(0, 0, 0, 0));
        assert_eq!(transparent.pixels()[1], Srgba::new(10, 20, 30, 255));
        assert_eq!(transparent.pixels()[2], Srgba::new(10, 20, 30, 255));
    }

    #[test]
    fn scale_nearest_dimensions() {
        let buffer = noise_image(10, 6, 1);
        assert_eq!(scale_nearest(&buffer, 1.0), buffer);
        assert_eq!(scale_nearest(&buffer, 0.5).dimensions(), (5, 3));
        assert_eq!(scale_nearest(&buffer, 0.01).dimensions(), (1, 1));
        assert_eq!(scale_nearest(&buffer, 2.0).dimensions(), (20, 12));

        let empty = PixelBuffer::new(0, 0, Vec::new()).unwrap();
        assert!(scale_nearest(&empty, 0.5).is_empty());
    }

    #[test]
    fn scale_nearest_samples() {
        let buffer = noise_image(4, 4, 2);

        let half = scale_nearest(&buffer, 0.5);
        for y in 0..2 {
            for x in 0..2 {
                assert_eq!(half.get(x, y), buffer.get(2 * x + 1, 2 * y + 1));
            }
        }

        let double = scale_nearest(&buffer, 2.0);
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(double.get(x, y), buffer.get(x / 2, y / 2));
            }
        }
    }

    #[test]
    fn export_scale_clamps() {
        assert_eq!(clamp_export_scale(100, 100, 4.0), 4);
        assert_eq!(clamp_export_scale(100, 100, 0.5), 1);
        assert_eq!(clamp_export_scale(100, 100, 4.9), 4);
        assert_eq!(clamp_export_scale(10000, 10, 4.0), 1);
        assert_eq!(clamp_export_scale(20000, 1, 4.0), 1);
        assert_eq!(clamp_export_scale(1000, 1000, 20.0), 16);
        // per-axis allows 2, area does not
        assert_eq!(clamp_export_scale(8192, 8192, 2.0), 1);
    }

    #[test]
    fn upscale_copies_blocks() {
        let buffer = noise_image(5, 3, 3);
        let mut reports = Vec::new();
        let output = upscale_tiled(&buffer, 3, 2, |p| {
            reports.push(p.rows_done);
            ControlFlow::Continue(())
        })
        .unwrap();

        assert_eq!(output.dimensions(), (15, 9));
        for y in 0..9 {
            for x in 0..15 {
                assert_eq!(output.get(x, y), buffer.get(x / 3, y / 3));
            }
        }
        assert_eq!(reports, [2, 3]);
    }

    #[test]
    fn upscale_by_one_is_identity() {
        let buffer = noise_image(7, 5, 4);
        let output = upscale_tiled(&buffer, 1, EXPORT_TILE, |_| ControlFlow::Continue(())).unwrap();
        assert_eq!(output, buffer);
    }

    #[test]
    fn upscale_clamps_its_scale() {
        let buffer = noise_image(1000, 1, 6);
        let output = upscale_tiled(&buffer, u32::MAX, EXPORT_TILE, |_| ControlFlow::Continue(()))
            .unwrap();
        assert_eq!(output.dimensions(), (16_000, 16));
        assert_eq!(output.get(15_999, 15), buffer.get(999, 0));
    }

    #[test]
    fn upscale_cancel() {
        let buffer = noise_image(4, 4, 5);
        let result = upscale_tiled(&buffer, 2, 1, |_| ControlFlow::Break(()));
        assert_eq!(result, Err(EngineError::Cancelled));
    }
}
