//! Color space conversions, hex literals and the weighted perceptual distance.
//!
//! The Lab conversion uses the rounded sRGB/D65 matrix and the `7.787t + 16/116` toe of the
//! classic CIE formulas rather than `palette`'s exact constants, so distances line up with
//! values users have tuned their weights against.

use crate::EngineError;
use palette::{white_point::D65, Clamp, Lab, LinSrgb, Srgb};

/// Lab with a D65 white point, as produced by [`rgb_to_lab`].
pub type Lab65 = Lab<D65, f32>;

/// The D65 reference white used to normalize XYZ.
const WHITE_XYZ: [f32; 3] = [0.95047, 1.0, 1.08883];

/// Linear sRGB to XYZ.
const RGB_TO_XYZ: [[f32; 3]; 3] = [
    [0.4124, 0.3576, 0.1805],
    [0.2126, 0.7152, 0.0722],
    [0.0193, 0.1192, 0.9505],
];

/// XYZ to linear sRGB.
const XYZ_TO_RGB: [[f32; 3]; 3] = [
    [3.2406, -1.5372, -0.4986],
    [-0.9689, 1.8758, 0.0415],
    [0.0557, -0.2040, 1.0570],
];

/// The `t` below which the Lab transfer function is linear.
const LAB_EPSILON: f32 = 0.008856;

/// The slope of the linear part of the Lab transfer function.
const LAB_KAPPA: f32 = 7.787;

/// The weight of the raw `a` and `b` differences in [`lab_distance`].
const AB_WEIGHT: f32 = 0.35;

/// Weights for the lightness and chroma terms of [`lab_distance`].
///
/// Values are typically in `0.0..=2.0`. Both default to `1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Weights {
    /// Multiplies the lightness difference.
    pub lightness: f32,
    /// Multiplies the chroma difference.
    pub chroma: f32,
}

impl Weights {
    /// Creates new [`Weights`].
    #[must_use]
    pub const fn new(lightness: f32, chroma: f32) -> Self {
        Self { lightness, chroma }
    }
}

impl Default for Weights {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

/// Converts an 8-bit sRGB color to linear light.
#[must_use]
pub fn to_linear(color: Srgb<u8>) -> LinSrgb {
    color.into_linear()
}

/// Converts linear light back to 8-bit sRGB, rounding each channel.
#[must_use]
pub fn from_linear(color: LinSrgb) -> Srgb<u8> {
    color.clamp().into_encoding()
}

/// Converts linear light back to sRGB on a `0.0..=255.0` scale without rounding.
#[must_use]
pub fn from_linear_f32(color: LinSrgb) -> [f32; 3] {
    let srgb: Srgb<f32> = color.clamp().into_encoding();
    let (r, g, b) = srgb.into_components();
    [r * 255.0, g * 255.0, b * 255.0]
}

/// The Lab transfer function.
fn lab_f(t: f32) -> f32 {
    if t > LAB_EPSILON {
        t.cbrt()
    } else {
        LAB_KAPPA * t + 16.0 / 116.0
    }
}

/// The inverse of [`lab_f`].
fn lab_f_inv(t: f32) -> f32 {
    let cube = t * t * t;
    if cube > LAB_EPSILON {
        cube
    } else {
        (t - 16.0 / 116.0) / LAB_KAPPA
    }
}

/// Multiplies a 3x3 matrix with a vector.
fn mat_mul(m: &[[f32; 3]; 3], v: [f32; 3]) -> [f32; 3] {
    m.map(|row| row[0] * v[0] + row[1] * v[1] + row[2] * v[2])
}

/// Converts linear light to Lab.
fn linear_to_lab(color: LinSrgb) -> Lab65 {
    let (r, g, b) = color.into_components();
    let xyz = mat_mul(&RGB_TO_XYZ, [r, g, b]);
    let [fx, fy, fz] = [0, 1, 2].map(|i| lab_f(xyz[i] / WHITE_XYZ[i]));
    Lab::new(116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz))
}

/// Converts an 8-bit sRGB color to Lab.
#[must_use]
pub fn rgb_to_lab(color: Srgb<u8>) -> Lab65 {
    linear_to_lab(to_linear(color))
}

/// Converts an sRGB color on a `0.0..=255.0` scale to Lab.
///
/// Used for pixels that carry fractional diffusion error.
#[must_use]
pub fn rgb_f32_to_lab(rgb: [f32; 3]) -> Lab65 {
    let [r, g, b] = rgb.map(|c| c / 255.0);
    linear_to_lab(Srgb::new(r, g, b).into_linear())
}

/// Converts Lab back to 8-bit sRGB, clamping out-of-gamut values.
#[must_use]
pub fn lab_to_rgb(lab: Lab65) -> Srgb<u8> {
    let fy = (lab.l + 16.0) / 116.0;
    let fx = fy + lab.a / 500.0;
    let fz = fy - lab.b / 200.0;
    let xyz = [fx, fy, fz];
    let xyz = [0, 1, 2].map(|i| lab_f_inv(xyz[i]) * WHITE_XYZ[i]);
    let [r, g, b] = mat_mul(&XYZ_TO_RGB, xyz);
    from_linear(LinSrgb::new(r, g, b))
}

/// Chroma, the distance of a Lab color from the neutral axis.
fn chroma(lab: Lab65) -> f32 {
    lab.a.hypot(lab.b)
}

/// The weighted perceptual distance between two Lab colors.
///
/// This is `(ΔL·wL)² + (ΔC·wC)² + 0.35·Δa² + 0.35·Δb²`, where `ΔC` is the difference in chroma.
/// It is a squared quantity: comparisons use it directly,
/// and only reporting takes the square root.
#[must_use]
pub fn lab_distance(x: Lab65, y: Lab65, weights: Weights) -> f32 {
    let dl = (x.l - y.l) * weights.lightness;
    let dc = (chroma(x) - chroma(y)) * weights.chroma;
    let da = x.a - y.a;
    let db = x.b - y.b;
    dl * dl + dc * dc + AB_WEIGHT * da * da + AB_WEIGHT * db * db
}

/// Squared euclidean distance between two colors on a `0.0..=255.0` scale.
#[must_use]
pub fn rgb_distance(x: [f32; 3], y: [f32; 3]) -> f32 {
    let mut dist = 0.0;
    for c in 0..3 {
        let d = x[c] - y[c];
        dist += d * d;
    }
    dist
}

/// An 8-bit color as an `[f32; 3]` on a `0.0..=255.0` scale.
#[must_use]
pub fn rgb_f32(color: Srgb<u8>) -> [f32; 3] {
    let (r, g, b) = color.into_components();
    [r.into(), g.into(), b.into()]
}

/// Mixes colors in linear light.
///
/// `weights` should be non-negative and sum to one.
#[must_use]
pub fn mix_linear(colors: &[LinSrgb], weights: &[f32]) -> LinSrgb {
    colors
        .iter()
        .zip(weights)
        .fold(LinSrgb::new(0.0, 0.0, 0.0), |acc, (&color, &w)| acc + color * w)
}

/// Parses a `#RRGGBB` literal. The `#` is optional and the digits are case-insensitive.
///
/// # Examples
/// ```
/// # use inkmix::color::parse_hex;
/// # use palette::Srgb;
/// assert_eq!(parse_hex("#80ff00"), Ok(Srgb::new(128, 255, 0)));
/// assert!(parse_hex("#80ff0").is_err());
/// ```
pub fn parse_hex(literal: &str) -> Result<Srgb<u8>, EngineError> {
    let digits = literal.trim();
    let digits = digits.strip_prefix('#').unwrap_or(digits);

    let mut rgb = [0; 3];
    ::hex::decode_to_slice(digits, &mut rgb)
        .map_err(|_| EngineError::InvalidColorLiteral(literal.to_owned()))?;

    Ok(Srgb::from(rgb))
}

/// Formats a color as an upper-case `#RRGGBB` literal.
#[must_use]
pub fn to_hex(color: Srgb<u8>) -> String {
    let (r, g, b) = color.into_components();
    format!("#{}", ::hex::encode_upper([r, g, b]))
}

/// Serializes a single color as a hex literal.
#[cfg(feature = "serde")]
pub(crate) mod serde_hex {
    use palette::Srgb;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(color: &Srgb<u8>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::to_hex(*color))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Srgb<u8>, D::Error> {
        let literal = String::deserialize(deserializer)?;
        super::parse_hex(&literal).map_err(D::Error::custom)
    }
}

/// Serializes a list of colors as hex literals.
#[cfg(feature = "serde")]
pub(crate) mod serde_hex_list {
    use palette::Srgb;
    use serde::{de::Error, ser::SerializeSeq, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(colors: &[Srgb<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(colors.len()))?;
        for &color in colors {
            seq.serialize_element(&super::to_hex(color))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Srgb<u8>>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|literal| super::parse_hex(literal).map_err(D::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lab_roundtrip_grays() {
        for gray in [0, 1, 64, 128, 200, 254, 255] {
            let color = Srgb::new(gray, gray, gray);
            let back = lab_to_rgb(rgb_to_lab(color));
            let (r, g, b) = back.into_components();
            for c in [r, g, b] {
                assert!(c.abs_diff(gray) <= 1, "{gray} -> {back:?}");
            }
        }
    }

    #[test]
    fn lab_reference_values() {
        let white = rgb_to_lab(Srgb::new(255, 255, 255));
        assert!((white.l - 100.0).abs() < 1e-2);
        assert!(white.a.abs() < 0.05 && white.b.abs() < 0.05);

        let black = rgb_to_lab(Srgb::new(0, 0, 0));
        assert!(black.l.abs() < 1e-3);

        let red = rgb_to_lab(Srgb::new(255, 0, 0));
        assert!((red.l - 53.23).abs() < 0.05);
        assert!((red.a - 80.11).abs() < 0.05);
        assert!((red.b - 67.22).abs() < 0.05);
    }

    #[test]
    fn float_and_integer_lab_agree() {
        for color in [Srgb::new(0, 0, 0), Srgb::new(200, 100, 50), Srgb::new(255, 255, 255)] {
            let x = rgb_to_lab(color);
            let y = rgb_f32_to_lab(rgb_f32(color));
            assert!((x.l - y.l).abs() < 1e-3 && (x.a - y.a).abs() < 1e-3 && (x.b - y.b).abs() < 1e-3);
        }
    }

    #[test]
    fn distance_is_zero_on_identity_and_symmetric() {
        let x = rgb_to_lab(Srgb::new(200, 100, 50));
        let y = rgb_to_lab(Srgb::new(10, 220, 90));
        let w = Weights::new(1.3, 0.4);

        assert_eq!(lab_distance(x, x, w), 0.0);
        assert!((lab_distance(x, y, w) - lab_distance(y, x, w)).abs() < 1e-3);
    }

    #[test]
    fn distance_weights_scale_their_terms() {
        let black = rgb_to_lab(Srgb::new(0, 0, 0));
        let gray = rgb_to_lab(Srgb::new(128, 128, 128));

        // grays differ (almost) only in lightness
        let base = lab_distance(black, gray, Weights::new(1.0, 1.0));
        let doubled = lab_distance(black, gray, Weights::new(2.0, 1.0));
        assert!((doubled / base - 4.0).abs() < 1e-2);

        let ignored = lab_distance(black, gray, Weights::new(0.0, 1.0));
        assert!(ignored < 1e-2);
    }

    #[test]
    fn distance_orders_closer_colors_lower() {
        let target = rgb_to_lab(Srgb::new(200, 100, 50));
        let near = rgb_to_lab(Srgb::new(190, 105, 55));
        let far = rgb_to_lab(Srgb::new(20, 200, 220));
        let w = Weights::default();
        assert!(lab_distance(target, near, w) < lab_distance(target, far, w));
    }

    #[test]
    fn linear_mix_is_not_srgb_average() {
        let black = to_linear(Srgb::new(0, 0, 0));
        let white = to_linear(Srgb::new(255, 255, 255));
        let mixed = from_linear(mix_linear(&[black, white], &[0.5, 0.5]));

        // half of the light is ~188 in sRGB, not 128
        let (r, g, b) = mixed.into_components();
        for c in [r, g, b] {
            assert!((186..=189).contains(&c), "{mixed:?}");
        }
    }

    #[test]
    fn hex_literals() {
        assert_eq!(parse_hex("#FF8000"), Ok(Srgb::new(255, 128, 0)));
        assert_eq!(parse_hex("ff8000"), Ok(Srgb::new(255, 128, 0)));
        assert_eq!(parse_hex(" #aBcDeF "), Ok(Srgb::new(0xab, 0xcd, 0xef)));

        for bad in ["", "#", "#12345", "#1234567", "#GG0000", "FFF"] {
            assert_eq!(parse_hex(bad), Err(EngineError::InvalidColorLiteral(bad.to_owned())));
        }

        assert_eq!(to_hex(Srgb::new(0xab, 0x0c, 0xef)), "#AB0CEF");
    }
}
