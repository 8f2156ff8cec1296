//! Conversion from the film's linear working space to output spaces.

use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

use crate::Rgba;

/// Colour space an output sink expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorSpace {
    /// No conversion.
    LinearRgb,
    /// sRGB transfer curve (IEC 61966-2-1).
    #[default]
    Srgb,
    /// CIE XYZ (D65 white point).
    Xyz,
    /// Plain power-law gamma using the sink's `gamma` value.
    RawGamma,
}

impl ColorSpace {
    /// Convert a linear colour to this space. Alpha is untouched.
    ///
    /// `gamma` is only used by [`ColorSpace::RawGamma`].
    pub fn from_linear(self, color: Rgba, gamma: f32) -> Rgba {
        match self {
            ColorSpace::LinearRgb => color,
            ColorSpace::Srgb => Rgba::new(
                linear_to_srgb(color.x),
                linear_to_srgb(color.y),
                linear_to_srgb(color.z),
                color.w,
            ),
            ColorSpace::Xyz => linear_rgb_to_xyz().mul_vec3(color.truncate()).extend(color.w),
            ColorSpace::RawGamma => {
                if gamma <= 0.0 || gamma == 1.0 {
                    return color;
                }
                let inv = 1.0 / gamma;
                let encode = |v: f32| if v > 0.0 { v.powf(inv) } else { 0.0 };
                Rgba::new(encode(color.x), encode(color.y), encode(color.z), color.w)
            }
        }
    }

    /// Convert a colour in this space back to linear RGB.
    pub fn to_linear(self, color: Rgba, gamma: f32) -> Rgba {
        match self {
            ColorSpace::LinearRgb => color,
            ColorSpace::Srgb => Rgba::new(
                srgb_to_linear(color.x),
                srgb_to_linear(color.y),
                srgb_to_linear(color.z),
                color.w,
            ),
            ColorSpace::Xyz => linear_rgb_to_xyz()
                .inverse()
                .mul_vec3(color.truncate())
                .extend(color.w),
            ColorSpace::RawGamma => {
                if gamma <= 0.0 || gamma == 1.0 {
                    return color;
                }
                let decode = |v: f32| if v > 0.0 { v.powf(gamma) } else { 0.0 };
                Rgba::new(decode(color.x), decode(color.y), decode(color.z), color.w)
            }
        }
    }
}

/// Linear Rec. 709 primaries to XYZ (D65).
fn linear_rgb_to_xyz() -> Mat3 {
    Mat3::from_cols(
        Vec3::new(0.4124564, 0.2126729, 0.0193339),
        Vec3::new(0.3575761, 0.7151522, 0.1191920),
        Vec3::new(0.1804375, 0.0721750, 0.9503041),
    )
}

/// Encode a linear value with the sRGB transfer curve.
#[inline]
fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.0031308 {
        v.max(0.0) * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// Decode an sRGB value to linear.
#[inline]
fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_srgb_endpoints() {
        let black = ColorSpace::Srgb.from_linear(Rgba::new(0.0, 0.0, 0.0, 1.0), 1.0);
        assert_eq!(black.truncate(), Vec3::ZERO);

        let white = ColorSpace::Srgb.from_linear(Rgba::ONE, 1.0);
        assert!((white.x - 1.0).abs() < 0.0001);

        // Mid-grey is brighter once encoded
        let grey = ColorSpace::Srgb.from_linear(Rgba::new(0.2, 0.2, 0.2, 1.0), 1.0);
        assert!(grey.x > 0.4);
    }

    #[test]
    fn test_srgb_inverse() {
        let c = Rgba::new(0.1, 0.5, 0.9, 0.3);
        let back = ColorSpace::Srgb.to_linear(ColorSpace::Srgb.from_linear(c, 1.0), 1.0);
        assert!((back - c).abs().max_element() < 0.0001);
    }

    #[test]
    fn test_xyz_white_point() {
        let xyz = ColorSpace::Xyz.from_linear(Rgba::ONE, 1.0);
        // D65 white: Y == 1
        assert!((xyz.y - 1.0).abs() < 0.001);
        assert!((xyz.x - 0.9505).abs() < 0.001);
        assert_eq!(xyz.w, 1.0);
    }

    #[test]
    fn test_raw_gamma() {
        let c = ColorSpace::RawGamma.from_linear(Rgba::new(0.25, 0.0, 1.0, 1.0), 2.0);
        assert!((c.x - 0.5).abs() < 0.0001);
        assert_eq!(c.y, 0.0);

        // Gamma 1 is the identity
        let same = ColorSpace::RawGamma.from_linear(Rgba::new(0.25, 0.5, 1.0, 1.0), 1.0);
        assert_eq!(same.x, 0.25);
    }
}
