//! RGBA colour helpers.
//!
//! Colours are plain glam vectors, the same way the path tracer uses
//! `Vec3` for its `Color` alias. The extra behaviour the film needs
//! (brightness, perceptual difference, clamps) lives in [`ColorExt`].

use glam::{Vec3, Vec4};

/// RGB colour (linear, unbounded).
pub type Rgb = Vec3;

/// RGBA colour (linear, straight alpha unless stated otherwise).
pub type Rgba = Vec4;

/// Rec. 709 luma weights.
const LUMA: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// Film-specific operations on [`Rgba`].
pub trait ColorExt: Sized {
    /// Luma of the RGB part.
    fn brightness(&self) -> f32;

    /// Luma of the absolute RGB components.
    fn abs_brightness(&self) -> f32;

    /// Perceptual difference used by adaptive anti-aliasing.
    ///
    /// The brightness difference, optionally raised to the largest
    /// per-channel difference (RGBA) when `use_components` is set so
    /// that hue noise at equal brightness is still detected.
    fn color_difference(&self, other: &Self, use_components: bool) -> f32;

    /// Replace NaN/infinite components with 0 and clamp RGB to >= 0.
    fn sanitized(self) -> Self;

    /// Clamp RGB components to >= 0.
    fn clamp_rgb0(self) -> Self;

    /// Scale RGB down uniformly so the largest component is at most `max`.
    ///
    /// Hue is preserved. A non-positive `max` disables the clamp.
    fn clamp_proportional_rgb(self, max: f32) -> Self;

    /// Clamp alpha to [0, 1].
    fn clamp_alpha(self) -> Self;

    /// Multiply RGB by alpha.
    fn premultiply_alpha(self) -> Self;
}

impl ColorExt for Vec4 {
    #[inline]
    fn brightness(&self) -> f32 {
        self.truncate().dot(LUMA)
    }

    #[inline]
    fn abs_brightness(&self) -> f32 {
        self.truncate().abs().dot(LUMA)
    }

    fn color_difference(&self, other: &Self, use_components: bool) -> f32 {
        let mut diff = (other.brightness() - self.brightness()).abs();
        if use_components {
            diff = diff.max((*other - *self).abs().max_element());
        }
        diff
    }

    fn sanitized(self) -> Self {
        let clean = |v: f32| if v.is_finite() { v } else { 0.0 };
        Vec4::new(clean(self.x), clean(self.y), clean(self.z), clean(self.w)).clamp_rgb0()
    }

    #[inline]
    fn clamp_rgb0(self) -> Self {
        Vec4::new(self.x.max(0.0), self.y.max(0.0), self.z.max(0.0), self.w)
    }

    fn clamp_proportional_rgb(self, max: f32) -> Self {
        if max <= 0.0 {
            return self;
        }
        let largest = self.truncate().max_element();
        if largest > max {
            let scale = max / largest;
            Vec4::new(self.x * scale, self.y * scale, self.z * scale, self.w)
        } else {
            self
        }
    }

    #[inline]
    fn clamp_alpha(self) -> Self {
        Vec4::new(self.x, self.y, self.z, self.w.clamp(0.0, 1.0))
    }

    #[inline]
    fn premultiply_alpha(self) -> Self {
        Vec4::new(self.x * self.w, self.y * self.w, self.z * self.w, self.w)
    }
}
