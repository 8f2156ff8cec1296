//! Procedural sample sources for demos and tests.

use bif_film::{LayerColors, LayerId, SamplePoint};
use bif_math::Rgba;

use crate::renderer::SampleSource;

/// The same colour everywhere.
#[derive(Debug, Clone, Copy)]
pub struct SolidColor {
    pub color: Rgba,
}

impl SolidColor {
    pub fn new(color: Rgba) -> Self {
        Self { color }
    }
}

impl SampleSource for SolidColor {
    fn sample(&self, _point: &SamplePoint, out: &mut LayerColors) {
        out.set(LayerId::Combined, self.color);
    }
}

/// A hard-edged disc over a flat background.
///
/// The sharp edge is what adaptive anti-aliasing is meant to find. Also
/// fills the object mask and depth layers.
#[derive(Debug, Clone, Copy)]
pub struct Disc {
    pub center: (f32, f32),
    pub radius: f32,
    pub inside: Rgba,
    pub outside: Rgba,
}

impl Disc {
    pub fn new(center: (f32, f32), radius: f32, inside: Rgba, outside: Rgba) -> Self {
        Self {
            center,
            radius,
            inside,
            outside,
        }
    }

    /// True if the continuous image position `(x, y)` lies in the disc.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        let (dx, dy) = (x - self.center.0, y - self.center.1);
        dx * dx + dy * dy < self.radius * self.radius
    }
}

impl SampleSource for Disc {
    fn sample(&self, point: &SamplePoint, out: &mut LayerColors) {
        let hit = self.contains(point.x as f32 + point.dx, point.y as f32 + point.dy);
        let (color, mask, depth) = if hit {
            (self.inside, 1.0, 0.5)
        } else {
            (self.outside, 0.0, 1.0)
        };
        out.set(LayerId::Combined, color);
        out.set(LayerId::ObjectMask, Rgba::new(mask, mask, mask, 1.0));
        out.set(LayerId::Depth, Rgba::new(depth, depth, depth, 1.0));
    }
}

/// Horizontal linear blend between two colours across `width` pixels.
#[derive(Debug, Clone, Copy)]
pub struct Gradient {
    pub left: Rgba,
    pub right: Rgba,
    pub width: f32,
}

impl Gradient {
    pub fn new(left: Rgba, right: Rgba, width: f32) -> Self {
        Self { left, right, width }
    }
}

impl SampleSource for Gradient {
    fn sample(&self, point: &SamplePoint, out: &mut LayerColors) {
        let t = if self.width > 0.0 {
            ((point.x as f32 + point.dx) / self.width).clamp(0.0, 1.0)
        } else {
            0.0
        };
        out.set(LayerId::Combined, self.left.lerp(self.right, t));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disc_layers() {
        let disc = Disc::new((4.0, 4.0), 2.0, Rgba::ONE, Rgba::ZERO);
        let mut out = LayerColors::new();
        disc.sample(&SamplePoint::new(4, 4, 0.5, 0.5), &mut out);
        assert_eq!(out.get(LayerId::Combined), Some(Rgba::ONE));
        assert_eq!(out.get(LayerId::ObjectMask).map(|c| c.x), Some(1.0));

        out.clear();
        disc.sample(&SamplePoint::new(0, 0, 0.5, 0.5), &mut out);
        assert_eq!(out.get(LayerId::Combined), Some(Rgba::ZERO));
        assert_eq!(out.get(LayerId::Depth).map(|c| c.x), Some(1.0));
    }

    #[test]
    fn test_gradient_endpoints() {
        let gradient = Gradient::new(Rgba::ZERO, Rgba::ONE, 10.0);
        let mut out = LayerColors::new();
        gradient.sample(&SamplePoint::new(0, 0, 0.0, 0.0), &mut out);
        assert_eq!(out.get(LayerId::Combined), Some(Rgba::ZERO));
        gradient.sample(&SamplePoint::new(4, 0, 1.0, 0.0), &mut out);
        let mid = out.get(LayerId::Combined).unwrap();
        assert!((mid.x - 0.5).abs() < 1e-6);
        gradient.sample(&SamplePoint::new(20, 0, 0.0, 0.0), &mut out);
        assert_eq!(out.get(LayerId::Combined), Some(Rgba::ONE));
    }
}
