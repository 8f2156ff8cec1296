//! Integer pixel rectangles.

use serde::{Deserialize, Serialize};

/// A half-open pixel rectangle `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl PixelRect {
    /// Create a rectangle from its corners.
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Create a rectangle from origin and size.
    pub fn from_size(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> i32 {
        (self.x1 - self.x0).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.y1 - self.y0).max(0)
    }

    /// Number of pixels covered.
    pub fn area(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }

    /// Shrink by `border` pixels on each side.
    ///
    /// A border larger than half the size collapses the rectangle onto its
    /// centre line instead of inverting it.
    pub fn inset(&self, border: i32) -> PixelRect {
        let bx = border.min(self.width() / 2);
        let by = border.min(self.height() / 2);
        PixelRect::new(self.x0 + bx, self.y0 + by, self.x1 - bx, self.y1 - by)
    }

    /// Overlap of two rectangles (may be empty).
    pub fn intersect(&self, other: &PixelRect) -> PixelRect {
        PixelRect::new(
            self.x0.max(other.x0),
            self.y0.max(other.y0),
            self.x1.min(other.x1),
            self.y1.min(other.y1),
        )
    }

    /// Centre point in continuous coordinates.
    pub fn center(&self) -> (f32, f32) {
        (
            self.x0 as f32 + self.width() as f32 / 2.0,
            self.y0 as f32 + self.height() as f32 / 2.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_size() {
        let r = PixelRect::from_size(10, 20, 30, 40);
        assert_eq!(r.width(), 30);
        assert_eq!(r.height(), 40);
        assert_eq!(r.area(), 1200);
        assert!(!r.is_empty());
    }

    #[test]
    fn test_rect_contains_half_open() {
        let r = PixelRect::new(0, 0, 4, 4);
        assert!(r.contains(0, 0));
        assert!(r.contains(3, 3));
        assert!(!r.contains(4, 3));
        assert!(!r.contains(-1, 0));
    }

    #[test]
    fn test_rect_inset() {
        let r = PixelRect::new(0, 0, 64, 64);
        assert_eq!(r.inset(2), PixelRect::new(2, 2, 62, 62));

        // Never inverts
        let small = PixelRect::new(0, 0, 3, 3);
        let inset = small.inset(4);
        assert!(inset.x0 <= inset.x1);
        assert!(inset.y0 <= inset.y1);
    }

    #[test]
    fn test_rect_intersect() {
        let a = PixelRect::new(0, 0, 10, 10);
        let b = PixelRect::new(5, 5, 20, 20);
        assert_eq!(a.intersect(&b), PixelRect::new(5, 5, 10, 10));

        let c = PixelRect::new(11, 11, 12, 12);
        assert!(a.intersect(&c).is_empty());
    }
}
