//! Reconstruction filter lookup table.
//!
//! Each sample is spread over the pixels around it, weighted by a
//! reconstruction kernel. Evaluating the kernel per pixel is too slow for
//! the sample path, so it is tabulated once per film on a
//! `FILTER_TABLE_SIZE x FILTER_TABLE_SIZE` grid covering one quadrant of the
//! kernel support (kernels are symmetric). Mitchell and Lanczos2 are
//! separable; Gauss is radial.

use bif_math::PixelRect;
use serde::{Deserialize, Serialize};

/// Resolution of the filter table along each axis.
pub const FILTER_TABLE_SIZE: usize = 16;

/// Hard limit on the filter footprint width, in pixels.
pub const MAX_FILTER_SIZE: f32 = 8.0;

/// Maximum number of pixels a footprint can span along one axis.
pub const MAX_FOOTPRINT: usize = MAX_FILTER_SIZE as usize + 1;

/// Smallest half-width that still covers the whole centre pixel.
const MIN_HALF_WIDTH: f32 = 0.501;

/// Reconstruction kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterKind {
    #[default]
    Box,
    /// Mitchell-Netravali, B = C = 1/3.
    Mitchell,
    Lanczos2,
    Gauss,
}

impl FilterKind {
    /// Multiplier applied to the configured half-width.
    pub fn radius_scale(self) -> f32 {
        match self {
            FilterKind::Mitchell => 2.6,
            FilterKind::Gauss => 2.0,
            FilterKind::Box | FilterKind::Lanczos2 => 1.0,
        }
    }

    /// Kernel range mapped onto the table, in kernel units.
    ///
    /// Lanczos2 only keeps its main lobe; past `x = 1` it is negative.
    pub fn table_extent(self) -> f32 {
        match self {
            FilterKind::Lanczos2 => 1.0,
            FilterKind::Box | FilterKind::Mitchell | FilterKind::Gauss => 2.0,
        }
    }

    /// Evaluate the kernel at `(dx, dy)` in kernel units; support is `[0, 2)`.
    pub fn evaluate(self, dx: f32, dy: f32) -> f32 {
        match self {
            FilterKind::Box => 1.0,
            FilterKind::Mitchell => mitchell(dx) * mitchell(dy),
            FilterKind::Lanczos2 => lanczos2(dx) * lanczos2(dy),
            FilterKind::Gauss => gauss(dx, dy),
        }
    }

    /// Table entry at `(dx, dy)`: the kernel with negative lobes cut per axis.
    fn table_weight(self, dx: f32, dy: f32) -> f32 {
        match self {
            FilterKind::Box => 1.0,
            FilterKind::Mitchell => mitchell(dx).max(0.0) * mitchell(dy).max(0.0),
            FilterKind::Lanczos2 => lanczos2(dx).max(0.0) * lanczos2(dy).max(0.0),
            FilterKind::Gauss => gauss(dx, dy),
        }
    }
}

fn mitchell(x: f32) -> f32 {
    let x = x.abs();
    if x >= 2.0 {
        return 0.0;
    }
    if x >= 1.0 {
        // 1 <= |x| < 2
        return x * (x * (x * -0.38888889 + 2.0) - 3.33333333) + 1.77777778;
    }
    x * x * (1.16666666 * x - 2.0) + 0.88888889
}

fn lanczos2(x: f32) -> f32 {
    let x = x.abs();
    if x == 0.0 {
        return 1.0;
    }
    if x < 2.0 {
        let a = std::f32::consts::PI * x;
        let b = std::f32::consts::FRAC_PI_2 * x;
        return (a.sin() * b.sin()) / (a * b);
    }
    0.0
}

fn gauss(dx: f32, dy: f32) -> f32 {
    let r2 = dx * dx + dy * dy;
    ((-6.0 * r2).exp() - (-6.0f32 * 4.0).exp()).max(0.0)
}

/// Pixel range and table indices touched by one sample.
///
/// Offsets are relative to the sample's pixel; `x_index[n]` is the table
/// column for pixel `x + dx0 + n`.
#[derive(Debug, Clone, Copy)]
pub struct Footprint {
    pub dx0: i32,
    pub dx1: i32,
    pub dy0: i32,
    pub dy1: i32,
    pub x_index: [usize; MAX_FOOTPRINT],
    pub y_index: [usize; MAX_FOOTPRINT],
}

impl Footprint {
    /// True when the footprint was clipped away entirely.
    pub fn is_empty(&self) -> bool {
        self.dx1 < self.dx0 || self.dy1 < self.dy0
    }
}

/// Tabulated reconstruction filter.
#[derive(Debug, Clone)]
pub struct FilterTable {
    kind: FilterKind,
    half_width: f32,
    table_scale: f64,
    weights: [f32; FILTER_TABLE_SIZE * FILTER_TABLE_SIZE],
}

impl FilterTable {
    /// Build the table for `kind` with a configured filter width of `size`
    /// pixels.
    pub fn new(kind: FilterKind, size: f32) -> Self {
        let max_half = MAX_FILTER_SIZE * 0.5;
        let half = (size * 0.5).clamp(MIN_HALF_WIDTH, max_half) * kind.radius_scale();
        let half_width = half.clamp(MIN_HALF_WIDTH, max_half);

        // Negative lobes are cut so accumulated weights only ever grow
        let mut weights = [0.0; FILTER_TABLE_SIZE * FILTER_TABLE_SIZE];
        let scale = kind.table_extent() / FILTER_TABLE_SIZE as f32;
        for y in 0..FILTER_TABLE_SIZE {
            for x in 0..FILTER_TABLE_SIZE {
                weights[y * FILTER_TABLE_SIZE + x] =
                    kind.table_weight((x as f32 + 0.5) * scale, (y as f32 + 0.5) * scale);
            }
        }

        log::debug!(
            "Filter table: {:?}, half-width {:.3} (configured size {:.3})",
            kind,
            half_width,
            size
        );

        Self {
            kind,
            half_width,
            table_scale: 0.9999 * FILTER_TABLE_SIZE as f64 / half_width as f64,
            weights,
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    /// Filter half-width in pixels after scaling and clamping.
    pub fn half_width(&self) -> f32 {
        self.half_width
    }

    /// `ceil(half_width)`: how far a footprint can reach from its pixel.
    pub fn border(&self) -> i32 {
        self.half_width.ceil() as i32
    }

    /// Table index for a signed pixel-centre offset.
    #[inline]
    pub fn index(&self, offset: f64) -> usize {
        let d = (offset * self.table_scale).abs().floor() as usize;
        debug_assert!(d < FILTER_TABLE_SIZE, "filter index {} out of range", d);
        d.min(FILTER_TABLE_SIZE - 1)
    }

    #[inline]
    pub fn weight_at(&self, x_index: usize, y_index: usize) -> f32 {
        self.weights[y_index * FILTER_TABLE_SIZE + x_index]
    }

    /// Weight for a signed offset `(dx, dy)` between a sample and a pixel
    /// centre, in pixels. Offsets beyond the half-width are clamped to the
    /// table edge, so callers bound them first.
    pub fn lookup(&self, dx: f32, dy: f32) -> f32 {
        self.weight_at(self.index(dx as f64), self.index(dy as f64))
    }

    /// Pixels reached by a sample in pixel `(x, y)` at sub-pixel position
    /// `(dx, dy)` in `[0, 1)`, clipped to `bounds`.
    pub fn footprint(&self, x: i32, y: i32, dx: f32, dy: f32, bounds: &PixelRect) -> Footprint {
        let fw = self.half_width as f64;
        let (dx, dy) = (dx as f64, dy as f64);

        let dx0 = (bounds.x0 - x).max((dx - fw).round() as i32);
        let dx1 = (bounds.x1 - x - 1).min((dx + fw - 1.0).round() as i32);
        let dy0 = (bounds.y0 - y).max((dy - fw).round() as i32);
        let dy1 = (bounds.y1 - y - 1).min((dy + fw - 1.0).round() as i32);

        let mut x_index = [0; MAX_FOOTPRINT];
        let mut y_index = [0; MAX_FOOTPRINT];

        // Distance from each pixel centre to the sample
        let x_offs = dx - 0.5;
        for (n, i) in (dx0..=dx1).enumerate().take(MAX_FOOTPRINT) {
            x_index[n] = self.index(i as f64 - x_offs);
        }
        let y_offs = dy - 0.5;
        for (n, j) in (dy0..=dy1).enumerate().take(MAX_FOOTPRINT) {
            y_index[n] = self.index(j as f64 - y_offs);
        }

        Footprint {
            dx0,
            dx1,
            dy0,
            dy1,
            x_index,
            y_index,
        }
    }
}
