//! Adaptive anti-aliasing analysis.
//!
//! Between passes the combined layer is scanned for pixels that differ
//! noticeably from their neighbours. Those pixels (and the neighbours they
//! were compared with) are flagged in the [`ResampleMask`] so the next pass
//! only spends samples where the image is still noisy or aliased.

use bif_math::{ColorExt, Rgba};

use crate::config::{AdaptiveConfig, DarkDetection};
use crate::layer::LayerBuffer;
use crate::mask::ResampleMask;

/// Threshold at brightness 0.0, 0.1, ..., 1.0.
const DARK_CURVE: [f32; 11] = [
    0.0001, 0.0001, 0.0010, 0.0020, 0.0035, 0.0055, 0.0075, 0.0100, 0.0150, 0.0250, 0.0400,
];

/// Brightness-dependent threshold used by [`DarkDetection::Curve`].
///
/// Piecewise linear between the fixed breakpoints, constant outside them.
pub fn dark_threshold_curve(brightness: f32) -> f32 {
    if brightness <= 0.1 {
        return DARK_CURVE[1];
    }
    if brightness >= 1.0 {
        return DARK_CURVE[10];
    }
    let pos = brightness * 10.0;
    let i = (pos.floor() as usize).min(9);
    let t = pos - i as f32;
    DARK_CURVE[i] + t * (DARK_CURVE[i + 1] - DARK_CURVE[i])
}

/// Threshold for a pixel of the given brightness.
pub fn scaled_threshold(config: &AdaptiveConfig, threshold: f32, brightness: f32) -> f32 {
    match config.dark_detection {
        DarkDetection::None => threshold,
        DarkDetection::Linear => {
            let factor = config.dark_threshold_factor.clamp(0.0, 1.0);
            if factor > 0.0 {
                threshold * ((1.0 - factor) + brightness * factor)
            } else {
                threshold
            }
        }
        DarkDetection::Curve => threshold.min(dark_threshold_curve(brightness)),
    }
}

/// Recompute `mask` from the combined layer and return how many pixels
/// need more samples.
///
/// Unrendered pixels are always flagged.
pub fn analyze(
    combined: &LayerBuffer,
    mask: &mut ResampleMask,
    threshold: f32,
    config: &AdaptiveConfig,
) -> usize {
    mask.clear();
    let (w, h) = (combined.width(), combined.height());
    if w <= 0 || h <= 0 {
        return 0;
    }

    let mut colors: Vec<Rgba> = Vec::with_capacity((w * h) as usize);
    for y in 0..h {
        for x in 0..w {
            if combined.cell(x, y).weight <= 0.0 {
                mask.set(x, y);
            }
            colors.push(combined.normalized(x, y));
        }
    }
    let at = |x: i32, y: i32| colors[(y * w + x) as usize];
    let noise = config.detect_color_noise;

    // Right, down, down-right and down-left neighbours
    const NEIGHBOURS: [(i32, i32); 4] = [(1, 0), (0, 1), (1, 1), (-1, 1)];
    for y in 0..h {
        for x in 0..w {
            let color = at(x, y);
            let limit = scaled_threshold(config, threshold, color.abs_brightness());
            let mut needs_more = false;
            for (ox, oy) in NEIGHBOURS {
                let (nx, ny) = (x + ox, y + oy);
                if nx < 0 || nx >= w || ny >= h {
                    continue;
                }
                if color.color_difference(&at(nx, ny), noise) >= limit {
                    mask.set(nx, ny);
                    needs_more = true;
                }
            }
            if needs_more {
                mask.set(x, y);
            }
        }
    }

    if config.variance_edge_size > 0 && config.variance_pixels > 0 {
        variance_pass(&colors, w, h, mask, threshold, config);
    }

    mask.count()
}

/// Flag whole windows whose edge crossings exceed `variance_pixels`.
fn variance_pass(
    colors: &[Rgba],
    w: i32,
    h: i32,
    mask: &mut ResampleMask,
    threshold: f32,
    config: &AdaptiveConfig,
) {
    let at = |x: i32, y: i32| colors[(y * w + x) as usize];
    let half = config.variance_edge_size / 2;
    let noise = config.detect_color_noise;

    let mut flagged: Vec<(i32, i32)> = Vec::new();
    for y in 0..h {
        for x in 0..w {
            let mut crossings = 0;
            if w > 1 {
                for xd in -half..half - 1 {
                    let xi = (x + xd).clamp(0, w - 2);
                    if at(xi, y).color_difference(&at(xi + 1, y), noise) >= threshold {
                        crossings += 1;
                    }
                }
            }
            if h > 1 {
                for yd in -half..half - 1 {
                    let yi = (y + yd).clamp(0, h - 2);
                    if at(x, yi).color_difference(&at(x, yi + 1), noise) >= threshold {
                        crossings += 1;
                    }
                }
            }
            if crossings >= config.variance_pixels {
                flagged.push((x, y));
            }
        }
    }

    for (x, y) in flagged {
        for yd in -half..half - 1 {
            for xd in -half..half - 1 {
                mask.set((x + xd).clamp(0, w - 1), (y + yd).clamp(0, h - 1));
            }
        }
    }
}
