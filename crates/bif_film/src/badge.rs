//! Render information strip ("badge") drawn onto the final image.

use std::time::Duration;

use bif_math::Rgba;
use serde::{Deserialize, Serialize};

use crate::filter::FilterKind;
use crate::font::{self, GLYPH_HEIGHT};

/// Where the badge strip goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BadgePosition {
    #[default]
    None,
    Top,
    Bottom,
}

/// Badge text and placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BadgeConfig {
    pub position: BadgePosition,
    pub title: String,
    pub author: String,
    pub contact: String,
    pub comments: String,
    /// Append filter, AA and timing statistics.
    pub draw_render_settings: bool,
    /// Font pixel size multiplier.
    pub font_scale: i32,
}

impl Default for BadgeConfig {
    fn default() -> Self {
        Self {
            position: BadgePosition::None,
            title: String::new(),
            author: String::new(),
            contact: String::new(),
            comments: String::new(),
            draw_render_settings: true,
            font_scale: 2,
        }
    }
}

/// Render statistics printed in the badge.
#[derive(Debug, Clone, PartialEq)]
pub struct BadgeStats {
    pub width: i32,
    pub height: i32,
    pub filter: FilterKind,
    pub filter_width: f32,
    pub passes: u32,
    pub samples: u64,
    pub threshold: f32,
    pub threads: usize,
    pub render_time: Duration,
}

const BACKGROUND: Rgba = Rgba::new(0.02, 0.02, 0.02, 1.0);
const BACKGROUND_OPACITY: f32 = 0.8;
const TEXT: Rgba = Rgba::new(0.9, 0.9, 0.9, 1.0);

impl BadgeConfig {
    pub fn is_enabled(&self) -> bool {
        self.position != BadgePosition::None
    }

    /// Text lines of the badge.
    pub fn lines(&self, stats: &BadgeStats) -> Vec<String> {
        let mut lines = Vec::new();
        let mut header = self.title.clone();
        if !self.author.is_empty() {
            if !header.is_empty() {
                header.push_str(" - ");
            }
            header.push_str(&self.author);
        }
        if !self.contact.is_empty() {
            header.push_str(&format!(" ({})", self.contact));
        }
        if !header.is_empty() {
            lines.push(header);
        }
        if !self.comments.is_empty() {
            lines.push(self.comments.clone());
        }
        if self.draw_render_settings {
            lines.push(format!(
                "{}x{} {:?} filter {:.2}",
                stats.width, stats.height, stats.filter, stats.filter_width
            ));
            lines.push(format!(
                "passes {} samples {} aa threshold {:.4}",
                stats.passes, stats.samples, stats.threshold
            ));
            lines.push(format!(
                "render time {:.2}s threads {}",
                stats.render_time.as_secs_f64(),
                stats.threads
            ));
        }
        lines
    }

    /// Height in pixels of the strip for `line_count` lines.
    pub fn strip_height(&self, line_count: usize) -> i32 {
        let scale = self.font_scale.max(1);
        let line = (GLYPH_HEIGHT + 2) * scale;
        line * line_count as i32 + 2 * scale
    }

    /// Blend the strip and its text into a linear row-major canvas.
    pub fn draw(&self, canvas: &mut [Rgba], width: i32, height: i32, lines: &[String]) {
        if !self.is_enabled() || lines.is_empty() || width <= 0 || height <= 0 {
            return;
        }
        let strip = self.strip_height(lines.len()).min(height);
        let top = match self.position {
            BadgePosition::Bottom => height - strip,
            _ => 0,
        };
        for y in top..top + strip {
            for x in 0..width {
                let c = &mut canvas[(y * width + x) as usize];
                *c = c.lerp(BACKGROUND, BACKGROUND_OPACITY);
                c.w = 1.0;
            }
        }

        let scale = self.font_scale.max(1);
        for (n, line) in lines.iter().enumerate() {
            let y = top + scale + n as i32 * (GLYPH_HEIGHT + 2) * scale;
            if y >= top + strip {
                break;
            }
            font::draw_text(canvas, width, top + strip, (scale * 2, y), line, scale, TEXT);
        }
    }
}
