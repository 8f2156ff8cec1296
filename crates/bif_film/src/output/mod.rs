//! Hand-off of finished pixels to output sinks.
//!
//! The film produces normalized linear colours; the [`OutputDispatcher`]
//! clamps, premultiplies and converts them for each sink independently, so
//! a preview buffer and a file writer can use different colour spaces.

mod file;
mod memory;

pub use file::ImageFileOutput;
pub use memory::{MemoryImage, MemoryOutput};

use bif_math::{ColorExt, ColorSpace, PixelRect, Rgba};
use serde::{Deserialize, Serialize};

use crate::error::FilmResult;
use crate::layer::{LayerColors, LayerId};

/// Receiver of finished pixel data (file writer, preview buffer, ...).
///
/// Coordinates are absolute image coordinates.
pub trait OutputSink: Send {
    fn put_pixel(&mut self, view: usize, x: i32, y: i32, colors: &LayerColors);

    /// A rectangle `[x0, x1) x [y0, y1)` is complete for now.
    fn flush_area(&mut self, _view: usize, _x0: i32, _y0: i32, _x1: i32, _y1: i32) -> FilmResult<()> {
        Ok(())
    }

    /// The whole image is complete.
    fn flush(&mut self, view: usize) -> FilmResult<()>;

    /// A worker started on this rectangle.
    fn highlight_area(&mut self, _view: usize, _x0: i32, _y0: i32, _x1: i32, _y1: i32) {}

    /// Sinks that keep values above 1.0.
    fn is_hdr(&self) -> bool {
        false
    }

    /// Render statistics text drawn into the badge strip.
    fn put_badge(&mut self, _view: usize, _lines: &[String]) {}
}

/// Colour conversion settings of one sink.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub color_space: ColorSpace,
    /// Only used by [`ColorSpace::RawGamma`].
    pub gamma: f32,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            color_space: ColorSpace::Srgb,
            gamma: 2.2,
        }
    }
}

impl OutputSettings {
    pub fn new(color_space: ColorSpace, gamma: f32) -> Self {
        Self { color_space, gamma }
    }

    /// No colour conversion at all.
    pub fn linear() -> Self {
        Self::new(ColorSpace::LinearRgb, 1.0)
    }

    /// Prepare a normalized linear colour of `layer` for a sink.
    pub fn convert(&self, layer: LayerId, color: Rgba, premultiply: bool, hdr: bool) -> Rgba {
        let mut c = color.clamp_rgb0().clamp_alpha();
        if premultiply && layer == LayerId::Combined {
            c = c.premultiply_alpha();
        }
        if !hdr {
            c = c.clamp_proportional_rgb(1.0);
        }
        // Data layers are not colour managed
        if !layer.is_data() {
            c = self.color_space.from_linear(c, self.gamma);
        }
        c.clamp_alpha()
    }
}

struct SinkSlot {
    sink: Box<dyn OutputSink>,
    settings: OutputSettings,
    hdr: bool,
}

impl SinkSlot {
    fn new(sink: Box<dyn OutputSink>, settings: OutputSettings) -> Self {
        let hdr = sink.is_hdr();
        Self { sink, settings, hdr }
    }

    fn put(&mut self, view: usize, x: i32, y: i32, colors: &LayerColors, premultiply: bool) {
        let mut out = LayerColors::new();
        for (layer, color) in colors.iter() {
            out.set(layer, self.settings.convert(layer, color, premultiply, self.hdr));
        }
        self.sink.put_pixel(view, x, y, &out);
    }
}

/// Sends pixels to a primary and an optional secondary sink.
pub struct OutputDispatcher {
    view: usize,
    primary: SinkSlot,
    secondary: Option<SinkSlot>,
}

impl OutputDispatcher {
    pub fn new(sink: Box<dyn OutputSink>, settings: OutputSettings) -> Self {
        Self {
            view: 0,
            primary: SinkSlot::new(sink, settings),
            secondary: None,
        }
    }

    /// Add a second sink with its own colour settings.
    pub fn with_secondary(mut self, sink: Box<dyn OutputSink>, settings: OutputSettings) -> Self {
        self.secondary = Some(SinkSlot::new(sink, settings));
        self
    }

    /// Select the view (camera) index passed to the sinks.
    pub fn with_view(mut self, view: usize) -> Self {
        self.view = view;
        self
    }

    pub fn view(&self) -> usize {
        self.view
    }

    fn slots(&mut self) -> impl Iterator<Item = &mut SinkSlot> {
        std::iter::once(&mut self.primary).chain(self.secondary.as_mut())
    }

    pub fn put_pixel(&mut self, x: i32, y: i32, colors: &LayerColors, premultiply: bool) {
        let view = self.view;
        for slot in self.slots() {
            slot.put(view, x, y, colors, premultiply);
        }
    }

    /// Failures are logged; output problems never stop a render.
    pub fn flush_area(&mut self, area: PixelRect) {
        let view = self.view;
        for slot in self.slots() {
            if let Err(e) = slot.sink.flush_area(view, area.x0, area.y0, area.x1, area.y1) {
                log::warn!("Output flush of area {:?} failed: {}", area, e);
            }
        }
    }

    /// Returns false if any sink failed (already logged).
    pub fn flush(&mut self) -> bool {
        let view = self.view;
        let mut ok = true;
        for slot in self.slots() {
            if let Err(e) = slot.sink.flush(view) {
                log::warn!("Output flush failed: {}", e);
                ok = false;
            }
        }
        ok
    }

    pub fn highlight_area(&mut self, area: PixelRect) {
        let view = self.view;
        for slot in self.slots() {
            slot.sink.highlight_area(view, area.x0, area.y0, area.x1, area.y1);
        }
    }

    pub fn put_badge(&mut self, lines: &[String]) {
        let view = self.view;
        for slot in self.slots() {
            slot.sink.put_badge(view, lines);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_clamps_and_encodes() {
        let settings = OutputSettings::default();
        let c = settings.convert(LayerId::Combined, Rgba::new(-1.0, 4.0, 2.0, 1.5), false, false);
        assert_eq!(c.x, 0.0);
        assert!((c.y - 1.0).abs() < 0.0001);
        // 2/4 = 0.5 linear, then sRGB encoded
        assert!(c.z > 0.7 && c.z < 0.75);
        assert_eq!(c.w, 1.0);
    }

    #[test]
    fn test_convert_hdr_keeps_range() {
        let settings = OutputSettings::linear();
        let c = settings.convert(LayerId::Combined, Rgba::new(4.0, 2.0, 1.0, 1.0), false, true);
        assert_eq!(c, Rgba::new(4.0, 2.0, 1.0, 1.0));
    }

    #[test]
    fn test_convert_premultiply_combined_only() {
        let settings = OutputSettings::linear();
        let half = Rgba::new(1.0, 1.0, 1.0, 0.5);
        let c = settings.convert(LayerId::Combined, half, true, false);
        assert!((c.x - 0.5).abs() < 0.0001);
        let d = settings.convert(LayerId::Diffuse, half, true, false);
        assert_eq!(d.x, 1.0);
    }

    #[test]
    fn test_data_layers_not_color_managed() {
        let settings = OutputSettings::default();
        let depth = settings.convert(LayerId::Depth, Rgba::new(0.2, 0.2, 0.2, 1.0), false, false);
        assert!((depth.x - 0.2).abs() < 0.0001);
    }

    #[test]
    fn test_two_sinks_independent_settings() {
        let linear = MemoryOutput::new(2, 2);
        let srgb = MemoryOutput::new(2, 2);
        let mut outputs = OutputDispatcher::new(Box::new(linear.clone()), OutputSettings::linear())
            .with_secondary(Box::new(srgb.clone()), OutputSettings::default());

        let colors = LayerColors::new().with(LayerId::Combined, Rgba::new(0.2, 0.2, 0.2, 1.0));
        outputs.put_pixel(1, 1, &colors, false);
        outputs.flush_area(PixelRect::new(0, 0, 2, 2));
        assert!(outputs.flush());

        let a = linear.pixel(0, LayerId::Combined, 1, 1).unwrap();
        let b = srgb.pixel(0, LayerId::Combined, 1, 1).unwrap();
        assert!((a.x - 0.2).abs() < 0.0001);
        assert!(b.x > 0.4);
        assert_eq!(linear.flush_count(), 1);
        assert_eq!(srgb.flush_count(), 1);
    }
}
