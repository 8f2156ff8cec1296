//! In-memory output sink, used for previews and tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bif_math::{PixelRect, Rgba};

use super::OutputSink;
use crate::error::FilmResult;
use crate::layer::{LayerColors, LayerId};

/// Pixel data received by a [`MemoryOutput`].
#[derive(Debug, Default)]
pub struct MemoryImage {
    pub width: i32,
    pub height: i32,
    /// Row-major RGBA per (view, layer)
    pub layers: BTreeMap<(usize, LayerId), Vec<[f32; 4]>>,
    pub flushed_areas: Vec<PixelRect>,
    pub highlighted: Vec<PixelRect>,
    pub flush_count: usize,
    pub badge: Vec<String>,
}

/// Shared in-memory image.
///
/// Clones share the same buffer: hand one clone to the dispatcher and
/// keep another to read the result back.
#[derive(Debug, Clone, Default)]
pub struct MemoryOutput {
    image: Arc<Mutex<MemoryImage>>,
}

impl MemoryOutput {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            image: Arc::new(Mutex::new(MemoryImage {
                width,
                height,
                ..Default::default()
            })),
        }
    }

    /// Direct access to the received data.
    pub fn lock(&self) -> MutexGuard<'_, MemoryImage> {
        self.image.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn pixel(&self, view: usize, layer: LayerId, x: i32, y: i32) -> Option<Rgba> {
        let image = self.lock();
        if x < 0 || y < 0 || x >= image.width || y >= image.height {
            return None;
        }
        let index = (y * image.width + x) as usize;
        image
            .layers
            .get(&(view, layer))
            .map(|pixels| Rgba::from_array(pixels[index]))
    }

    /// Raw little-endian `f32` RGBA bytes of one layer.
    pub fn layer_bytes(&self, view: usize, layer: LayerId) -> Option<Vec<u8>> {
        let image = self.lock();
        image
            .layers
            .get(&(view, layer))
            .map(|pixels| bytemuck::cast_slice::<[f32; 4], u8>(pixels).to_vec())
    }

    pub fn flush_count(&self) -> usize {
        self.lock().flush_count
    }

    pub fn highlighted(&self) -> Vec<PixelRect> {
        self.lock().highlighted.clone()
    }

    pub fn flushed_areas(&self) -> Vec<PixelRect> {
        self.lock().flushed_areas.clone()
    }

    pub fn badge(&self) -> Vec<String> {
        self.lock().badge.clone()
    }
}

impl OutputSink for MemoryOutput {
    fn put_pixel(&mut self, view: usize, x: i32, y: i32, colors: &LayerColors) {
        let mut image = self.lock();
        let (width, height) = (image.width, image.height);
        if x < 0 || y < 0 || x >= width || y >= height {
            return;
        }
        let index = (y * width + x) as usize;
        let len = (width * height) as usize;
        for (layer, color) in colors.iter() {
            let pixels = image
                .layers
                .entry((view, layer))
                .or_insert_with(|| vec![layer.default_color().to_array(); len]);
            pixels[index] = color.to_array();
        }
    }

    fn flush_area(&mut self, _view: usize, x0: i32, y0: i32, x1: i32, y1: i32) -> FilmResult<()> {
        self.lock().flushed_areas.push(PixelRect::new(x0, y0, x1, y1));
        Ok(())
    }

    fn flush(&mut self, _view: usize) -> FilmResult<()> {
        self.lock().flush_count += 1;
        Ok(())
    }

    fn highlight_area(&mut self, _view: usize, x0: i32, y0: i32, x1: i32, y1: i32) {
        self.lock().highlighted.push(PixelRect::new(x0, y0, x1, y1));
    }

    fn is_hdr(&self) -> bool {
        true
    }

    fn put_badge(&mut self, _view: usize, lines: &[String]) {
        self.lock().badge = lines.to_vec();
    }
}
