//! Image file output sink.
//!
//! Collects converted pixels and writes them with the `image` crate when
//! the render is flushed. The combined layer goes to the configured path;
//! every other layer to `<stem>_<layer>.<ext>` next to it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::OutputSink;
use crate::error::{FilmError, FilmResult};
use crate::layer::{LayerColors, LayerId};

pub struct ImageFileOutput {
    path: PathBuf,
    width: i32,
    height: i32,
    hdr: bool,
    write_layers: bool,
    layers: BTreeMap<(usize, LayerId), Vec<[f32; 4]>>,
}

impl ImageFileOutput {
    /// Sink writing to `path`. An `.exr` extension selects 32-bit float
    /// output; anything else is written as 8-bit RGBA.
    pub fn new<P: AsRef<Path>>(path: P, width: i32, height: i32) -> Self {
        let path = path.as_ref().to_path_buf();
        let hdr = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("exr"))
            .unwrap_or(false);
        Self {
            path,
            width,
            height,
            hdr,
            write_layers: false,
            layers: BTreeMap::new(),
        }
    }

    /// Also write every non-combined layer to its own file.
    pub fn with_layer_files(mut self, enabled: bool) -> Self {
        self.write_layers = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name used for `layer` in `view`.
    pub fn layer_path(&self, view: usize, layer: LayerId) -> PathBuf {
        if layer == LayerId::Combined && view == 0 {
            return self.path.clone();
        }
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "render".to_string());
        let ext = self
            .path
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "png".to_string());
        let mut name = stem;
        if view > 0 {
            name.push_str(&format!("_view{}", view));
        }
        if layer != LayerId::Combined {
            name.push('_');
            name.push_str(layer.name());
        }
        self.path.with_file_name(format!("{}.{}", name, ext))
    }

    fn write(&self, view: usize, layer: LayerId, pixels: &[[f32; 4]]) -> FilmResult<()> {
        let path = self.layer_path(view, layer);
        let (w, h) = (self.width.max(0) as u32, self.height.max(0) as u32);
        if self.hdr {
            let data: Vec<f32> = pixels.iter().flatten().copied().collect();
            let buffer = image::Rgba32FImage::from_raw(w, h, data)
                .ok_or_else(|| FilmError::Config(format!("bad image size {}x{}", w, h)))?;
            image::DynamicImage::ImageRgba32F(buffer).save(&path)?;
        } else {
            let data: Vec<u8> = pixels
                .iter()
                .flatten()
                .map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
                .collect();
            let buffer = image::RgbaImage::from_raw(w, h, data)
                .ok_or_else(|| FilmError::Config(format!("bad image size {}x{}", w, h)))?;
            buffer.save(&path)?;
        }
        log::info!("Wrote {} layer to {}", layer, path.display());
        Ok(())
    }
}

impl OutputSink for ImageFileOutput {
    fn put_pixel(&mut self, view: usize, x: i32, y: i32, colors: &LayerColors) {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return;
        }
        let index = (y * self.width + x) as usize;
        let len = (self.width * self.height) as usize;
        for (layer, color) in colors.iter() {
            if layer != LayerId::Combined && !self.write_layers {
                continue;
            }
            let pixels = self
                .layers
                .entry((view, layer))
                .or_insert_with(|| vec![layer.default_color().to_array(); len]);
            pixels[index] = color.to_array();
        }
    }

    fn flush(&mut self, view: usize) -> FilmResult<()> {
        for ((v, layer), pixels) in &self.layers {
            if *v == view {
                self.write(view, *layer, pixels)?;
            }
        }
        Ok(())
    }

    fn is_hdr(&self) -> bool {
        self.hdr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bif_math::Rgba;

    #[test]
    fn test_layer_paths() {
        let output = ImageFileOutput::new("/tmp/out/shot.png", 4, 4);
        assert_eq!(output.layer_path(0, LayerId::Combined), PathBuf::from("/tmp/out/shot.png"));
        assert_eq!(output.layer_path(0, LayerId::Depth), PathBuf::from("/tmp/out/shot_depth.png"));
        assert_eq!(
            output.layer_path(1, LayerId::Combined),
            PathBuf::from("/tmp/out/shot_view1.png")
        );
        assert!(!output.is_hdr());
        assert!(ImageFileOutput::new("a.exr", 1, 1).is_hdr());
    }

    #[test]
    fn test_writes_png() {
        let dir = std::env::temp_dir().join(format!("bif_film_png_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tile.png");

        let mut output = ImageFileOutput::new(&path, 2, 2);
        let colors = LayerColors::new().with(LayerId::Combined, Rgba::new(1.0, 0.0, 0.0, 1.0));
        for y in 0..2 {
            for x in 0..2 {
                output.put_pixel(0, x, y, &colors);
            }
        }
        output.flush(0).unwrap();

        let img = image::open(&path).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (2, 2));
        assert_eq!(img.get_pixel(1, 1).0, [255, 0, 0, 255]);
        std::fs::remove_dir_all(&dir).ok();
    }
}
