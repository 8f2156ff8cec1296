//! Film configuration.
//!
//! Every option is serde-friendly so a render description can carry the
//! film settings as JSON; all structs use `#[serde(default)]` so partial
//! documents work.

use std::path::{Path, PathBuf};

use bif_math::PixelRect;
use serde::{Deserialize, Serialize};

use crate::badge::BadgeConfig;
use crate::error::{FilmError, FilmResult};
use crate::filter::FilterKind;
use crate::layer::LayerId;
use crate::tiles::{TileOrder, DEFAULT_TILE_SIZE};

/// Reconstruction filter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub kind: FilterKind,
    /// Filter width in pixels before the per-kernel radius scale.
    pub size: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            kind: FilterKind::Gauss,
            size: 1.5,
        }
    }
}

/// Tile splitting settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileConfig {
    /// Tile edge in pixels; 0 renders the region as one tile.
    pub size: i32,
    pub order: TileOrder,
    /// Worker count hint; more than one enables end-of-pass tile splitting.
    pub threads: usize,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_TILE_SIZE,
            order: TileOrder::Spiral,
            threads: 1,
        }
    }
}

/// How the adaptive threshold is lowered in dark pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DarkDetection {
    #[default]
    None,
    /// `threshold * ((1 - factor) + brightness * factor)`.
    Linear,
    /// Fixed brightness-to-threshold curve.
    Curve,
}

/// Adaptive anti-aliasing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Colour difference above which neighbours are resampled; 0 disables.
    pub threshold: f32,
    pub dark_detection: DarkDetection,
    /// Blend factor for [`DarkDetection::Linear`].
    pub dark_threshold_factor: f32,
    /// Window edge, in pixels, of the local variance check; 0 disables it.
    pub variance_edge_size: i32,
    /// Threshold crossings inside the window that force a resample.
    pub variance_pixels: i32,
    /// Also compare individual RGBA channels, not just brightness.
    pub detect_color_noise: bool,
    /// Proportional per-sample clamp of colour layers; 0 disables.
    pub clamp_samples: f32,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            threshold: 0.05,
            dark_detection: DarkDetection::None,
            dark_threshold_factor: 0.0,
            variance_edge_size: 10,
            variance_pixels: 0,
            detect_color_noise: false,
            clamp_samples: 0.0,
        }
    }
}

/// Checkpoint persistence policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CheckpointMode {
    #[default]
    Off,
    /// Write checkpoints, never read them.
    Save,
    /// Merge matching checkpoints at init, then write.
    LoadAndSave,
}

/// When checkpoints are written during a render.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum AutosaveInterval {
    #[default]
    Never,
    EveryPasses(u32),
    EverySeconds(f64),
}

/// Checkpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub mode: CheckpointMode,
    pub autosave: AutosaveInterval,
    pub directory: PathBuf,
    pub base_name: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            mode: CheckpointMode::Off,
            autosave: AutosaveInterval::Never,
            directory: PathBuf::from("."),
            base_name: "render".to_string(),
        }
    }
}

impl CheckpointConfig {
    /// Checkpoint file written by render node `node`.
    pub fn file_path(&self, node: u32) -> PathBuf {
        self.directory
            .join(format!("{}_node{:04}.film", self.base_name, node))
    }
}

/// Complete film configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilmConfig {
    /// Full image width in pixels.
    pub width: i32,
    /// Full image height in pixels.
    pub height: i32,
    /// Render border inside the image; `None` renders the whole image.
    pub region: Option<PixelRect>,
    /// Active layers. The combined layer is always added first.
    pub layers: Vec<LayerId>,
    /// Store alpha-less layers without their alpha channel.
    pub compact_opaque_layers: bool,
    pub filter: FilterConfig,
    pub tiles: TileConfig,
    pub adaptive: AdaptiveConfig,
    pub checkpoint: CheckpointConfig,
    pub premultiply_alpha: bool,
    pub estimate_density: bool,
    pub badge: BadgeConfig,
}

impl Default for FilmConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 450,
            region: None,
            layers: vec![LayerId::Combined],
            compact_opaque_layers: true,
            filter: FilterConfig::default(),
            tiles: TileConfig::default(),
            adaptive: AdaptiveConfig::default(),
            checkpoint: CheckpointConfig::default(),
            premultiply_alpha: false,
            estimate_density: false,
            badge: BadgeConfig::default(),
        }
    }
}

impl FilmConfig {
    /// Default configuration at the given resolution.
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Restrict rendering to a border region.
    pub fn with_region(mut self, region: PixelRect) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_layers(mut self, layers: &[LayerId]) -> Self {
        self.layers = layers.to_vec();
        self
    }

    pub fn with_filter(mut self, kind: FilterKind, size: f32) -> Self {
        self.filter = FilterConfig { kind, size };
        self
    }

    pub fn with_tiles(mut self, size: i32, order: TileOrder) -> Self {
        self.tiles.size = size;
        self.tiles.order = order;
        self
    }

    pub fn with_adaptive(mut self, adaptive: AdaptiveConfig) -> Self {
        self.adaptive = adaptive;
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: CheckpointConfig) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub fn with_badge(mut self, badge: BadgeConfig) -> Self {
        self.badge = badge;
        self
    }

    /// Render region, the whole image when unset.
    pub fn region(&self) -> PixelRect {
        self.region
            .unwrap_or_else(|| PixelRect::new(0, 0, self.width, self.height))
    }

    /// Active layers with the combined layer first and no duplicates.
    pub fn active_layers(&self) -> Vec<LayerId> {
        let mut layers = vec![LayerId::Combined];
        for &id in &self.layers {
            if !layers.contains(&id) {
                layers.push(id);
            }
        }
        layers
    }

    /// Check the configuration is self-consistent.
    pub fn validate(&self) -> FilmResult<()> {
        if self.width < 0 || self.height < 0 {
            return Err(FilmError::Config(format!(
                "negative resolution {}x{}",
                self.width, self.height
            )));
        }
        let region = self.region();
        if region.x0 < 0
            || region.y0 < 0
            || region.x1 > self.width
            || region.y1 > self.height
            || region.x0 > region.x1
            || region.y0 > region.y1
        {
            return Err(FilmError::Config(format!(
                "region {:?} outside {}x{} image",
                region, self.width, self.height
            )));
        }
        if self.tiles.size < 0 {
            return Err(FilmError::Config(format!("tile size {}", self.tiles.size)));
        }
        if !(self.filter.size.is_finite() && self.filter.size > 0.0) {
            return Err(FilmError::Config(format!("filter size {}", self.filter.size)));
        }
        if self.adaptive.threshold < 0.0 || !self.adaptive.threshold.is_finite() {
            return Err(FilmError::Config(format!(
                "adaptive threshold {}",
                self.adaptive.threshold
            )));
        }
        Ok(())
    }

    /// Parse a (possibly partial) JSON document.
    pub fn from_json_str(json: &str) -> FilmResult<Self> {
        let config: FilmConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> FilmResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> FilmResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_defaults_to_image() {
        let config = FilmConfig::new(64, 32);
        assert_eq!(config.region(), PixelRect::new(0, 0, 64, 32));

        let config = config.with_region(PixelRect::new(8, 8, 16, 16));
        assert_eq!(config.region().width(), 8);
    }

    #[test]
    fn test_active_layers_combined_first() {
        let config = FilmConfig::new(4, 4).with_layers(&[
            LayerId::Depth,
            LayerId::Combined,
            LayerId::Depth,
            LayerId::Normal,
        ]);
        assert_eq!(
            config.active_layers(),
            vec![LayerId::Combined, LayerId::Depth, LayerId::Normal]
        );
    }

    #[test]
    fn test_validate_rejects_bad_region() {
        let config = FilmConfig::new(10, 10).with_region(PixelRect::new(0, 0, 20, 10));
        assert!(matches!(config.validate(), Err(FilmError::Config(_))));
        assert!(FilmConfig::new(10, 10).validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{
            "width": 320,
            "height": 240,
            "filter": { "kind": "Mitchell" },
            "adaptive": { "threshold": 0.01, "dark_detection": "Curve" },
            "checkpoint": { "mode": "LoadAndSave", "autosave": { "EveryPasses": 2 } }
        }"#;
        let config = FilmConfig::from_json_str(json).unwrap();
        assert_eq!(config.width, 320);
        assert_eq!(config.filter.kind, FilterKind::Mitchell);
        assert_eq!(config.filter.size, 1.5);
        assert_eq!(config.adaptive.dark_detection, DarkDetection::Curve);
        assert_eq!(config.checkpoint.mode, CheckpointMode::LoadAndSave);
        assert_eq!(config.checkpoint.autosave, AutosaveInterval::EveryPasses(2));
        assert_eq!(config.tiles.size, DEFAULT_TILE_SIZE);
    }

    #[test]
    fn test_json_roundtrip() {
        let config = FilmConfig::new(16, 16).with_filter(FilterKind::Lanczos2, 2.0);
        let json = config.to_json().unwrap();
        assert_eq!(FilmConfig::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_checkpoint_file_name() {
        let checkpoint = CheckpointConfig {
            directory: PathBuf::from("/tmp/films"),
            base_name: "shot010".to_string(),
            ..Default::default()
        };
        assert_eq!(
            checkpoint.file_path(7),
            PathBuf::from("/tmp/films/shot010_node0007.film")
        );
    }
}
