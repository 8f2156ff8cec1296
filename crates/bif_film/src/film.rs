//! The image film: filtered accumulation of samples into layers.
//!
//! Workers share `&Film` during a pass and call [`Film::add_sample`] from
//! many threads. All layer buffers sit behind a single lock, so a sample's
//! whole footprint (every layer, every pixel) is applied atomically with
//! respect to other samples. Pass transitions, checkpoint loading and
//! re-initialisation take `&mut self` and therefore cannot overlap with
//! sampling.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use bif_math::{ColorExt, PixelRect, Rgb, Rgba};

use crate::adaptive;
use crate::badge::BadgeStats;
use crate::checkpoint::{self, FilmCheckpoint, MergeSummary};
use crate::config::{AutosaveInterval, CheckpointMode, FilmConfig};
use crate::context::RenderContext;
use crate::error::{FilmError, FilmResult};
use crate::filter::{FilterTable, Footprint};
use crate::layer::{LayerBuffer, LayerColors, LayerId, PixelCell};
use crate::mask::ResampleMask;
use crate::output::OutputDispatcher;
use crate::tiles::{Tile, TileScheduler};

/// Where one sample landed and how it relates to the sampling budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePoint {
    /// Pixel the sample belongs to (image coordinates).
    pub x: i32,
    pub y: i32,
    /// Sub-pixel position in `[0, 1)`.
    pub dx: f32,
    pub dy: f32,
    /// Sample number within the pixel for this pass.
    pub index: u32,
    /// Pass the sample was taken in.
    pub pass: u32,
    /// `1 / max possible samples per pixel`, feeds the sample-count layer.
    pub inv_max_samples: f32,
}

impl SamplePoint {
    /// A sample at `(x + dx, y + dy)` with neutral bookkeeping.
    pub fn new(x: i32, y: i32, dx: f32, dy: f32) -> Self {
        Self {
            x,
            y,
            dx,
            dy,
            index: 0,
            pass: 0,
            inv_max_samples: 1.0,
        }
    }
}

/// Light-tracing density estimate, resolved into the combined layer at
/// flush time.
#[derive(Debug, Clone)]
struct DensityBuffer {
    colors: Vec<Rgb>,
    samples: u64,
}

impl DensityBuffer {
    fn new(len: usize) -> Self {
        Self {
            colors: vec![Rgb::ZERO; len],
            samples: 0,
        }
    }

    fn clear(&mut self) {
        self.colors.fill(Rgb::ZERO);
        self.samples = 0;
    }
}

struct FilmPixels {
    layers: Vec<LayerBuffer>,
    density: DensityBuffer,
}

#[derive(Debug)]
struct AutosaveState {
    last_save: Instant,
    passes_since_save: u32,
}

pub struct Film<'ctx> {
    ctx: &'ctx RenderContext,
    config: FilmConfig,
    region: PixelRect,
    layer_ids: Vec<LayerId>,
    filter: FilterTable,
    pixels: Mutex<FilmPixels>,
    mask: ResampleMask,
    scheduler: TileScheduler<'ctx>,
    adaptive_active: bool,
    threshold: f32,
    pass: u32,
    tiles_finished: AtomicUsize,
    base_sampling_offset: u32,
    sampling_offset: u32,
    autosave: Mutex<AutosaveState>,
}

impl<'ctx> Film<'ctx> {
    /// Create a film for `config`. Buffers start empty; call
    /// [`Film::init`] before the first pass.
    pub fn new(ctx: &'ctx RenderContext, config: FilmConfig) -> FilmResult<Self> {
        config.validate()?;
        let region = config.region();
        let layer_ids = config.active_layers();
        let filter = FilterTable::new(config.filter.kind, config.filter.size);
        let (w, h) = (region.width(), region.height());
        let layers = layer_ids
            .iter()
            .map(|&id| LayerBuffer::new(id, w, h, config.compact_opaque_layers))
            .collect();
        let scheduler = TileScheduler::new(ctx, region, &config.tiles, filter.border());

        log::info!(
            "Film {}x{} region {:?}, {} layer(s), {} tile(s)",
            config.width,
            config.height,
            region,
            layer_ids.len(),
            scheduler.len()
        );

        Ok(Self {
            ctx,
            threshold: config.adaptive.threshold,
            region,
            layer_ids,
            filter,
            pixels: Mutex::new(FilmPixels {
                layers,
                density: DensityBuffer::new(region.area()),
            }),
            mask: ResampleMask::new(w, h),
            scheduler,
            adaptive_active: false,
            pass: 0,
            tiles_finished: AtomicUsize::new(0),
            base_sampling_offset: 0,
            sampling_offset: 0,
            autosave: Mutex::new(AutosaveState {
                last_save: Instant::now(),
                passes_since_save: 0,
            }),
            config,
        })
    }

    pub fn config(&self) -> &FilmConfig {
        &self.config
    }

    pub fn context(&self) -> &'ctx RenderContext {
        self.ctx
    }

    /// Full image width.
    pub fn width(&self) -> i32 {
        self.config.width
    }

    /// Full image height.
    pub fn height(&self) -> i32 {
        self.config.height
    }

    /// Rendered area in image coordinates.
    pub fn region(&self) -> PixelRect {
        self.region
    }

    pub fn layers(&self) -> &[LayerId] {
        &self.layer_ids
    }

    pub fn filter(&self) -> &FilterTable {
        &self.filter
    }

    pub fn scheduler(&self) -> &TileScheduler<'ctx> {
        &self.scheduler
    }

    /// Current pass, starting at 1 after [`Film::init`].
    pub fn pass(&self) -> u32 {
        self.pass
    }

    /// Threshold used by the last adaptive pass.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn base_sampling_offset(&self) -> u32 {
        self.base_sampling_offset
    }

    pub fn set_base_sampling_offset(&mut self, offset: u32) {
        self.base_sampling_offset = offset;
    }

    /// Sample-sequence offset, advanced by the driver after every pass so
    /// passes (and merged render nodes) use disjoint sample sequences.
    pub fn sampling_offset(&self) -> u32 {
        self.sampling_offset
    }

    pub fn set_sampling_offset(&mut self, offset: u32) {
        self.sampling_offset = offset;
    }

    fn lock_pixels(&self) -> MutexGuard<'_, FilmPixels> {
        self.pixels.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pixels_mut(&mut self) -> &mut FilmPixels {
        self.pixels.get_mut().unwrap_or_else(|e| e.into_inner())
    }

    fn slot(&self, id: LayerId) -> Option<usize> {
        self.layer_ids.iter().position(|&l| l == id)
    }

    /// Prepare for a new render: clear every buffer and the sample mask,
    /// reset the pass counter, sampling offset and tile order. With
    /// [`CheckpointMode::LoadAndSave`] matching checkpoints are merged in
    /// afterwards.
    pub fn init(&mut self, passes: u32) {
        self.clear();
        self.mask.set_all();
        self.adaptive_active = false;
        self.threshold = self.config.adaptive.threshold;
        self.pass = 1;
        self.sampling_offset = 0;
        self.scheduler.rewind();
        self.tiles_finished.store(0, Ordering::Relaxed);
        *self.autosave.get_mut().unwrap_or_else(|e| e.into_inner()) = AutosaveState {
            last_save: Instant::now(),
            passes_since_save: 0,
        };

        let ctx = self.ctx;
        ctx.stats().set_passes(1);
        ctx.progress().init(self.scheduler.len());
        ctx.progress().set_tag(&format!("Rendering pass 1 of {}...", passes.max(1)));

        if self.config.checkpoint.mode == CheckpointMode::LoadAndSave {
            let dir = self.config.checkpoint.directory.clone();
            let base = self.config.checkpoint.base_name.clone();
            match self.merge_checkpoints_in_folder(&dir, &base) {
                Ok(summary) => log::info!(
                    "Resumed from {} checkpoint(s), {} skipped",
                    summary.loaded.len(),
                    summary.skipped.len()
                ),
                Err(FilmError::NoCheckpoint { .. }) => {
                    log::info!("No checkpoints found in {}", dir.display())
                }
                Err(e) => log::warn!("Loading checkpoints from {} failed: {}", dir.display(), e),
            }
        }
    }

    /// Zero every layer and the density buffer.
    pub fn clear(&mut self) {
        let pixels = self.pixels_mut();
        for layer in &mut pixels.layers {
            layer.clear();
        }
        pixels.density.clear();
    }

    /// Next tile for a worker, `None` when the pass is exhausted or the
    /// render was cancelled.
    pub fn next_tile(&self) -> Option<Tile> {
        self.scheduler.next_tile()
    }

    /// Whether pixel `(x, y)` (image coordinates) needs samples this pass.
    pub fn do_more_samples(&self, x: i32, y: i32) -> bool {
        if !self.adaptive_active {
            return true;
        }
        self.mask.get(x - self.region.x0, y - self.region.y0)
    }

    /// Splat one sample into every active layer.
    ///
    /// `colors` holds the sample's value per layer; layers without a value
    /// are left alone. Samples outside the render region are ignored.
    pub fn add_sample(&self, colors: &LayerColors, sample: &SamplePoint) {
        let region = self.region;
        if !region.contains(sample.x, sample.y) {
            return;
        }

        // Prepare the contributions before taking the lock
        let clamp = self.config.adaptive.clamp_samples;
        let mut contributions = [(0usize, Rgba::ZERO); LayerId::COUNT];
        let mut count = 0;
        let mut count_slot = None;
        for (slot, &id) in self.layer_ids.iter().enumerate() {
            if id == LayerId::AaSamples {
                count_slot = Some(slot);
                continue;
            }
            if let Some(color) = colors.get(id) {
                let mut color = color.sanitized();
                if !id.is_data() {
                    color = color.clamp_proportional_rgb(clamp);
                }
                contributions[count] = (slot, color);
                count += 1;
            }
        }
        let contributions = &contributions[..count];

        let fp = self.filter.footprint(sample.x, sample.y, sample.dx, sample.dy, &region);
        let mut pixels = self.lock_pixels();
        self.splat(&fp, sample.x - region.x0, sample.y - region.y0, |x, y, weight| {
            for &(slot, color) in contributions {
                pixels.layers[slot].add(x, y, color, weight);
            }
        });

        if let Some(slot) = count_slot {
            let inv = sample.inv_max_samples;
            pixels.layers[slot].add_count(
                sample.x - region.x0,
                sample.y - region.y0,
                Rgba::new(inv, inv, inv, 0.0),
            );
        }
    }

    /// Accumulate a light-tracing sample into the density buffer. It only
    /// reaches the image when [`FilmConfig::estimate_density`] is set.
    pub fn add_density_sample(&self, color: Rgb, sample: &SamplePoint) {
        if !self.config.estimate_density || !self.region.contains(sample.x, sample.y) {
            return;
        }
        let region = self.region;
        let color = color.max(Rgb::ZERO);
        let fp = self.filter.footprint(sample.x, sample.y, sample.dx, sample.dy, &region);
        let width = region.width();
        let mut pixels = self.lock_pixels();
        let density = &mut pixels.density;
        self.splat(&fp, sample.x - region.x0, sample.y - region.y0, |x, y, weight| {
            if color.is_finite() {
                density.colors[(y * width + x) as usize] += color * weight;
            }
        });
        density.samples += 1;
    }

    /// Visit every pixel of a footprint with its filter weight. `(x, y)` is
    /// the sample's pixel relative to the region.
    #[inline]
    fn splat(&self, fp: &Footprint, x: i32, y: i32, mut f: impl FnMut(i32, i32, f32)) {
        for (n, j) in (fp.dy0..=fp.dy1).enumerate() {
            let y_index = fp.y_index[n];
            for (m, i) in (fp.dx0..=fp.dx1).enumerate() {
                let weight = self.filter.weight_at(fp.x_index[m], y_index);
                f(x + i, y + j, weight);
            }
        }
    }

    /// Move to the next pass and decide which pixels it samples.
    ///
    /// With `adaptive` and a positive `threshold`, only pixels flagged by
    /// the adaptive analysis are resampled; otherwise every pixel is.
    /// Returns the number of pixels to resample (0 means converged).
    pub fn next_pass(&mut self, adaptive: bool, threshold: f32) -> usize {
        self.pass += 1;
        self.scheduler.rewind();
        self.tiles_finished.store(0, Ordering::Relaxed);

        let count = if adaptive && threshold > 0.0 {
            self.adaptive_active = true;
            self.threshold = threshold;
            let pixels = self.pixels.get_mut().unwrap_or_else(|e| e.into_inner());
            adaptive::analyze(&pixels.layers[0], &mut self.mask, threshold, &self.config.adaptive)
        } else {
            self.adaptive_active = false;
            self.mask.set_all();
            self.mask.count()
        };

        let ctx = self.ctx;
        ctx.stats().set_passes(self.pass);
        ctx.stats().set_last_resampled(count);
        ctx.progress().init(self.scheduler.len());
        log::info!(
            "Pass {}: resampling {} pixel(s){}",
            self.pass,
            count,
            if self.adaptive_active {
                format!(" (threshold {:.4})", threshold)
            } else {
                String::new()
            }
        );

        if let AutosaveInterval::EveryPasses(every) = self.config.checkpoint.autosave {
            let state = self.autosave.get_mut().unwrap_or_else(|e| e.into_inner());
            state.passes_since_save += 1;
            if every > 0 && state.passes_since_save >= every {
                state.passes_since_save = 0;
                state.last_save = Instant::now();
                self.autosave_checkpoint();
            }
        }
        count
    }

    /// Normalized colours of one pixel (image coordinates) in every layer.
    fn pixel_colors(&self, pixels: &FilmPixels, x: i32, y: i32, density: Option<f32>) -> LayerColors {
        let (rx, ry) = (x - self.region.x0, y - self.region.y0);
        let mut colors = LayerColors::new();
        for layer in &pixels.layers {
            let mut color = layer.normalized(rx, ry);
            if layer.id() == LayerId::Combined {
                if let Some(scale) = density {
                    let index = (ry * self.region.width() + rx) as usize;
                    color += (pixels.density.colors[index] * scale).extend(0.0);
                }
            }
            colors.set(layer.id(), color);
        }
        colors
    }

    /// Push the current state of a finished tile to the outputs.
    ///
    /// Also drives progress and the time-based autosave. Called on the
    /// coordinating thread while workers may still be sampling.
    pub fn finish_area(&self, tile: &Tile, outputs: &mut OutputDispatcher) {
        let area = tile.rect().intersect(&self.region);
        let mut finished = Vec::with_capacity(area.area());
        {
            let pixels = self.lock_pixels();
            for y in area.y0..area.y1 {
                for x in area.x0..area.x1 {
                    finished.push(self.pixel_colors(&pixels, x, y, None));
                }
            }
        }

        let premultiply = self.config.premultiply_alpha;
        let mut colors = finished.iter();
        for y in area.y0..area.y1 {
            for x in area.x0..area.x1 {
                if let Some(c) = colors.next() {
                    outputs.put_pixel(x, y, c, premultiply);
                }
            }
        }
        outputs.flush_area(area);

        self.ctx.progress().update(1);
        let done = self.tiles_finished.fetch_add(1, Ordering::Relaxed) + 1;
        if done == self.scheduler.len() {
            log::debug!("Pass {} complete ({} tiles)", self.pass, done);
        }

        if let AutosaveInterval::EverySeconds(seconds) = self.config.checkpoint.autosave {
            let due = {
                let mut state = self.autosave.lock().unwrap_or_else(|e| e.into_inner());
                if seconds > 0.0 && state.last_save.elapsed().as_secs_f64() >= seconds {
                    state.last_save = Instant::now();
                    true
                } else {
                    false
                }
            };
            if due {
                self.autosave_checkpoint();
            }
        }
    }

    /// Push the whole image to the outputs and flush them.
    ///
    /// Resolves the density estimate into the combined layer and draws
    /// the badge if configured. Returns false if any sink failed.
    pub fn flush(&self, outputs: &mut OutputDispatcher) -> bool {
        let region = self.region;
        let (width, height) = (region.width(), region.height());
        let mut image = Vec::with_capacity(region.area());
        {
            let pixels = self.lock_pixels();
            let density = if self.config.estimate_density && pixels.density.samples > 0 {
                Some(region.area() as f32 / pixels.density.samples as f32)
            } else {
                None
            };
            for y in region.y0..region.y1 {
                for x in region.x0..region.x1 {
                    image.push(self.pixel_colors(&pixels, x, y, density));
                }
            }
        }

        let badge = &self.config.badge;
        let lines = if badge.is_enabled() {
            badge.lines(&self.badge_stats())
        } else {
            Vec::new()
        };
        if !lines.is_empty() {
            let mut combined: Vec<Rgba> = image
                .iter()
                .map(|c| c.get(LayerId::Combined).unwrap_or(Rgba::ZERO))
                .collect();
            badge.draw(&mut combined, width, height, &lines);
            for (colors, color) in image.iter_mut().zip(combined) {
                colors.set(LayerId::Combined, color);
            }
        }

        let premultiply = self.config.premultiply_alpha;
        let mut colors = image.iter();
        for y in region.y0..region.y1 {
            for x in region.x0..region.x1 {
                if let Some(c) = colors.next() {
                    outputs.put_pixel(x, y, c, premultiply);
                }
            }
        }
        if !lines.is_empty() {
            outputs.put_badge(&lines);
        }
        let ok = outputs.flush();
        self.ctx.progress().done();
        ok
    }

    /// Statistics printed in the badge.
    pub fn badge_stats(&self) -> BadgeStats {
        let stats = self.ctx.stats();
        BadgeStats {
            width: self.config.width,
            height: self.config.height,
            filter: self.filter.kind(),
            filter_width: self.filter.half_width() * 2.0,
            passes: self.pass,
            samples: stats.samples(),
            threshold: if self.adaptive_active { self.threshold } else { 0.0 },
            threads: stats.threads(),
            render_time: self.ctx.elapsed(),
        }
    }

    /// Raw accumulator cell of a layer (image coordinates).
    pub fn cell(&self, layer: LayerId, x: i32, y: i32) -> Option<PixelCell> {
        let slot = self.slot(layer)?;
        if !self.region.contains(x, y) {
            return None;
        }
        let pixels = self.lock_pixels();
        Some(pixels.layers[slot].cell(x - self.region.x0, y - self.region.y0))
    }

    /// Normalized colour of a layer (image coordinates).
    pub fn normalized(&self, layer: LayerId, x: i32, y: i32) -> Option<Rgba> {
        let slot = self.slot(layer)?;
        if !self.region.contains(x, y) {
            return None;
        }
        let pixels = self.lock_pixels();
        Some(pixels.layers[slot].normalized(x - self.region.x0, y - self.region.y0))
    }

    /// Run `f` with read access to every layer buffer.
    pub fn with_layers<R>(&self, f: impl FnOnce(&[LayerBuffer]) -> R) -> R {
        let pixels = self.lock_pixels();
        f(&pixels.layers)
    }

    /// Sum checkpoint layers into this film. Caller validated the shape.
    pub(crate) fn merge_layers(&mut self, layers: &[LayerBuffer]) {
        let pixels = self.pixels_mut();
        for (dst, src) in pixels.layers.iter_mut().zip(layers) {
            dst.merge(src);
        }
    }

    /// Write the current state to `path`.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, path: P) -> FilmResult<()> {
        FilmCheckpoint::capture(self).save(path)
    }

    /// Add a checkpoint's accumulated samples to this film. On any
    /// validation error the film is left untouched.
    pub fn merge_checkpoint<P: AsRef<Path>>(&mut self, path: P) -> FilmResult<()> {
        let checkpoint = FilmCheckpoint::load(path)?;
        checkpoint.validate_for(self)?;
        self.merge_layers(&checkpoint.layers);
        self.sampling_offset = self.sampling_offset.max(checkpoint.header.sampling_offset);
        self.base_sampling_offset = self
            .base_sampling_offset
            .max(checkpoint.header.base_sampling_offset);
        Ok(())
    }

    /// Replace this film's state with a checkpoint. On any validation
    /// error the film is left untouched.
    pub fn resume_from_checkpoint<P: AsRef<Path>>(&mut self, path: P) -> FilmResult<()> {
        let checkpoint = FilmCheckpoint::load(path)?;
        checkpoint.validate_for(self)?;
        self.clear();
        self.merge_layers(&checkpoint.layers);
        self.sampling_offset = checkpoint.header.sampling_offset;
        self.base_sampling_offset = checkpoint.header.base_sampling_offset;
        Ok(())
    }

    /// Merge every readable checkpoint named `<base_name>*.film` in `dir`.
    ///
    /// Unreadable or mismatching files are skipped with a warning. Fails
    /// with [`FilmError::NoCheckpoint`] when there is nothing to merge.
    pub fn merge_checkpoints_in_folder<P: AsRef<Path>>(
        &mut self,
        dir: P,
        base_name: &str,
    ) -> FilmResult<MergeSummary> {
        let dir = dir.as_ref();
        let paths = checkpoint::find_checkpoints(dir, base_name)?;
        if paths.is_empty() {
            return Err(FilmError::NoCheckpoint {
                dir: dir.to_path_buf(),
                base_name: base_name.to_string(),
            });
        }
        let mut summary = MergeSummary::default();
        for path in paths {
            match self.merge_checkpoint(&path) {
                Ok(()) => {
                    log::info!("Merged checkpoint {}", path.display());
                    summary.loaded.push(path);
                }
                Err(e) => {
                    log::warn!("Skipping checkpoint {}: {}", path.display(), e);
                    summary.skipped.push((path, e.to_string()));
                }
            }
        }
        Ok(summary)
    }

    /// Checkpoint path of this render node.
    pub fn checkpoint_path(&self) -> std::path::PathBuf {
        self.config.checkpoint.file_path(self.ctx.computer_node())
    }

    fn autosave_checkpoint(&self) {
        if self.config.checkpoint.mode == CheckpointMode::Off {
            return;
        }
        let path = self.checkpoint_path();
        match FilmCheckpoint::capture(self).save_with_backup(&path) {
            Ok(()) => log::info!("Autosaved checkpoint {}", path.display()),
            Err(e) => log::warn!("Autosave to {} failed: {}", path.display(), e),
        }
    }

    /// Write the end-of-render checkpoint if checkpoints are enabled.
    /// Returns false when saving was required and failed.
    pub fn save_final_checkpoint(&self) -> bool {
        if self.config.checkpoint.mode == CheckpointMode::Off {
            return true;
        }
        let path = self.checkpoint_path();
        match FilmCheckpoint::capture(self).save_with_backup(&path) {
            Ok(()) => {
                log::info!("Saved checkpoint {}", path.display());
                true
            }
            Err(e) => {
                log::error!("Saving checkpoint {} failed: {}", path.display(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdaptiveConfig, CheckpointConfig};
    use crate::filter::FilterKind;
    use crate::output::{MemoryOutput, OutputSettings};
    use crate::tiles::TileOrder;

    fn box_config(w: i32, h: i32) -> FilmConfig {
        FilmConfig::new(w, h)
            .with_filter(FilterKind::Box, 1.0)
            .with_tiles(0, TileOrder::Linear)
    }

    fn temp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("bif_film_autosave_{}_{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn checkpoint_config(dir: &Path, mode: CheckpointMode, autosave: AutosaveInterval) -> FilmConfig {
        box_config(4, 4).with_checkpoint(CheckpointConfig {
            mode,
            autosave,
            directory: dir.to_path_buf(),
            base_name: "shot".to_string(),
        })
    }

    fn one_sample(film: &Film<'_>) {
        let colors = LayerColors::new().with(LayerId::Combined, Rgba::ONE);
        film.add_sample(&colors, &SamplePoint::new(1, 1, 0.5, 0.5));
    }

    #[test]
    fn test_box_filter_single_sample() {
        let ctx = RenderContext::new();
        let mut film = Film::new(&ctx, box_config(4, 4)).unwrap();
        film.init(1);

        let colors = LayerColors::new().with(LayerId::Combined, Rgba::new(1.0, 0.0, 0.0, 1.0));
        film.add_sample(&colors, &SamplePoint::new(1, 1, 0.5, 0.5));

        let cell = film.cell(LayerId::Combined, 1, 1).unwrap();
        assert_eq!(cell.weight, 1.0);
        assert_eq!(cell.color(), Rgba::new(1.0, 0.0, 0.0, 1.0));
        for y in 0..4 {
            for x in 0..4 {
                if (x, y) != (1, 1) {
                    assert_eq!(film.cell(LayerId::Combined, x, y).unwrap().weight, 0.0);
                }
            }
        }
    }

    #[test]
    fn test_weights_never_decrease() {
        let ctx = RenderContext::new();
        let config = FilmConfig::new(8, 8).with_filter(FilterKind::Mitchell, 2.0);
        let film = Film::new(&ctx, config).unwrap();

        let colors = LayerColors::new().with(LayerId::Combined, Rgba::ONE);
        let mut previous = vec![0.0; 64];
        for step in 0..20 {
            let d = step as f32 / 20.0;
            film.add_sample(&colors, &SamplePoint::new(3 + step % 3, 4, d, 1.0 - d - 0.01));
            for (n, prev) in previous.iter_mut().enumerate() {
                let w = film.cell(LayerId::Combined, n as i32 % 8, n as i32 / 8).unwrap().weight;
                assert!(w >= *prev);
                *prev = w;
            }
        }
    }

    #[test]
    fn test_lanczos_sample_reaches_own_pixel() {
        let ctx = RenderContext::new();
        let colors = LayerColors::new().with(LayerId::Combined, Rgba::ONE);
        for size in [1.0, 1.5, 2.0] {
            let config = FilmConfig::new(8, 8).with_filter(FilterKind::Lanczos2, size);
            let film = Film::new(&ctx, config).unwrap();
            film.add_sample(&colors, &SamplePoint::new(3, 3, 0.05, 0.05));
            let w = film.cell(LayerId::Combined, 3, 3).unwrap().weight;
            assert!(w > 0.0, "size {} own weight {}", size, w);
        }
    }

    #[test]
    fn test_sample_outside_region_ignored() {
        let ctx = RenderContext::new();
        let config = box_config(8, 8).with_region(PixelRect::new(2, 2, 6, 6));
        let film = Film::new(&ctx, config).unwrap();
        let colors = LayerColors::new().with(LayerId::Combined, Rgba::ONE);

        film.add_sample(&colors, &SamplePoint::new(0, 0, 0.5, 0.5));
        film.add_sample(&colors, &SamplePoint::new(2, 2, 0.5, 0.5));
        assert!(film.cell(LayerId::Combined, 0, 0).is_none());
        assert_eq!(film.cell(LayerId::Combined, 2, 2).unwrap().weight, 1.0);
    }

    #[test]
    fn test_bad_samples_are_sanitized() {
        let ctx = RenderContext::new();
        let film = Film::new(&ctx, box_config(2, 2)).unwrap();
        let colors = LayerColors::new().with(LayerId::Combined, Rgba::new(f32::NAN, -1.0, f32::INFINITY, 1.0));
        film.add_sample(&colors, &SamplePoint::new(0, 0, 0.5, 0.5));
        let c = film.normalized(LayerId::Combined, 0, 0).unwrap();
        assert_eq!(c, Rgba::new(0.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn test_clamp_samples_proportional() {
        let ctx = RenderContext::new();
        let config = box_config(2, 1)
            .with_layers(&[LayerId::Depth])
            .with_adaptive(AdaptiveConfig {
                clamp_samples: 1.0,
                ..Default::default()
            });
        let film = Film::new(&ctx, config).unwrap();
        let colors = LayerColors::new()
            .with(LayerId::Combined, Rgba::new(4.0, 2.0, 0.0, 1.0))
            .with(LayerId::Depth, Rgba::new(4.0, 4.0, 4.0, 1.0));
        film.add_sample(&colors, &SamplePoint::new(0, 0, 0.5, 0.5));

        let c = film.normalized(LayerId::Combined, 0, 0).unwrap();
        assert!((c.x - 1.0).abs() < 1e-6 && (c.y - 0.5).abs() < 1e-6);
        // Data layers are not clamped
        assert_eq!(film.normalized(LayerId::Depth, 0, 0).unwrap().x, 4.0);
    }

    #[test]
    fn test_sample_count_layer() {
        let ctx = RenderContext::new();
        let config = FilmConfig::new(4, 4)
            .with_filter(FilterKind::Gauss, 2.0)
            .with_layers(&[LayerId::AaSamples]);
        let film = Film::new(&ctx, config).unwrap();
        let colors = LayerColors::new().with(LayerId::Combined, Rgba::ONE);
        let mut sample = SamplePoint::new(1, 2, 0.5, 0.5);
        sample.inv_max_samples = 0.25;
        film.add_sample(&colors, &sample);
        film.add_sample(&colors, &sample);

        let count = film.normalized(LayerId::AaSamples, 1, 2).unwrap();
        assert!((count.x - 0.5).abs() < 1e-6);
        // Only the sample's own pixel counts, whatever the filter reach
        assert_eq!(film.cell(LayerId::AaSamples, 2, 2).unwrap().weight, 0.0);
        assert!(film.cell(LayerId::Combined, 2, 2).unwrap().weight > 0.0);
    }

    #[test]
    fn test_concurrent_samples_all_land() {
        let ctx = RenderContext::new();
        let film = Film::new(&ctx, box_config(16, 16)).unwrap();
        let colors = LayerColors::new().with(LayerId::Combined, Rgba::ONE);

        std::thread::scope(|s| {
            for t in 0..4 {
                let film = &film;
                s.spawn(move || {
                    for n in 0..1000 {
                        let x = (n + t) % 16;
                        film.add_sample(&colors, &SamplePoint::new(x, n % 16, 0.5, 0.5));
                    }
                });
            }
        });

        let total: f32 = film.with_layers(|layers| layers[0].cells().iter().map(|c| c.weight).sum());
        assert_eq!(total, 4000.0);
    }

    #[test]
    fn test_next_pass_adaptive_converges() {
        let ctx = RenderContext::new();
        let mut film = Film::new(&ctx, box_config(8, 8)).unwrap();
        film.init(4);
        assert!(film.do_more_samples(3, 3));

        let colors = LayerColors::new().with(LayerId::Combined, Rgba::new(0.5, 0.5, 0.5, 1.0));
        for y in 0..8 {
            for x in 0..8 {
                film.add_sample(&colors, &SamplePoint::new(x, y, 0.5, 0.5));
            }
        }
        assert_eq!(film.next_pass(true, 0.05), 0);
        assert_eq!(film.pass(), 2);
        assert!(!film.do_more_samples(3, 3));
        assert_eq!(ctx.stats().last_resampled(), 0);

        // Non-adaptive passes resample everything
        assert_eq!(film.next_pass(false, 0.05), 64);
        assert!(film.do_more_samples(3, 3));
    }

    #[test]
    fn test_finish_area_and_flush() {
        let ctx = RenderContext::new();
        let mut film = Film::new(&ctx, box_config(4, 4).with_tiles(2, TileOrder::Linear)).unwrap();
        film.init(1);
        let memory = MemoryOutput::new(4, 4);
        let mut outputs = OutputDispatcher::new(Box::new(memory.clone()), OutputSettings::linear());

        let colors = LayerColors::new().with(LayerId::Combined, Rgba::new(0.25, 0.5, 0.75, 1.0));
        let mut finished = 0;
        while let Some(tile) = film.next_tile() {
            for y in tile.y..tile.y + tile.height {
                for x in tile.x..tile.x + tile.width {
                    film.add_sample(&colors, &SamplePoint::new(x, y, 0.5, 0.5));
                }
            }
            film.finish_area(&tile, &mut outputs);
            finished += 1;
        }
        assert_eq!(finished, 4);
        assert_eq!(memory.flushed_areas().len(), 4);
        assert_eq!(
            memory.pixel(0, LayerId::Combined, 3, 3),
            Some(Rgba::new(0.25, 0.5, 0.75, 1.0))
        );

        assert!(film.flush(&mut outputs));
        assert_eq!(memory.flush_count(), 1);
    }

    #[test]
    fn test_density_added_at_flush() {
        let ctx = RenderContext::new();
        let mut config = box_config(2, 2);
        config.estimate_density = true;
        let mut film = Film::new(&ctx, config).unwrap();
        film.init(1);
        film.add_density_sample(Rgb::new(1.0, 1.0, 1.0), &SamplePoint::new(0, 0, 0.5, 0.5));
        film.add_density_sample(Rgb::new(1.0, 1.0, 1.0), &SamplePoint::new(1, 1, 0.5, 0.5));

        let memory = MemoryOutput::new(2, 2);
        let mut outputs = OutputDispatcher::new(Box::new(memory.clone()), OutputSettings::linear());
        film.flush(&mut outputs);

        // 4 pixels / 2 samples scales each splat by 2
        let c = memory.pixel(0, LayerId::Combined, 0, 0).unwrap();
        assert!((c.x - 2.0).abs() < 1e-6);
        assert_eq!(memory.pixel(0, LayerId::Combined, 1, 0).unwrap().x, 0.0);
    }

    #[test]
    fn test_init_merges_checkpoints_when_loading() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = temp_dir("resume");
        let ctx = RenderContext::new();

        // Nothing to load yet: init still succeeds with an empty film
        let config = checkpoint_config(&dir, CheckpointMode::LoadAndSave, AutosaveInterval::Never);
        let mut film = Film::new(&ctx, config.clone()).unwrap();
        film.init(1);
        assert_eq!(film.cell(LayerId::Combined, 1, 1).unwrap().weight, 0.0);

        one_sample(&film);
        assert!(film.save_final_checkpoint());

        let mut resumed = Film::new(&ctx, config).unwrap();
        resumed.init(1);
        assert_eq!(resumed.cell(LayerId::Combined, 1, 1).unwrap().weight, 1.0);

        // Save-only mode never reads
        let save_only = checkpoint_config(&dir, CheckpointMode::Save, AutosaveInterval::Never);
        let mut fresh = Film::new(&ctx, save_only).unwrap();
        fresh.init(1);
        assert_eq!(fresh.cell(LayerId::Combined, 1, 1).unwrap().weight, 0.0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_autosave_every_passes_keeps_backup() {
        let dir = temp_dir("passes");
        let ctx = RenderContext::new();
        let config = checkpoint_config(&dir, CheckpointMode::Save, AutosaveInterval::EveryPasses(2));
        let mut film = Film::new(&ctx, config).unwrap();
        film.init(5);
        one_sample(&film);

        let path = film.checkpoint_path();
        let bak = dir.join("shot_node0000.film.bak");
        film.next_pass(false, 0.0);
        assert!(!path.exists());
        film.next_pass(false, 0.0);
        assert!(path.exists());
        assert!(!bak.exists());
        film.next_pass(false, 0.0);
        film.next_pass(false, 0.0);
        assert!(path.exists());
        assert!(bak.exists());

        let header = checkpoint::read_header(&path).unwrap();
        assert_eq!(header.width, 4);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_autosave_every_seconds_on_finished_tiles() {
        let dir = temp_dir("seconds");
        let ctx = RenderContext::new();
        let memory = MemoryOutput::new(4, 4);
        let mut outputs = OutputDispatcher::new(Box::new(memory.clone()), OutputSettings::linear());

        let slow = checkpoint_config(&dir, CheckpointMode::Save, AutosaveInterval::EverySeconds(3600.0));
        let mut film = Film::new(&ctx, slow).unwrap();
        film.init(1);
        one_sample(&film);
        let tile = film.next_tile().unwrap();
        film.finish_area(&tile, &mut outputs);
        assert!(!film.checkpoint_path().exists());

        let fast = checkpoint_config(&dir, CheckpointMode::Save, AutosaveInterval::EverySeconds(0.001));
        let mut film = Film::new(&ctx, fast).unwrap();
        film.init(1);
        one_sample(&film);
        let tile = film.next_tile().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        film.finish_area(&tile, &mut outputs);
        assert!(film.checkpoint_path().exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_checkpoints_off_writes_nothing() {
        let dir = temp_dir("off");
        let ctx = RenderContext::new();
        let config = checkpoint_config(&dir, CheckpointMode::Off, AutosaveInterval::EveryPasses(1));
        let mut film = Film::new(&ctx, config).unwrap();
        film.init(2);
        one_sample(&film);
        film.next_pass(false, 0.0);
        assert!(film.save_final_checkpoint());
        assert!(!film.checkpoint_path().exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_final_checkpoint_failure_reported() {
        let dir = temp_dir("blocked");
        // A file where the checkpoint directory should be
        let blocked = dir.join("not_a_dir");
        std::fs::write(&blocked, b"x").unwrap();
        let ctx = RenderContext::new();
        let config = checkpoint_config(&blocked, CheckpointMode::Save, AutosaveInterval::Never);
        let mut film = Film::new(&ctx, config).unwrap();
        film.init(1);
        one_sample(&film);
        assert!(!film.save_final_checkpoint());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_region_offsets_outputs() {
        let ctx = RenderContext::new();
        let config = box_config(8, 8).with_region(PixelRect::new(4, 4, 8, 8));
        let mut film = Film::new(&ctx, config).unwrap();
        film.init(1);
        film.add_sample(
            &LayerColors::new().with(LayerId::Combined, Rgba::ONE),
            &SamplePoint::new(5, 6, 0.5, 0.5),
        );
        let memory = MemoryOutput::new(8, 8);
        let mut outputs = OutputDispatcher::new(Box::new(memory.clone()), OutputSettings::linear());
        film.flush(&mut outputs);
        assert_eq!(memory.pixel(0, LayerId::Combined, 5, 6), Some(Rgba::ONE));
    }
}
