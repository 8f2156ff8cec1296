//! Multi-pass progressive render driver.
//!
//! Each pass runs a set of workers on a rayon pool. Workers pull tiles from
//! the film, sample every pixel the film still wants samples for and
//! report tile start/finish over a channel. The calling thread acts as the
//! coordinator: it highlights started tiles, hands finished tiles to the
//! outputs and runs the pass transitions.

use std::sync::mpsc;
use std::time::Duration;

use bif_film::{Film, FilmError, LayerColors, OutputDispatcher, SamplePoint, Tile};
use bif_math::Rgb;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Boundary to whatever produces radiance for a camera sample.
pub trait SampleSource: Sync {
    /// Evaluate a sample and write its value for each layer into `out`.
    /// Layers left unset are not touched by this sample.
    fn sample(&self, point: &SamplePoint, out: &mut LayerColors);

    /// Optional light-tracing contribution for density estimation.
    fn density(&self, _point: &SamplePoint) -> Option<Rgb> {
        None
    }
}

/// Errors that stop a render before it starts.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Film error: {0}")]
    Film(#[from] FilmError),

    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Invalid render settings: {0}")]
    InvalidSettings(String),
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Render loop configuration.
#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Maximum number of passes
    pub passes: u32,
    /// Samples per pixel in the first pass
    pub samples: u32,
    /// Samples per resampled pixel in later passes
    pub inc_samples: u32,
    /// Growth factor of `inc_samples` per pass
    pub sample_multiplier: f32,
    /// Worker threads; 0 uses one per core
    pub threads: usize,
    /// Percentage of region pixels below which the AA threshold is lowered
    pub resampled_floor: f32,
    /// Fraction the AA threshold drops by when under the floor
    pub threshold_change_rate: f32,
    /// Mixed into every tile's random seed
    pub seed: u64,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            passes: 1,
            samples: 16,
            inc_samples: 16,
            sample_multiplier: 1.0,
            threads: 0,
            resampled_floor: 0.0,
            threshold_change_rate: 0.0,
            seed: 0,
        }
    }
}

impl RenderSettings {
    pub fn validate(&self) -> RenderResult<()> {
        if self.passes == 0 {
            return Err(RenderError::InvalidSettings("passes must be >= 1".into()));
        }
        if self.samples == 0 {
            return Err(RenderError::InvalidSettings("samples must be >= 1".into()));
        }
        if !(self.sample_multiplier.is_finite() && self.sample_multiplier > 0.0) {
            return Err(RenderError::InvalidSettings(format!(
                "sample multiplier {}",
                self.sample_multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold_change_rate) {
            return Err(RenderError::InvalidSettings(format!(
                "threshold change rate {} outside [0, 1]",
                self.threshold_change_rate
            )));
        }
        Ok(())
    }

    /// Samples per pixel taken in `pass` (1-based).
    pub fn pass_samples(&self, pass: u32) -> u32 {
        if pass <= 1 {
            return self.samples;
        }
        let scaled = self.inc_samples as f32 * self.sample_multiplier.powi(pass as i32 - 1);
        (scaled.ceil() as u32).max(1)
    }

    /// Most samples a single pixel can receive over the whole render.
    pub fn max_samples(&self) -> u64 {
        (1..=self.passes).map(|p| self.pass_samples(p) as u64).sum()
    }
}

/// Outcome of a render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSummary {
    /// Passes actually rendered
    pub passes: u32,
    pub samples: u64,
    /// Stopped early because no pixel needed more samples
    pub converged: bool,
    pub cancelled: bool,
    /// AA threshold after any floor adjustments
    pub threshold: f32,
    pub elapsed: Duration,
}

enum TileEvent {
    Started(Tile),
    Finished(Tile),
}

/// Everything a worker needs for one pass.
struct PassJob<'a, 'ctx> {
    film: &'a Film<'ctx>,
    source: &'a dyn SampleSource,
    pass: u32,
    samples: u32,
    /// First sample index of this pass
    offset: u32,
    inv_max_samples: f32,
    seed: u64,
    density: bool,
}

/// SplitMix64 finaliser.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

impl PassJob<'_, '_> {
    fn tile_seed(&self, tile: &Tile) -> u64 {
        mix(self.seed ^ mix(tile.index as u64) ^ mix(((self.pass as u64) << 32) | self.offset as u64))
    }

    fn run_worker(&self, events: &mpsc::Sender<TileEvent>) {
        let film = self.film;
        let stats = film.context().stats();
        let mut colors = LayerColors::new();

        while let Some(tile) = film.next_tile() {
            if events.send(TileEvent::Started(tile)).is_err() {
                break;
            }
            log::trace!("Pass {} tile {} started", self.pass, tile.index);

            let mut rng = StdRng::seed_from_u64(self.tile_seed(&tile));
            let mut taken = 0u64;
            for y in tile.y..tile.y + tile.height {
                for x in tile.x..tile.x + tile.width {
                    if !film.do_more_samples(x, y) {
                        continue;
                    }
                    for s in 0..self.samples {
                        let point = SamplePoint {
                            x,
                            y,
                            dx: rng.gen(),
                            dy: rng.gen(),
                            index: self.offset.wrapping_add(s),
                            pass: self.pass,
                            inv_max_samples: self.inv_max_samples,
                        };
                        colors.clear();
                        self.source.sample(&point, &mut colors);
                        film.add_sample(&colors, &point);
                        if self.density {
                            if let Some(light) = self.source.density(&point) {
                                film.add_density_sample(light, &point);
                            }
                        }
                    }
                    taken += self.samples as u64;
                }
            }
            stats.add_samples(taken);

            if events.send(TileEvent::Finished(tile)).is_err() {
                break;
            }
        }
    }
}

fn build_thread_pool(threads: usize) -> RenderResult<rayon::ThreadPool> {
    let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("bif-render-{}", i));
    if threads > 0 {
        builder = builder.num_threads(threads);
    }
    Ok(builder.build()?)
}

fn render_pass(
    pool: &rayon::ThreadPool,
    workers: usize,
    job: &PassJob<'_, '_>,
    outputs: &mut OutputDispatcher,
) {
    let (tx, rx) = mpsc::channel();
    pool.in_place_scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            scope.spawn(move |_| job.run_worker(&tx));
        }
        drop(tx);

        for event in rx {
            match event {
                TileEvent::Started(tile) => outputs.highlight_area(tile.rect()),
                TileEvent::Finished(tile) => job.film.finish_area(&tile, outputs),
            }
        }
    });
}

/// Render `source` into `film` progressively.
///
/// Initialises the film, runs up to `settings.passes` passes (stopping
/// early once adaptive AA finds nothing left to resample or the render
/// context is cancelled), then flushes the outputs and writes the final
/// checkpoint if checkpoints are enabled.
pub fn render(
    film: &mut Film<'_>,
    source: &dyn SampleSource,
    outputs: &mut OutputDispatcher,
    settings: &RenderSettings,
) -> RenderResult<RenderSummary> {
    settings.validate()?;
    let pool = build_thread_pool(settings.threads)?;
    let workers = pool.current_num_threads();
    let ctx = film.context();
    ctx.stats().set_threads(workers);

    film.init(settings.passes);
    let inv_max_samples = 1.0 / settings.max_samples() as f32;
    let mut threshold = film.config().adaptive.threshold;
    let adaptive = threshold > 0.0;
    let region_pixels = film.region().area() as f32;
    let density = film.config().estimate_density;

    log::info!(
        "Rendering {} pass(es), {} sample(s) first pass, {} worker(s)",
        settings.passes,
        settings.samples,
        workers
    );

    let mut summary = RenderSummary {
        passes: 0,
        samples: 0,
        converged: false,
        cancelled: false,
        threshold,
        elapsed: Duration::ZERO,
    };

    for pass in 1..=settings.passes {
        if ctx.is_cancelled() {
            break;
        }
        if pass > 1 {
            let resampled = film.next_pass(adaptive, threshold);
            if resampled == 0 {
                log::info!("Converged after {} pass(es)", pass - 1);
                summary.converged = true;
                break;
            }
            let floor = settings.resampled_floor / 100.0 * region_pixels;
            if settings.resampled_floor > 0.0 && (resampled as f32) < floor {
                threshold *= 1.0 - settings.threshold_change_rate;
                log::info!(
                    "{} pixel(s) resampled, under the floor of {:.0}: AA threshold now {:.5}",
                    resampled,
                    floor,
                    threshold
                );
            }
        }

        let samples = settings.pass_samples(pass);
        ctx.progress()
            .set_tag(&format!("Rendering pass {} of {}...", pass, settings.passes));
        let job = PassJob {
            film: &*film,
            source,
            pass,
            samples,
            offset: film.base_sampling_offset().wrapping_add(film.sampling_offset()),
            inv_max_samples,
            seed: settings.seed,
            density,
        };
        render_pass(&pool, workers, &job, outputs);

        summary.passes = pass;
        let offset = film.sampling_offset().wrapping_add(samples);
        film.set_sampling_offset(offset);
    }

    summary.cancelled = ctx.is_cancelled();
    if summary.cancelled {
        log::warn!("Render cancelled after {} pass(es)", summary.passes);
    }

    film.flush(outputs);
    film.save_final_checkpoint();

    summary.samples = ctx.stats().samples();
    summary.threshold = threshold;
    summary.elapsed = ctx.elapsed();
    log::info!(
        "Render finished: {} pass(es), {} samples in {:.2}s",
        summary.passes,
        summary.samples,
        summary.elapsed.as_secs_f64()
    );
    Ok(summary)
}
