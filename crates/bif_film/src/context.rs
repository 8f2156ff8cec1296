//! Per-render shared state.
//!
//! A [`RenderContext`] lives exactly as long as one render invocation and
//! is borrowed by the film and the tile scheduler. It carries the
//! cancellation flag, timers, the progress reporter and the statistics the
//! badge prints.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Receives progress at tile and pass granularity.
pub trait ProgressReporter: Send + Sync {
    /// Start a new progress run of `total` steps.
    fn init(&self, total: usize);
    /// Advance by `steps`.
    fn update(&self, steps: usize);
    /// Describe the current stage ("Rendering pass 2 of 8...").
    fn set_tag(&self, tag: &str);
    /// Mark the run complete.
    fn done(&self);
}

/// Discards all progress.
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn init(&self, _total: usize) {}
    fn update(&self, _steps: usize) {}
    fn set_tag(&self, _tag: &str) {}
    fn done(&self) {}
}

#[derive(Debug, Default)]
struct ProgressState {
    total: usize,
    done: usize,
    last_decile: usize,
    tag: String,
}

impl ProgressState {
    fn percent(&self) -> f32 {
        if self.total == 0 {
            100.0
        } else {
            100.0 * self.done.min(self.total) as f32 / self.total as f32
        }
    }
}

/// Logs progress every 10% and on every tag change.
#[derive(Debug, Default)]
pub struct LogProgress {
    state: Mutex<ProgressState>,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completion of the current run in percent.
    pub fn percent(&self) -> f32 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).percent()
    }
}

impl ProgressReporter for LogProgress {
    fn init(&self, total: usize) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.total = total;
        state.done = 0;
        state.last_decile = 0;
    }

    fn update(&self, steps: usize) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.done += steps;
        let decile = (state.percent() / 10.0) as usize;
        if decile > state.last_decile {
            state.last_decile = decile;
            log::info!("{} {:.0}%", state.tag, state.percent());
        }
    }

    fn set_tag(&self, tag: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.tag != tag {
            state.tag = tag.to_string();
            log::info!("{}", tag);
        }
    }

    fn done(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.done = state.total;
        log::debug!("{} done", state.tag);
    }
}

/// Counters updated by the render driver and read by the badge.
#[derive(Debug, Default)]
pub struct RenderStats {
    passes: AtomicU32,
    samples: AtomicU64,
    last_resampled: AtomicUsize,
    threads: AtomicUsize,
}

impl RenderStats {
    pub fn passes(&self) -> u32 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn set_passes(&self, passes: u32) {
        self.passes.store(passes, Ordering::Relaxed);
    }

    /// Camera samples taken so far.
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn add_samples(&self, samples: u64) {
        self.samples.fetch_add(samples, Ordering::Relaxed);
    }

    /// Pixels flagged for resampling by the last adaptive pass.
    pub fn last_resampled(&self) -> usize {
        self.last_resampled.load(Ordering::Relaxed)
    }

    pub fn set_last_resampled(&self, count: usize) {
        self.last_resampled.store(count, Ordering::Relaxed);
    }

    pub fn threads(&self) -> usize {
        self.threads.load(Ordering::Relaxed)
    }

    pub fn set_threads(&self, threads: usize) {
        self.threads.store(threads, Ordering::Relaxed);
    }
}

/// State scoped to a single render.
pub struct RenderContext {
    cancelled: AtomicBool,
    started: Instant,
    computer_node: u32,
    progress: Box<dyn ProgressReporter>,
    stats: RenderStats,
}

impl RenderContext {
    /// Create a context with no progress output, node 0.
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            started: Instant::now(),
            computer_node: 0,
            progress: Box::new(NullProgress),
            stats: RenderStats::default(),
        }
    }

    /// Set the render-farm node id written into checkpoints.
    pub fn with_node(mut self, node: u32) -> Self {
        self.computer_node = node;
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn computer_node(&self) -> u32 {
        self.computer_node
    }

    /// Ask the render to stop. Tiles already in flight complete.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Time since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn progress(&self) -> &dyn ProgressReporter {
        self.progress.as_ref()
    }

    pub fn stats(&self) -> &RenderStats {
        &self.stats
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new()
    }
}
