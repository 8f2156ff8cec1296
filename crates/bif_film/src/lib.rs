//! bif_film: the image film of the BIF renderer.
//!
//! Collects radiance samples from many worker threads, reconstructs pixels
//! through a tabulated filter, decides which pixels need more samples,
//! persists its state as checkpoints and hands finished pixels to output
//! sinks.
//!
//! A typical render:
//!
//! 1. build a [`FilmConfig`] and a [`RenderContext`]
//! 2. [`Film::new`], then [`Film::init`]
//! 3. workers loop on [`Film::next_tile`], sample pixels for which
//!    [`Film::do_more_samples`] holds and call [`Film::add_sample`]
//! 4. the coordinator calls [`Film::finish_area`] per finished tile and
//!    [`Film::next_pass`] between passes
//! 5. [`Film::flush`] and [`Film::save_final_checkpoint`]

pub mod adaptive;
pub mod badge;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod error;
pub mod film;
pub mod filter;
mod font;
pub mod layer;
pub mod mask;
pub mod output;
pub mod tiles;

pub use badge::{BadgeConfig, BadgePosition, BadgeStats};
pub use checkpoint::{read_header, CheckpointHeader, FilmCheckpoint, MergeSummary};
pub use config::{
    AdaptiveConfig, AutosaveInterval, CheckpointConfig, CheckpointMode, DarkDetection, FilmConfig,
    FilterConfig, TileConfig,
};
pub use context::{LogProgress, NullProgress, ProgressReporter, RenderContext, RenderStats};
pub use error::{FilmError, FilmResult};
pub use film::{Film, SamplePoint};
pub use filter::{FilterKind, FilterTable};
pub use layer::{LayerBuffer, LayerColors, LayerId, PixelCell};
pub use mask::ResampleMask;
pub use output::{
    ImageFileOutput, MemoryOutput, OutputDispatcher, OutputSettings, OutputSink,
};
pub use tiles::{Tile, TileOrder, TileScheduler};
