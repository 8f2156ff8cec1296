//! bif_renderer: progressive multi-pass rendering into a [`bif_film::Film`].
//!
//! The ray-tracing core plugs in through [`SampleSource`]; [`render`]
//! drives the passes, the worker pool and the outputs.

pub mod renderer;
pub mod sources;

pub use renderer::{render, RenderError, RenderResult, RenderSettings, RenderSummary, SampleSource};
pub use sources::{Disc, Gradient, SolidColor};

// Re-export the film and math crates so users need a single dependency
pub use bif_film;
pub use bif_math;
