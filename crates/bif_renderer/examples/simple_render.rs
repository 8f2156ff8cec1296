//! Progressive render example.
//!
//! Renders a disc over a gradient with adaptive anti-aliasing, writes a
//! PNG and a checkpoint next to it.

use bif_renderer::bif_film::{
    AdaptiveConfig, BadgeConfig, BadgePosition, CheckpointConfig, CheckpointMode, DarkDetection,
    Film, FilmConfig, FilterKind, ImageFileOutput, LayerColors, LayerId, LogProgress,
    OutputDispatcher, OutputSettings, RenderContext, SamplePoint,
};
use bif_renderer::bif_math::Rgba;
use bif_renderer::{render, Disc, Gradient, RenderSettings, SampleSource};

/// Disc in front of a gradient backdrop.
struct Scene {
    disc: Disc,
    backdrop: Gradient,
}

impl SampleSource for Scene {
    fn sample(&self, point: &SamplePoint, out: &mut LayerColors) {
        self.backdrop.sample(point, out);
        if self.disc.contains(point.x as f32 + point.dx, point.y as f32 + point.dy) {
            self.disc.sample(point, out);
        } else {
            out.set(LayerId::ObjectMask, Rgba::new(0.0, 0.0, 0.0, 1.0));
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let (width, height) = (480, 270);
    let config = FilmConfig::new(width, height)
        .with_filter(FilterKind::Mitchell, 1.5)
        .with_layers(&[LayerId::ObjectMask, LayerId::AaSamples])
        .with_adaptive(AdaptiveConfig {
            threshold: 0.02,
            dark_detection: DarkDetection::Curve,
            ..Default::default()
        })
        .with_checkpoint(CheckpointConfig {
            mode: CheckpointMode::Save,
            base_name: "simple_render".to_string(),
            ..Default::default()
        })
        .with_badge(BadgeConfig {
            position: BadgePosition::Bottom,
            title: "BIF simple render".to_string(),
            ..Default::default()
        });

    let ctx = RenderContext::new().with_progress(Box::new(LogProgress::new()));
    let mut film = Film::new(&ctx, config)?;

    let scene = Scene {
        disc: Disc::new(
            (width as f32 * 0.5, height as f32 * 0.5),
            height as f32 * 0.3,
            Rgba::new(0.9, 0.35, 0.1, 1.0),
            Rgba::ZERO,
        ),
        backdrop: Gradient::new(
            Rgba::new(0.05, 0.05, 0.1, 1.0),
            Rgba::new(0.4, 0.5, 0.7, 1.0),
            width as f32,
        ),
    };

    let output = ImageFileOutput::new("simple_render.png", width, height).with_layer_files(true);
    let mut outputs = OutputDispatcher::new(Box::new(output), OutputSettings::default());

    let settings = RenderSettings {
        passes: 6,
        samples: 4,
        inc_samples: 4,
        sample_multiplier: 1.5,
        resampled_floor: 1.0,
        threshold_change_rate: 0.25,
        ..Default::default()
    };

    let summary = render(&mut film, &scene, &mut outputs, &settings)?;
    println!(
        "Rendered {} pass(es), {} samples in {:.2}s (converged: {})",
        summary.passes,
        summary.samples,
        summary.elapsed.as_secs_f64(),
        summary.converged
    );
    println!("Saved to simple_render.png");
    Ok(())
}
