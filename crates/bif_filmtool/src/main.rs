//! Inspect film checkpoints and merge render-farm partials.
//!
//! ```text
//! bif_filmtool info <file.film>
//! bif_filmtool merge <dir> <base_name> <out.png> [merged.film]
//! ```

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bif_film::checkpoint::{self, FilmCheckpoint};
use bif_film::{Film, FilmError, ImageFileOutput, OutputDispatcher, OutputSettings, RenderContext};

#[derive(Debug, PartialEq)]
enum Command {
    Info {
        file: PathBuf,
    },
    Merge {
        dir: PathBuf,
        base_name: String,
        image: PathBuf,
        merged: Option<PathBuf>,
    },
}

const USAGE: &str = "Usage:
  bif_filmtool info <file.film>
  bif_filmtool merge <dir> <base_name> <out.png> [merged.film]";

fn parse_args(args: &[String]) -> Result<Command> {
    match args.get(1).map(String::as_str) {
        Some("info") if args.len() == 3 => Ok(Command::Info {
            file: PathBuf::from(&args[2]),
        }),
        Some("merge") if args.len() == 5 || args.len() == 6 => Ok(Command::Merge {
            dir: PathBuf::from(&args[2]),
            base_name: args[3].clone(),
            image: PathBuf::from(&args[4]),
            merged: args.get(5).map(PathBuf::from),
        }),
        _ => bail!("{}", USAGE),
    }
}

fn info(file: &Path) -> Result<()> {
    let checkpoint = FilmCheckpoint::load(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let h = &checkpoint.header;
    println!("{}", file.display());
    println!("  node:                 {}", h.node);
    println!("  image:                {}x{}", h.width, h.height);
    println!(
        "  region:               [{}, {}) x [{}, {})",
        h.region.x0, h.region.x1, h.region.y0, h.region.y1
    );
    println!("  base sampling offset: {}", h.base_sampling_offset);
    println!("  sampling offset:      {}", h.sampling_offset);
    println!("  layers:");
    for layer in &checkpoint.layers {
        let cells = layer.cells();
        let touched = cells.iter().filter(|c| c.weight > 0.0).count();
        let weight: f64 = cells.iter().map(|c| c.weight as f64).sum();
        println!(
            "    {:<12} {} of {} pixels rendered, total weight {:.1}",
            layer.id().name(),
            touched,
            cells.len(),
            weight
        );
    }
    Ok(())
}

fn merge(dir: &Path, base_name: &str, image: &Path, merged: Option<&Path>) -> Result<()> {
    let files = checkpoint::find_checkpoints(dir, base_name)
        .with_context(|| format!("listing {}", dir.display()))?;
    let Some(first) = files.first() else {
        return Err(FilmError::NoCheckpoint {
            dir: dir.to_path_buf(),
            base_name: base_name.to_string(),
        }
        .into());
    };

    // The first file decides the film layout; mismatching ones are skipped
    let template = FilmCheckpoint::load(first)
        .with_context(|| format!("reading {}", first.display()))?;
    let config = template.film_config();
    let (width, height) = (config.width, config.height);

    let ctx = RenderContext::new();
    let mut film = Film::new(&ctx, config)?;
    let summary = film.merge_checkpoints_in_folder(dir, base_name)?;
    for (path, reason) in &summary.skipped {
        log::warn!("Skipped {}: {}", path.display(), reason);
    }
    if summary.loaded.is_empty() {
        bail!("none of the {} checkpoint(s) could be merged", files.len());
    }
    println!(
        "Merged {} checkpoint(s), skipped {}",
        summary.loaded.len(),
        summary.skipped.len()
    );

    let output = ImageFileOutput::new(image, width, height);
    let mut outputs = OutputDispatcher::new(Box::new(output), OutputSettings::default());
    if !film.flush(&mut outputs) {
        bail!("writing {} failed", image.display());
    }
    println!("Wrote {}", image.display());

    if let Some(path) = merged {
        film.save_checkpoint(path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args: Vec<String> = env::args().collect();
    match parse_args(&args)? {
        Command::Info { file } => info(&file),
        Command::Merge {
            dir,
            base_name,
            image,
            merged,
        } => merge(&dir, &base_name, &image, merged.as_deref()),
    }
}
