//! Film checkpoints: the raw accumulator state of a render on disk.
//!
//! A checkpoint lets a render resume after an interruption and lets
//! several render nodes that rendered the same frame be summed into one
//! image. All values are little-endian:
//!
//! ```text
//! u32 tag length, tag bytes ("BIF_FILMv1")
//! u32 node, u32 base sampling offset, u32 sampling offset
//! i32 width, i32 height
//! i32 x0, i32 x1, i32 y0, i32 y1        render region
//! u32 layer count
//! per layer:
//!     u32 layer code, i32 width, i32 height
//!     width * height * (f32 r, g, b, a, weight)
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bif_math::PixelRect;

use crate::config::FilmConfig;
use crate::error::{FilmError, FilmResult};
use crate::film::Film;
use crate::layer::{LayerBuffer, LayerId, PixelCell};

/// Header tag identifying the format and its version.
pub const FILM_TAG: &str = "BIF_FILMv1";

/// File extension of checkpoints.
pub const FILM_EXTENSION: &str = "film";

/// Upper bound on pixels in a checkpoint, rejects corrupt headers before
/// allocating.
const MAX_PIXELS: i64 = 1 << 28;

/// Everything before the layer data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointHeader {
    pub node: u32,
    pub base_sampling_offset: u32,
    pub sampling_offset: u32,
    pub width: i32,
    pub height: i32,
    pub region: PixelRect,
    pub layer_count: u32,
}

/// A checkpoint held in memory.
#[derive(Debug, Clone)]
pub struct FilmCheckpoint {
    pub header: CheckpointHeader,
    pub layers: Vec<LayerBuffer>,
}

/// Result of merging a folder of checkpoints.
#[derive(Debug, Default)]
pub struct MergeSummary {
    pub loaded: Vec<PathBuf>,
    /// Files that failed to load or validate, with the reason
    pub skipped: Vec<(PathBuf, String)>,
}

fn write_u32<W: Write>(w: &mut W, v: u32) -> FilmResult<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_i32<W: Write>(w: &mut W, v: i32) -> FilmResult<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn write_f32<W: Write>(w: &mut W, v: f32) -> FilmResult<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

fn read_bytes<R: Read, const N: usize>(r: &mut R) -> FilmResult<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf).map_err(FilmError::from_read)?;
    Ok(buf)
}

fn read_u32<R: Read>(r: &mut R) -> FilmResult<u32> {
    Ok(u32::from_le_bytes(read_bytes(r)?))
}

fn read_i32<R: Read>(r: &mut R) -> FilmResult<i32> {
    Ok(i32::from_le_bytes(read_bytes(r)?))
}

fn read_f32<R: Read>(r: &mut R) -> FilmResult<f32> {
    Ok(f32::from_le_bytes(read_bytes(r)?))
}

fn mismatch(field: &'static str, expected: impl Into<i64>, found: impl Into<i64>) -> FilmError {
    FilmError::DimensionMismatch {
        field,
        expected: expected.into(),
        found: found.into(),
    }
}

impl CheckpointHeader {
    pub fn write_to<W: Write>(&self, w: &mut W) -> FilmResult<()> {
        write_u32(w, FILM_TAG.len() as u32)?;
        w.write_all(FILM_TAG.as_bytes())?;
        write_u32(w, self.node)?;
        write_u32(w, self.base_sampling_offset)?;
        write_u32(w, self.sampling_offset)?;
        write_i32(w, self.width)?;
        write_i32(w, self.height)?;
        write_i32(w, self.region.x0)?;
        write_i32(w, self.region.x1)?;
        write_i32(w, self.region.y0)?;
        write_i32(w, self.region.y1)?;
        write_u32(w, self.layer_count)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> FilmResult<Self> {
        let tag_len = read_u32(r)? as usize;
        if tag_len != FILM_TAG.len() {
            return Err(FilmError::BadHeader {
                found: format!("<{} bytes>", tag_len),
            });
        }
        let mut tag = vec![0u8; tag_len];
        r.read_exact(&mut tag).map_err(FilmError::from_read)?;
        if tag != FILM_TAG.as_bytes() {
            return Err(FilmError::BadHeader {
                found: String::from_utf8_lossy(&tag).into_owned(),
            });
        }

        let node = read_u32(r)?;
        let base_sampling_offset = read_u32(r)?;
        let sampling_offset = read_u32(r)?;
        let width = read_i32(r)?;
        let height = read_i32(r)?;
        let x0 = read_i32(r)?;
        let x1 = read_i32(r)?;
        let y0 = read_i32(r)?;
        let y1 = read_i32(r)?;
        let layer_count = read_u32(r)?;

        let header = Self {
            node,
            base_sampling_offset,
            sampling_offset,
            width,
            height,
            region: PixelRect::new(x0, y0, x1, y1),
            layer_count,
        };
        header.check()?;
        Ok(header)
    }

    /// Reject headers no film could have written.
    fn check(&self) -> FilmResult<()> {
        let r = &self.region;
        let pixels = self.width as i64 * self.height as i64;
        if self.width < 0 || self.height < 0 || pixels > MAX_PIXELS {
            return Err(FilmError::BadHeader {
                found: format!("image size {}x{}", self.width, self.height),
            });
        }
        if r.x0 < 0 || r.y0 < 0 || r.x0 > r.x1 || r.y0 > r.y1 || r.x1 > self.width || r.y1 > self.height {
            return Err(FilmError::BadHeader {
                found: format!("region {:?}", r),
            });
        }
        if self.layer_count as usize > LayerId::COUNT {
            return Err(FilmError::BadHeader {
                found: format!("{} layers", self.layer_count),
            });
        }
        Ok(())
    }
}

impl FilmCheckpoint {
    /// Snapshot the current state of `film`.
    pub fn capture(film: &Film<'_>) -> Self {
        let layers = film.with_layers(|layers| layers.to_vec());
        Self {
            header: CheckpointHeader {
                node: film.context().computer_node(),
                base_sampling_offset: film.base_sampling_offset(),
                sampling_offset: film.sampling_offset(),
                width: film.width(),
                height: film.height(),
                region: film.region(),
                layer_count: layers.len() as u32,
            },
            layers,
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> FilmResult<()> {
        self.header.write_to(w)?;
        let (rw, rh) = (self.header.region.width(), self.header.region.height());
        for layer in &self.layers {
            if layer.width() != rw || layer.height() != rh {
                return Err(FilmError::LayerSizeMismatch {
                    layer: layer.id().to_string(),
                    width: rw,
                    height: rh,
                    found_width: layer.width(),
                    found_height: layer.height(),
                });
            }
            write_u32(w, layer.id().code())?;
            write_i32(w, layer.width())?;
            write_i32(w, layer.height())?;
            for cell in layer.cells() {
                for v in cell.color {
                    write_f32(w, v)?;
                }
                write_f32(w, cell.weight)?;
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> FilmResult<Self> {
        let header = CheckpointHeader::read_from(r)?;
        let (rw, rh) = (header.region.width(), header.region.height());
        let mut layers = Vec::with_capacity(header.layer_count as usize);
        for _ in 0..header.layer_count {
            let code = read_u32(r)?;
            let id = LayerId::from_code(code).ok_or(FilmError::UnknownLayer(code))?;
            let width = read_i32(r)?;
            let height = read_i32(r)?;
            if width != rw || height != rh {
                return Err(FilmError::LayerSizeMismatch {
                    layer: id.to_string(),
                    width: rw,
                    height: rh,
                    found_width: width,
                    found_height: height,
                });
            }
            let mut layer = LayerBuffer::new(id, width, height, false);
            for y in 0..height {
                for x in 0..width {
                    let color = [read_f32(r)?, read_f32(r)?, read_f32(r)?, read_f32(r)?];
                    let weight = read_f32(r)?;
                    layer.set_cell(x, y, PixelCell { color, weight });
                }
            }
            layers.push(layer);
        }
        Ok(Self { header, layers })
    }

    /// Write atomically: to a temporary file first, then renamed over
    /// `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> FilmResult<()> {
        self.save_inner(path.as_ref(), false)
    }

    /// Like [`FilmCheckpoint::save`], but an existing file at `path` is
    /// moved to `<name>.bak` once the new data is safely on disk.
    pub fn save_with_backup<P: AsRef<Path>>(&self, path: P) -> FilmResult<()> {
        self.save_inner(path.as_ref(), true)
    }

    fn save_inner(&self, path: &Path, keep_backup: bool) -> FilmResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension(format!("{}.tmp", FILM_EXTENSION));
        write_file(&tmp, |w| self.write_to(w))?;
        if keep_backup {
            backup(path);
        }
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        log::debug!(
            "Wrote checkpoint {} ({} layers, sampling offset {})",
            path.display(),
            self.layers.len(),
            self.header.sampling_offset
        );
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> FilmResult<Self> {
        let mut reader = BufReader::new(File::open(path.as_ref())?);
        Self::read_from(&mut reader)
    }

    /// Check this checkpoint can be merged into `film`: same image size,
    /// region and layer list.
    pub fn validate_for(&self, film: &Film<'_>) -> FilmResult<()> {
        let h = &self.header;
        let region = film.region();
        let checks = [
            ("width", film.width(), h.width),
            ("height", film.height(), h.height),
            ("region x0", region.x0, h.region.x0),
            ("region x1", region.x1, h.region.x1),
            ("region y0", region.y0, h.region.y0),
            ("region y1", region.y1, h.region.y1),
        ];
        for (field, expected, found) in checks {
            if expected != found {
                return Err(mismatch(field, expected, found));
            }
        }
        if film.layers().len() != self.layers.len() {
            return Err(mismatch("layer count", film.layers().len() as i64, self.layers.len() as i64));
        }
        for (index, (&expected, found)) in film.layers().iter().zip(&self.layers).enumerate() {
            if expected != found.id() {
                return Err(FilmError::LayerMismatch {
                    index,
                    expected: expected.to_string(),
                    found: found.id().to_string(),
                });
            }
        }
        Ok(())
    }

    /// A film configuration that accepts this checkpoint.
    pub fn film_config(&self) -> FilmConfig {
        let layers: Vec<LayerId> = self.layers.iter().map(LayerBuffer::id).collect();
        FilmConfig::new(self.header.width, self.header.height)
            .with_region(self.header.region)
            .with_layers(&layers)
    }
}

/// Create `path` and fill it with `write`. A partially written file is
/// removed again on error.
fn write_file<F>(path: &Path, write: F) -> FilmResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> FilmResult<()>,
{
    let mut writer = BufWriter::new(File::create(path)?);
    let result = write(&mut writer).and_then(|()| writer.flush().map_err(FilmError::from));
    drop(writer);
    if result.is_err() {
        let _ = fs::remove_file(path);
    }
    result
}

/// Read only the header of a checkpoint file.
pub fn read_header<P: AsRef<Path>>(path: P) -> FilmResult<CheckpointHeader> {
    let mut reader = BufReader::new(File::open(path.as_ref())?);
    CheckpointHeader::read_from(&mut reader)
}

/// Rename an existing checkpoint to `<name>.bak`, replacing an older
/// backup. Failures are logged and otherwise ignored.
pub fn backup<P: AsRef<Path>>(path: P) -> bool {
    let path = path.as_ref();
    if !path.exists() {
        return false;
    }
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    let bak = PathBuf::from(name);
    match fs::rename(path, &bak) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Could not back up {}: {}", path.display(), e);
            false
        }
    }
}

/// Checkpoints in `dir` whose file name starts with `base_name`, sorted
/// by name.
pub fn find_checkpoints<P: AsRef<Path>>(dir: P, base_name: &str) -> FilmResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matches_ext = path
            .extension()
            .map(|ext| ext == FILM_EXTENSION)
            .unwrap_or(false);
        let matches_name = path
            .file_name()
            .map(|name| name.to_string_lossy().starts_with(base_name))
            .unwrap_or(false);
        if matches_ext && matches_name {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RenderContext;
    use crate::film::SamplePoint;
    use crate::filter::FilterKind;
    use crate::layer::LayerColors;
    use bif_math::Rgba;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bif_film_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn config() -> FilmConfig {
        FilmConfig::new(8, 6)
            .with_region(PixelRect::new(1, 1, 7, 5))
            .with_layers(&[LayerId::Depth, LayerId::AaSamples])
            .with_filter(FilterKind::Gauss, 1.5)
    }

    fn render_some(film: &Film<'_>, seed: u32) {
        for n in 0..40u32 {
            let x = 1 + ((n * 7 + seed) % 6) as i32;
            let y = 1 + ((n * 3 + seed) % 4) as i32;
            let v = (n % 5) as f32 * 0.2 + seed as f32 * 0.01;
            let colors = LayerColors::new()
                .with(LayerId::Combined, Rgba::new(v, 0.5, 1.0 - v, 1.0))
                .with(LayerId::Depth, Rgba::new(v, v, v, 1.0));
            let mut sample = SamplePoint::new(x, y, 0.25 + (n % 2) as f32 * 0.5, 0.4);
            sample.inv_max_samples = 0.125;
            film.add_sample(&colors, &sample);
        }
    }

    fn all_cells(film: &Film<'_>) -> Vec<Vec<PixelCell>> {
        film.with_layers(|layers| layers.iter().map(|l| l.cells()).collect())
    }

    #[test]
    fn test_round_trip_is_bit_identical() {
        init_logs();
        let dir = temp_dir("roundtrip");
        let path = dir.join("shot_node0000.film");
        let ctx = RenderContext::new().with_node(3);

        let mut film = Film::new(&ctx, config()).unwrap();
        film.init(1);
        film.set_sampling_offset(42);
        render_some(&film, 1);
        film.save_checkpoint(&path).unwrap();

        let header = read_header(&path).unwrap();
        assert_eq!(header.node, 3);
        assert_eq!(header.sampling_offset, 42);
        assert_eq!(header.region, PixelRect::new(1, 1, 7, 5));
        assert_eq!(header.layer_count, 3);

        let mut restored = Film::new(&ctx, config()).unwrap();
        restored.init(1);
        restored.resume_from_checkpoint(&path).unwrap();
        assert_eq!(restored.sampling_offset(), 42);

        let a = all_cells(&film);
        let b = all_cells(&restored);
        for (la, lb) in a.iter().zip(&b) {
            for (ca, cb) in la.iter().zip(lb) {
                for i in 0..4 {
                    assert_eq!(ca.color[i].to_bits(), cb.color[i].to_bits());
                }
                assert_eq!(ca.weight.to_bits(), cb.weight.to_bits());
            }
        }
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_merge_adds_node_contributions() {
        init_logs();
        let dir = temp_dir("merge");
        let ctx0 = RenderContext::new().with_node(0);
        let ctx1 = RenderContext::new().with_node(1);

        let mut node0 = Film::new(&ctx0, config()).unwrap();
        node0.init(1);
        node0.set_sampling_offset(10);
        render_some(&node0, 1);
        node0.save_checkpoint(dir.join("shot_node0000.film")).unwrap();

        let mut node1 = Film::new(&ctx1, config()).unwrap();
        node1.init(1);
        node1.set_sampling_offset(20);
        render_some(&node1, 2);
        node1.save_checkpoint(dir.join("shot_node0001.film")).unwrap();

        let ctx = RenderContext::new();
        let mut merged = Film::new(&ctx, config()).unwrap();
        merged.init(1);
        let summary = merged.merge_checkpoints_in_folder(&dir, "shot").unwrap();
        assert_eq!(summary.loaded.len(), 2);
        assert!(summary.skipped.is_empty());
        assert_eq!(merged.sampling_offset(), 20);

        let (a, b, m) = (all_cells(&node0), all_cells(&node1), all_cells(&merged));
        for layer in 0..m.len() {
            for i in 0..m[layer].len() {
                let expected = a[layer][i].weight + b[layer][i].weight;
                if layer == 2 {
                    // sample-count layer keeps weight 1 once touched
                    assert!(m[layer][i].weight == 0.0 || m[layer][i].weight == 1.0);
                    let count = a[layer][i].color[0] + b[layer][i].color[0];
                    assert!((m[layer][i].color[0] - count).abs() < 1e-5);
                } else {
                    assert!((m[layer][i].weight - expected).abs() < 1e-4);
                }
            }
        }
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_mismatch_leaves_film_untouched() {
        init_logs();
        let dir = temp_dir("mismatch");
        let path = dir.join("shot_node0000.film");
        let ctx = RenderContext::new();

        let other = Film::new(&ctx, FilmConfig::new(16, 16)).unwrap();
        other.save_checkpoint(&path).unwrap();

        let mut film = Film::new(&ctx, config()).unwrap();
        film.init(1);
        render_some(&film, 3);
        let before = all_cells(&film);

        let err = film.merge_checkpoint(&path).unwrap_err();
        assert!(matches!(err, FilmError::DimensionMismatch { field: "width", .. }));
        assert!(film.resume_from_checkpoint(&path).is_err());
        assert_eq!(all_cells(&film), before);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_layer_list_mismatch() {
        let dir = temp_dir("layers");
        let path = dir.join("a.film");
        let ctx = RenderContext::new();
        let film = Film::new(&ctx, config().with_layers(&[LayerId::Normal])).unwrap();
        film.save_checkpoint(&path).unwrap();

        let mut target = Film::new(&ctx, config().with_layers(&[LayerId::Depth])).unwrap();
        let err = target.merge_checkpoint(&path).unwrap_err();
        assert!(matches!(err, FilmError::LayerMismatch { index: 1, .. }), "{}", err);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_bad_files_skipped() {
        init_logs();
        let dir = temp_dir("skip");
        let ctx = RenderContext::new();
        let film = Film::new(&ctx, config()).unwrap();
        film.save_checkpoint(dir.join("shot_node0000.film")).unwrap();

        fs::write(dir.join("shot_node0001.film"), b"garbage").unwrap();
        let mut truncated = fs::read(dir.join("shot_node0000.film")).unwrap();
        truncated.truncate(truncated.len() / 2);
        fs::write(dir.join("shot_node0002.film"), &truncated).unwrap();
        fs::write(dir.join("other_node0000.film"), b"ignored").unwrap();
        fs::write(dir.join("shot_node0003.txt"), b"ignored").unwrap();

        let mut target = Film::new(&ctx, config()).unwrap();
        let summary = target.merge_checkpoints_in_folder(&dir, "shot").unwrap();
        assert_eq!(summary.loaded.len(), 1);
        assert_eq!(summary.skipped.len(), 2);

        assert!(matches!(
            FilmCheckpoint::load(dir.join("shot_node0002.film")),
            Err(FilmError::Truncated)
        ));
        assert!(matches!(
            read_header(dir.join("shot_node0001.film")),
            Err(FilmError::Truncated) | Err(FilmError::BadHeader { .. })
        ));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_backs_up_previous() {
        let dir = temp_dir("backup");
        let path = dir.join("shot_node0000.film");
        fs::write(&path, b"old").unwrap();
        assert!(backup(&path));
        assert!(!path.exists());
        assert_eq!(fs::read(dir.join("shot_node0000.film.bak")).unwrap(), b"old");
        assert!(!backup(&path));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_failed_write_leaves_no_partial_file() {
        init_logs();
        let dir = temp_dir("partial");
        let ctx = RenderContext::new();
        let film = Film::new(&ctx, config()).unwrap();
        let mut checkpoint = FilmCheckpoint::capture(&film);
        // Wrong size is only detected after the header went out
        checkpoint.layers[1] = LayerBuffer::new(LayerId::Depth, 2, 2, false);

        let path = dir.join("shot_node0000.film");
        assert!(matches!(
            checkpoint.save(&path),
            Err(FilmError::LayerSizeMismatch { .. })
        ));
        assert!(!path.exists());
        assert!(!dir.join("shot_node0000.film.tmp").exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_failed_save_keeps_previous_checkpoint() {
        init_logs();
        let dir = temp_dir("keep");
        let ctx = RenderContext::new();
        let film = Film::new(&ctx, config()).unwrap();
        render_some(&film, 1);
        let path = dir.join("shot_node0000.film");
        film.save_checkpoint(&path).unwrap();
        let before = fs::read(&path).unwrap();

        // Block the temporary file so the next write cannot start
        fs::create_dir_all(dir.join("shot_node0000.film.tmp")).unwrap();
        render_some(&film, 2);
        assert!(FilmCheckpoint::capture(&film).save_with_backup(&path).is_err());

        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(!dir.join("shot_node0000.film.bak").exists());
        assert_eq!(find_checkpoints(&dir, "shot").unwrap(), vec![path.clone()]);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_folder_is_no_checkpoint() {
        let dir = temp_dir("empty");
        let ctx = RenderContext::new();
        let mut film = Film::new(&ctx, config()).unwrap();
        let err = film.merge_checkpoints_in_folder(&dir, "shot").unwrap_err();
        assert!(matches!(err, FilmError::NoCheckpoint { ref base_name, .. } if base_name == "shot"));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_with_backup_rotates() {
        let dir = temp_dir("rotate");
        let ctx = RenderContext::new();
        let film = Film::new(&ctx, config()).unwrap();
        let path = dir.join("shot_node0000.film");
        let checkpoint = FilmCheckpoint::capture(&film);

        checkpoint.save_with_backup(&path).unwrap();
        assert!(!dir.join("shot_node0000.film.bak").exists());
        checkpoint.save_with_backup(&path).unwrap();
        assert!(path.exists());
        assert!(dir.join("shot_node0000.film.bak").exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_film_config_from_checkpoint() {
        let ctx = RenderContext::new();
        let film = Film::new(&ctx, config()).unwrap();
        let checkpoint = FilmCheckpoint::capture(&film);
        let rebuilt = Film::new(&ctx, checkpoint.film_config()).unwrap();
        assert!(checkpoint.validate_for(&rebuilt).is_ok());
    }
}
