//! Error types for the film subsystem.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while configuring, persisting or outputting a film.
#[derive(Error, Debug)]
pub enum FilmError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a film checkpoint (header tag {found:?})")]
    BadHeader { found: String },

    #[error("Checkpoint {field} mismatch: film has {expected}, file has {found}")]
    DimensionMismatch {
        field: &'static str,
        expected: i64,
        found: i64,
    },

    #[error("Checkpoint layer {index} is {found}, film expects {expected}")]
    LayerMismatch {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("Layer {layer} is {found_width}x{found_height}, film is {width}x{height}")]
    LayerSizeMismatch {
        layer: String,
        width: i32,
        height: i32,
        found_width: i32,
        found_height: i32,
    },

    #[error("Checkpoint file is truncated")]
    Truncated,

    #[error("Unknown layer code {0}")]
    UnknownLayer(u32),

    #[error("No checkpoint matching {base_name:?} in {dir}")]
    NoCheckpoint { dir: PathBuf, base_name: String },

    #[error("Invalid film configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

/// Result type for film operations.
pub type FilmResult<T> = Result<T, FilmError>;

impl FilmError {
    /// Map an unexpected end of file to [`FilmError::Truncated`].
    pub(crate) fn from_read(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            FilmError::Truncated
        } else {
            FilmError::Io(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_maps_to_truncated() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(matches!(FilmError::from_read(eof), FilmError::Truncated));

        let other = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(FilmError::from_read(other), FilmError::Io(_)));
    }

    #[test]
    fn test_mismatch_message() {
        let err = FilmError::DimensionMismatch {
            field: "width",
            expected: 640,
            found: 320,
        };
        let msg = err.to_string();
        assert!(msg.contains("width"));
        assert!(msg.contains("640"));
        assert!(msg.contains("320"));
    }
}
