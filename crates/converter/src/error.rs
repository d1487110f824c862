use std::path::PathBuf;
use thiserror::Error;

/// Failures produced while discovering, analysing and converting media files.
///
/// Only `DirectoryNotFound` is fatal to a run. Analysis and
/// render failures are per-job and end up as an `ExecutionOutcome`.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Failed to analyse {}: {reason}", path.display())]
    Analysis { path: PathBuf, reason: String },

    #[error("Encoder failed for {}: {message}", path.display())]
    Render {
        path: PathBuf,
        message: String,
        /// Captured diagnostic stream (stderr) of the encoder, when any
        diagnostics: Option<String>,
    },

    #[error("Conversion interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConvertError>;
