//! Failure taxonomy for a batch run.
//!
//! - [`PreconditionError`] aborts the whole run before any item is touched.
//! - [`ItemError`] is recorded against one input and the batch moves on.
//! - [`UnpackError`] is what the unpacker reports; callers decide whether it
//!   is item-fatal or only a step warning.
//!
//! Single-file problems inside an item (one class failing to decompile, one
//! copy failing) never get a type of their own: they are logged and skipped.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum UnpackError {
    #[error("archive not found: {0}")]
    NotFound(PathBuf),

    #[error("archive is corrupt: {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("required tool is unavailable: {0}")]
    ToolUnavailable(String),

    #[error("failed to prepare destination {path}: {source}")]
    Destination {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum PreconditionError {
    #[error("input directory does not exist: {0}")]
    MissingInputDir(PathBuf),

    #[error("required external capability '{0}' is not available")]
    MissingCapability(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("extraction failed: {0}")]
    Extraction(#[from] UnpackError),

    #[error("no application archive found in {0}")]
    NoArtifactFound(PathBuf),

    #[error("unexpected fault: {0}")]
    Fault(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
