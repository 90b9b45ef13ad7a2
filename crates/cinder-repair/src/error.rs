//! Repair error types.

use std::path::PathBuf;

use cinder_whisper::WhisperError;
use thiserror::Error;

/// Errors that can occur while repairing replicas.
#[derive(Debug, Error)]
pub enum RepairError {
    #[error("archive error: {0}")]
    Whisper(#[from] WhisperError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage tree is locked by another process ({path}): {source}")]
    Locked {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to prepare staging area in {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type RepairResult<T> = Result<T, RepairError>;
