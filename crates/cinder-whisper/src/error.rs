//! Error types for archive file access.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for archive file operations.
pub type WhisperResult<T> = Result<T, WhisperError>;

/// Errors that can occur while reading or writing archive files.
#[derive(Debug, Error)]
pub enum WhisperError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt archive file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("archive file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("invalid archive configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid time interval: from {from} is after until {until}")]
    InvalidTimeInterval { from: u32, until: u32 },

    #[error("unknown aggregation method: {0}")]
    UnknownAggregationMethod(String),
}

impl WhisperError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        WhisperError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn corrupt(path: &std::path::Path, reason: impl Into<String>) -> Self {
        WhisperError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// The file does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, WhisperError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, WhisperError::Corrupt { .. })
    }

    /// File the error is about, when there is one.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            WhisperError::Io { path, .. }
            | WhisperError::Corrupt { path, .. }
            | WhisperError::AlreadyExists(path) => Some(path.as_path()),
            _ => None,
        }
    }
}
