//! Error types shared across the monitor library

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A collection cycle failed as a whole; no samples are emitted for it
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    NonZeroExit {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("data source did not answer within {0:?}")]
    Timeout(Duration),

    #[error("malformed workload payload: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for SourceError {
    fn from(e: serde_json::Error) -> Self {
        SourceError::Malformed(e.to_string())
    }
}

/// The window store could not read or persist its history
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV encoding on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        StoreError::Csv {
            path: path.into(),
            source,
        }
    }
}

/// Errors that end (or prevent) a collection run
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}
