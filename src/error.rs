//! Error taxonomy.
//!
//! [`GandalfError`] covers conditions that stop a host's acquisition.
//! [`CollectError`] covers a single artifact that could not be collected;
//! callers log it and move on.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Conditions that abort the current host's run.
#[derive(Debug, Error)]
pub enum GandalfError {
    #[error("elevated privileges required: {0}")]
    NotElevated(&'static str),

    #[error("missing required dependencies: {}", .0.join(", "))]
    MissingDependencies(Vec<String>),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to create archive: {0:#}")]
    Archive(anyhow::Error),

    #[error("encryption failed, plaintext archive retained at {}: {cause:#}", .retained.display())]
    Encryption {
        retained: PathBuf,
        cause: anyhow::Error,
    },

    #[error("remote acquisition of {host} failed: {cause:#}")]
    Remote {
        host: String,
        cause: anyhow::Error,
    },

    #[error("acquisition cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why a single artifact was not collected.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("source not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to collect {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("ledger rejected {path}: {reason}")]
    Ledger { path: String, reason: String },

    #[error("collection cancelled")]
    Cancelled,
}

impl CollectError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            CollectError::NotFound(path.into())
        } else {
            CollectError::Io { path: path.into(), source }
        }
    }

    /// True when the failure is only the absence of the source.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CollectError::NotFound(_))
    }
}
