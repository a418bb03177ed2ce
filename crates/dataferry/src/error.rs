//! Error types for the dataferry pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Errors raised while configuring or running a migration
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Database connectivity, query or load failure
    #[error(transparent)]
    Rdbc(#[from] dataferry_rdbc::Error),

    /// Missing or malformed configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Raw data directory or file could not be read
    #[error("IO error on {}: {source}", path.display())]
    Io {
        /// Path being read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// File could not be parsed as CSV
    #[error("CSV error in {}: {source}", path.display())]
    Csv {
        /// File being parsed
        path: PathBuf,
        /// Underlying parser error
        #[source]
        source: csv::Error,
    },
}

impl MigrationError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// IO error for `path`
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// CSV error for `path`
    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }
}
