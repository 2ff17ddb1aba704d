//! Error types for the command line tool.
//!
//! Library failures arrive as [`crate::packager::Error`] and are wrapped in
//! [`PackagerError`] together with argument and I/O errors.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, PackagerError>;

/// Main error type of the command line tool
#[derive(Error, Debug)]
pub enum PackagerError {
    /// CLI argument errors
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Packaging errors
    #[error("{0}")]
    Packager(#[from] crate::packager::Error),

    /// Generic errors from anyhow
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid command line arguments
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Reason for the error
        reason: String,
    },

    /// An input file does not exist
    #[error("{what} not found: {}", path.display())]
    MissingInput {
        /// Kind of input
        what: &'static str,
        /// Path given on the command line
        path: PathBuf,
    },

    /// No cache directory could be determined
    #[error("no cache directory available; pass --cache-dir")]
    NoCacheDir,
}

impl PackagerError {
    /// Actionable suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        use crate::packager::Error;
        match self {
            PackagerError::Packager(Error::Integrity { asset, .. })
            | PackagerError::Packager(Error::StaleBuild { asset, .. }) => vec![format!(
                "the asset `{asset}` does not match its declaration; check the catalog or remove the cache directory"
            )],
            PackagerError::Packager(Error::Network { .. }) => {
                vec!["check the network connection or provide offline copies with --offline-dir".into()]
            }
            PackagerError::Packager(Error::InvalidOptions(_)) => {
                vec!["fix the options file and run again".into()]
            }
            PackagerError::Cli(CliError::NoCacheDir) => {
                vec!["pass --cache-dir with a writable directory".into()]
            }
            _ => Vec::new(),
        }
    }

    /// Whether running again may succeed without changing the inputs
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PackagerError::Packager(e) if e.is_retryable())
            || matches!(self, PackagerError::Packager(crate::packager::Error::Aborted))
    }
}
