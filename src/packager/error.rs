//! Error types for packaging operations.
//!
//! Every failure the packaging core can surface is a variant of [`Error`].
//! Integrity and schema failures are never retried; only transient network
//! failures report [`Error::is_retryable`].

use std::{
    fmt::Display,
    path::{Path, PathBuf},
};
use thiserror::Error as DeriveError;

/// Result type alias for packaging operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the packaging core.
#[derive(Debug, DeriveError)]
#[non_exhaustive]
pub enum Error {
    /// The requested asset is not declared in the catalog.
    #[error("unknown asset `{name}`")]
    UnknownAsset {
        /// Logical asset name
        name: String,
    },

    /// Retrieved bytes do not match the declared content hash.
    #[error("integrity check failed for asset `{asset}`: expected sha256 {expected}, got {actual}")]
    Integrity {
        /// Logical asset name
        asset: String,
        /// Declared hash
        expected: String,
        /// Hash of the retrieved bytes
        actual: String,
    },

    /// A text asset carries a build tag that does not match the running build.
    #[error("asset `{asset}` was built for `{actual}` but this build is `{expected}`")]
    StaleBuild {
        /// Logical asset name
        asset: String,
        /// Build tag of the running packager
        expected: String,
        /// Build tag found in the asset, or `<missing>`
        actual: String,
    },

    /// Every declared source location failed.
    #[error("could not fetch asset `{asset}`: {reason}")]
    Network {
        /// Logical asset name
        asset: String,
        /// Last failure observed
        reason: String,
    },

    /// A single low-level request failed. Transient ones are retried by the
    /// HTTP helper before being folded into [`Error::Network`].
    #[error("request to {url} failed: {reason}")]
    Request {
        /// Requested URL
        url: String,
        /// HTTP status, if a response was received
        status: Option<u16>,
        /// Failure description
        reason: String,
        /// Whether retrying may help
        transient: bool,
    },

    /// The run was cancelled through its abort signal.
    #[error("packaging was aborted")]
    Aborted,

    /// The fetched runtime archive is missing an entry the layout requires.
    #[error("runtime archive `{runtime}` is missing required entry `{entry}`")]
    MalformedRuntimeArchive {
        /// Runtime asset name
        runtime: String,
        /// Missing entry path
        entry: String,
    },

    /// The icon source could not be decoded.
    #[error("unsupported icon image: {0}")]
    UnsupportedImage(String),

    /// The packager instance has already been used.
    #[error("this packager has already been started; create a new one for another run")]
    Reuse,

    /// Options failed validation.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// A rewritten archive path would leave the archive root.
    #[error("archive path `{0}` escapes the archive root")]
    PathEscape(String),

    /// Filesystem error with the operation and path that failed.
    #[error("{context} {path}: {error}")]
    Fs {
        /// Operation being performed
        context: &'static str,
        /// Path involved
        path: PathBuf,
        /// Underlying error
        error: std::io::Error,
    },

    /// IO errors
    #[error("{0}")]
    IoError(#[from] std::io::Error),

    /// Zip archive errors
    #[error("{0}")]
    Zip(#[from] zip::result::ZipError),

    /// Property list errors
    #[error("{0}")]
    Plist(#[from] plist::Error),

    /// JSON errors
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    /// Template rendering errors
    #[error("{0}")]
    Template(#[from] handlebars::RenderError),

    /// Image encoding errors
    #[error("{0}")]
    Image(#[from] image::ImageError),

    /// Generic error with a message
    #[error("{0}")]
    GenericError(String),
}

impl Error {
    /// Whether this failure is a transient network condition worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Request { transient: true, .. })
    }

    /// Whether this failure means the data itself cannot be trusted.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::Integrity { .. } | Error::StaleBuild { .. })
    }
}

/// Convenient type alias of Result type for packaging operations.
pub trait Context<T> {
    /// Adds a context message to the error, converting it to [`Error::GenericError`].
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static;

    /// Lazily evaluated variant of [`Context::context`].
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T> Context<T> for Result<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        self.map_err(|e| Error::GenericError(format!("{context}: {e}")))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| Error::GenericError(format!("{}: {e}", f())))
    }
}

impl<T> Context<T> for Option<T> {
    fn context<C>(self, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        self.ok_or_else(|| Error::GenericError(context.to_string()))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.ok_or_else(|| Error::GenericError(f().to_string()))
    }
}

/// Attaches the failing operation and path to filesystem errors.
pub trait ErrorExt<T> {
    /// Wraps the error in [`Error::Fs`].
    fn fs_context(self, context: &'static str, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> ErrorExt<T> for std::result::Result<T, std::io::Error> {
    fn fs_context(self, context: &'static str, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|error| Error::Fs {
            context,
            path: path.as_ref().to_path_buf(),
            error,
        })
    }
}

/// Returns early with an [`Error::GenericError`] built from a format string.
#[macro_export]
macro_rules! bail {
    ($msg:literal $(,)?) => {
        return Err($crate::packager::Error::GenericError($msg.into()))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::packager::Error::GenericError(format!($fmt, $($arg)*)))
    };
}
