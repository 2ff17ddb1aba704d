//! Project packager library
//!
//! Packages interactive projects into distributable artifacts:
//! - a single self-contained HTML document
//! - a zip archive holding the document and the project data
//! - desktop applications on Electron, NW.js or WebView runtimes
//!   for Windows, macOS and Linux
//!
//! It can be used both as a CLI tool and as a library dependency.

pub mod cli;
pub mod error;
pub mod packager;

// Re-export commonly used types
pub use error::{CliError, PackagerError, Result};
