//! Packaging run orchestration.
//!
//! The [`Packager`] drives one run from validation to the finished
//! [`Artifact`](crate::packager::artifact::Artifact):
//!
//! 1. Validates the [`PackageOptions`](crate::packager::settings::PackageOptions)
//! 2. Fetches the scaffolding script and, for desktop targets, the runtime archive
//! 3. Optimizes the project and renders the document
//! 4. Assembles the output archive for non-document targets
//!
//! Progress of each step is mapped onto one overall scale by [`ProgressTable`].
//!
//! - [`checksum`] - SHA-256 checksums for assets and artifacts
//! - [`orchestrator`] - the [`Packager`] state machine
//! - [`progress`] - [`Step`] and [`ProgressTable`]

mod checksum;
mod orchestrator;
mod progress;

pub use checksum::sha256_hex;
pub use orchestrator::{Packager, PackagerContext, PackagerState};
pub use progress::{ProgressTable, Step};
