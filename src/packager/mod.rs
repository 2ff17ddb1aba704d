//! Packaging pipeline.
//!
//! Turns a loaded project and a [`PackageOptions`] snapshot into an
//! [`Artifact`]: a self-contained HTML document, a zip archive, or a desktop
//! application built on an Electron, NW.js or WebView runtime.
//!
//! # Example
//!
//! ```no_run
//! use project_packager::packager::{
//!     AssetCatalog, CacheStore, NetClient, PackageOptions, Packager, PackagerContext,
//!     ProjectBundle, assets::DEFAULT_ASSET_BASE,
//! };
//!
//! # async fn example() -> project_packager::packager::Result<()> {
//! let catalog = AssetCatalog::builtin(DEFAULT_ASSET_BASE);
//! let cache = CacheStore::open("/tmp/packager-cache", &catalog.valid_cache_keys("tag")).await?;
//! let context = PackagerContext::new(catalog, cache, NetClient::with_defaults()?)?;
//!
//! let mut packager = Packager::new(context);
//! packager.configure(PackageOptions::from_file("options.json".as_ref())?)?;
//! packager.set_project_bundle(ProjectBundle::from_file("game.sb3".as_ref()).await?)?;
//! let artifact = packager.run().await?;
//! artifact.write_to(artifact.suggested_filename.as_ref()).await?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod artifact;
pub mod assets;
pub mod base85;
pub mod builder;
pub mod error;
pub mod events;
pub mod optimizer;
pub mod project;
pub mod settings;
pub mod template;
pub mod utils;

pub use artifact::{Artifact, ArtifactData};
pub use assets::{AssetCatalog, AssetFetcher, CacheStore, OfflineAssets};
pub use builder::{Packager, PackagerContext, PackagerState};
pub use error::{Context, Error, ErrorExt, Result};
pub use events::PackagerEvent;
pub use optimizer::ProjectOptimizer;
pub use project::{ProjectBundle, ProjectKind};
pub use settings::{PackageOptions, Target};
pub use utils::http::{NetClient, NetConfig};
