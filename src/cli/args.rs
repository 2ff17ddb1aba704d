//! Command line argument parsing and validation.

use crate::error::CliError;
use crate::packager::{assets::DEFAULT_ASSET_BASE, settings::Target};
use clap::Parser;
use std::path::{Path, PathBuf};

/// Packages an interactive project into an HTML document, a zip archive or
/// a desktop application
#[derive(Parser, Debug)]
#[command(
    name = "project_packager",
    version,
    about = "Packages interactive projects into HTML documents, zip archives and desktop applications",
    long_about = "Packages an interactive project into a standalone artifact.

Targets: html, zip, electron-win64, electron-mac, electron-linux64, nwjs-win64,
nwjs-mac, nwjs-linux-x64, webview-win64, webview-mac, webview-linux64.

Usage:
  project_packager --project game.sb3
  project_packager --project game.sb3 --options options.toml --target electron-mac
  project_packager --project game.sb3 --target zip --output dist/game.zip

Runtime archives are downloaded once and kept in the cache directory."
)]
pub struct Args {
    /// Project file to package (.sb3 archive or project.json)
    #[arg(short, long, value_name = "PATH")]
    pub project: PathBuf,

    /// Packaging options file (.json or .toml)
    #[arg(long, value_name = "PATH")]
    pub options: Option<PathBuf>,

    /// Output path; defaults to the suggested file name in the current directory
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Target overriding the one in the options file
    #[arg(short, long, value_name = "TARGET")]
    pub target: Option<Target>,

    /// Directory of the persistent asset cache
    #[arg(long, value_name = "DIR", env = "PROJECT_PACKAGER_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Keep fetched assets in memory only
    #[arg(long, conflicts_with = "cache_dir")]
    pub no_cache: bool,

    /// Asset catalog file extending or replacing the built-in one
    #[arg(long, value_name = "PATH")]
    pub catalog: Option<PathBuf>,

    /// Directory of offline asset copies, used before the cache and the network
    #[arg(long, value_name = "DIR")]
    pub offline_dir: Option<PathBuf>,

    /// Build tag that build-tagged assets must carry
    #[arg(long, value_name = "TAG")]
    pub build_tag: Option<String>,

    /// Base URL of the built-in asset catalog
    #[arg(long, value_name = "URL", env = "PROJECT_PACKAGER_ASSET_BASE", default_value = DEFAULT_ASSET_BASE)]
    pub asset_base: String,

    /// Retries for transient network failures
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate arguments for consistency
    pub fn validate(&self) -> Result<(), CliError> {
        require_file("project", &self.project)?;
        if let Some(path) = &self.options {
            require_file("options file", path)?;
        }
        if let Some(path) = &self.catalog {
            require_file("asset catalog", path)?;
        }
        if let Some(dir) = self.offline_dir.as_ref().filter(|dir| !dir.is_dir()) {
            return Err(CliError::MissingInput {
                what: "offline directory",
                path: dir.clone(),
            });
        }
        if self.asset_base.trim().is_empty() {
            return Err(CliError::InvalidArguments {
                reason: "--asset-base must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Cache directory: `--cache-dir`, else `<user cache dir>/project_packager`.
    pub fn cache_dir(&self) -> Result<PathBuf, CliError> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::cache_dir()
                .map(|dir| dir.join("project_packager"))
                .ok_or(CliError::NoCacheDir),
        }
    }
}

fn require_file(what: &'static str, path: &Path) -> Result<(), CliError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(CliError::MissingInput {
            what,
            path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::settings::{Os, RuntimeFamily};

    #[test]
    fn parses_target_and_paths() {
        let args = Args::try_parse_from([
            "project_packager",
            "--project",
            "game.sb3",
            "--target",
            "nwjs-mac",
            "--cache-dir",
            "/tmp/cache",
        ])
        .unwrap();
        assert_eq!(args.target, Some(Target::Desktop(RuntimeFamily::Nwjs, Os::MacOs)));
        assert_eq!(args.cache_dir().unwrap(), PathBuf::from("/tmp/cache"));
        assert_eq!(args.asset_base, DEFAULT_ASSET_BASE);
    }

    #[test]
    fn rejects_unknown_target() {
        let err = Args::try_parse_from(["project_packager", "-p", "game.sb3", "-t", "amiga"]).unwrap_err();
        assert!(err.to_string().contains("unknown target"));
    }

    #[test]
    fn validate_requires_existing_project() {
        let args = Args::try_parse_from(["project_packager", "-p", "/nonexistent/game.sb3"]).unwrap();
        assert!(matches!(args.validate(), Err(CliError::MissingInput { what: "project", .. })));
    }
}
