//! Declared assets and their retrieval.
//!
//! An [`Asset`] is a named payload with ordered source locations. The
//! [`AssetFetcher`] resolves it from offline copies, the persistent
//! [`CacheStore`] or the network, verifying it before use.

mod cache;
mod fetcher;
mod offline;

pub use cache::CacheStore;
pub use fetcher::AssetFetcher;
pub use offline::OfflineAssets;

use crate::packager::{
    error::{Error, ErrorExt, Result},
    settings::{RuntimeFamily, Target},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
    sync::LazyLock,
};

/// Build tag of this packager. Build-tagged assets must carry the same tag.
pub const BUILD_TAG: &str = concat!("project_packager-", env!("CARGO_PKG_VERSION"));

/// Default location of the hosted assets.
pub const DEFAULT_ASSET_BASE: &str = "https://assets.projectpackager.org";

/// Name of the scaffolding script asset.
pub const SCAFFOLDING: &str = "scaffolding";

static BUILD_TAG_MARKER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"build-tag:\s*([A-Za-z0-9._+\-]+)").ok());

/// Payload type of an asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// Opaque bytes, such as a runtime archive
    #[default]
    Binary,
    /// UTF-8 text, such as a script
    Text,
}

/// A declared, externally sourced payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Logical name
    pub name: String,
    /// Source locations, tried in order
    pub src: Vec<String>,
    /// Size used for progress when the server reports none
    #[serde(default)]
    pub estimated_size: u64,
    /// Lowercase hex SHA-256 of the content
    #[serde(default)]
    pub sha256: Option<String>,
    /// Whether the content carries a `build-tag:` marker to verify
    #[serde(default)]
    pub use_build_tag: bool,
    /// Payload type
    #[serde(default)]
    pub kind: AssetKind,
}

impl Asset {
    /// Cache key: the content hash if declared, else the first source
    /// location, suffixed with the build tag for build-tagged assets.
    pub fn cache_key(&self, build_tag: &str) -> String {
        if let Some(hash) = &self.sha256 {
            return hash.to_ascii_lowercase();
        }
        let src = self.src.first().map(String::as_str).unwrap_or(&self.name);
        if self.use_build_tag {
            format!("{src}#{build_tag}")
        } else {
            src.to_string()
        }
    }

    /// File name of the first source location, used for offline lookups.
    pub fn file_name(&self) -> Option<&str> {
        self.src
            .first()
            .and_then(|src| src.rsplit('/').next())
            .filter(|name| !name.is_empty())
    }
}

/// Verifies `bytes` against the hash and build tag `asset` declares.
pub fn verify(asset: &Asset, bytes: &[u8], build_tag: &str) -> Result<()> {
    if asset.use_build_tag {
        let text = String::from_utf8_lossy(bytes);
        let found = BUILD_TAG_MARKER
            .as_ref()
            .and_then(|re| re.captures(&text))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        if found.as_deref() != Some(build_tag) {
            return Err(Error::StaleBuild {
                asset: asset.name.clone(),
                expected: build_tag.to_string(),
                actual: found.unwrap_or_else(|| "<missing>".into()),
            });
        }
    }
    if let Some(expected) = &asset.sha256 {
        let actual = crate::packager::builder::sha256_hex(bytes);
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(Error::Integrity {
                asset: asset.name.clone(),
                expected: expected.clone(),
                actual,
            });
        }
    }
    Ok(())
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    replace: bool,
    assets: Vec<Asset>,
}

/// The set of declared assets.
#[derive(Debug, Clone, Default)]
pub struct AssetCatalog {
    assets: BTreeMap<String, Asset>,
}

impl AssetCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// The scaffolding script and one runtime archive per desktop target,
    /// hosted under `base_url`.
    pub fn builtin(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let mut catalog = Self::new();
        catalog.insert(Asset {
            name: SCAFFOLDING.into(),
            src: vec![format!("{base}/scaffolding/scaffolding.js")],
            estimated_size: 3_500_000,
            sha256: None,
            use_build_tag: true,
            kind: AssetKind::Text,
        });
        for target in Target::all() {
            let (Some(name), Target::Desktop(family, _)) = (target.runtime_asset(), target) else {
                continue;
            };
            let estimated_size = match family {
                RuntimeFamily::Electron => 95_000_000,
                RuntimeFamily::Nwjs => 110_000_000,
                RuntimeFamily::WebView => 4_000_000,
            };
            catalog.insert(Asset {
                name: name.into(),
                src: vec![format!("{base}/runtimes/{name}.zip")],
                estimated_size,
                sha256: None,
                use_build_tag: false,
                kind: AssetKind::Binary,
            });
        }
        catalog
    }

    /// Loads a catalog file and applies it on top of `self`.
    ///
    /// The file holds `{"assets": [...]}`; with `"replace": true` it replaces
    /// the catalog instead of extending it.
    pub fn apply_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path).fs_context("reading asset catalog", path)?;
        let file: CatalogFile = serde_json::from_str(&text)?;
        for asset in &file.assets {
            if asset.src.is_empty() {
                return Err(Error::InvalidOptions(format!(
                    "asset `{}` declares no source locations",
                    asset.name
                )));
            }
            for src in &asset.src {
                url::Url::parse(src).map_err(|e| {
                    Error::InvalidOptions(format!("asset `{}` source `{src}`: {e}", asset.name))
                })?;
            }
        }
        if file.replace {
            self.assets.clear();
        }
        for asset in file.assets {
            self.insert(asset);
        }
        log::debug!("Loaded asset catalog {} ({} assets)", path.display(), self.assets.len());
        Ok(())
    }

    /// Declares or replaces an asset.
    pub fn insert(&mut self, asset: Asset) {
        self.assets.insert(asset.name.clone(), asset);
    }

    /// Removes an asset from the declared set.
    pub fn remove(&mut self, name: &str) -> Option<Asset> {
        self.assets.remove(name)
    }

    /// Looks up a declared asset.
    pub fn get(&self, name: &str) -> Result<&Asset> {
        self.assets.get(name).ok_or_else(|| Error::UnknownAsset {
            name: name.to_string(),
        })
    }

    /// Declared assets in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    /// Cache keys of every declared asset; anything else in the cache is stale.
    pub fn valid_cache_keys(&self, build_tag: &str) -> HashSet<String> {
        self.iter().map(|a| a.cache_key(build_tag)).collect()
    }
}
