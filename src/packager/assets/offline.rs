//! Offline copies of assets, bundled ahead of time.

use super::Asset;
use crate::packager::{
    archive::safe_path,
    error::{ErrorExt, Result},
};
use bytes::Bytes;
use std::{collections::HashMap, io, path::PathBuf};

/// Assets available without the network or the cache.
///
/// Lookups check the in-memory map first, then the directory for a file
/// named after the asset or after its first source location. Names that
/// would resolve outside the directory are rejected.
#[derive(Debug, Clone, Default)]
pub struct OfflineAssets {
    memory: HashMap<String, Bytes>,
    dir: Option<PathBuf>,
}

impl OfflineAssets {
    /// No offline copies.
    pub fn none() -> Self {
        Self::default()
    }

    /// Offline copies read from `dir`.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            memory: HashMap::new(),
            dir: Some(dir.into()),
        }
    }

    /// Adds an in-memory copy.
    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Bytes>) {
        self.memory.insert(name.into(), bytes.into());
    }

    /// Offline copy of `asset`, if one exists.
    pub async fn get(&self, asset: &Asset) -> Result<Option<Bytes>> {
        if let Some(bytes) = self.memory.get(&asset.name) {
            return Ok(Some(bytes.clone()));
        }
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        let candidates = std::iter::once(asset.name.as_str()).chain(asset.file_name());
        for name in candidates {
            let path = dir.join(safe_path(name)?);
            match tokio::fs::read(&path).await {
                Ok(bytes) => return Ok(Some(Bytes::from(bytes))),
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e).fs_context("reading offline asset", &path),
            }
        }
        Ok(None)
    }
}
