//! Persistent key → bytes store for fetched assets.
//!
//! On disk every entry is one file named by the SHA-256 of its key, written
//! atomically. Entries are independent, so concurrent runs sharing a
//! directory cannot corrupt each other. Opening a store purges every entry
//! whose key is not currently declared, along with temporary files left
//! behind by writes that never completed.

use crate::packager::{
    builder::sha256_hex,
    error::{ErrorExt, Result},
    utils::fs::{remove_file_if_exists, write_atomic},
};
use bytes::Bytes;
use std::{
    collections::{HashMap, HashSet},
    io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tokio::sync::Mutex;

const ENTRY_SUFFIX: &str = ".bin";

/// Temporary files younger than this may belong to a write in progress.
const ABANDONED_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

enum Backend {
    Disk(PathBuf),
    Memory(Mutex<HashMap<String, Bytes>>),
}

/// Cache of asset payloads, shared across packaging runs.
pub struct CacheStore {
    backend: Backend,
}

impl CacheStore {
    /// Opens (creating if needed) a store in `dir` and collects garbage.
    pub async fn open(dir: impl Into<PathBuf>, valid_keys: &HashSet<String>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .fs_context("creating cache directory", &dir)?;
        let store = Self {
            backend: Backend::Disk(dir),
        };
        let removed = store.collect_garbage(valid_keys).await?;
        if removed > 0 {
            log::info!("Removed {} stale cache entries", removed);
        }
        Ok(store)
    }

    /// A store that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(HashMap::new())),
        }
    }

    /// Directory of a disk store.
    pub fn dir(&self) -> Option<&Path> {
        match &self.backend {
            Backend::Disk(dir) => Some(dir),
            Backend::Memory(_) => None,
        }
    }

    fn entry_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{}{ENTRY_SUFFIX}", sha256_hex(key.as_bytes())))
    }

    /// Bytes stored under `key`.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match &self.backend {
            Backend::Memory(map) => Ok(map.lock().await.get(key).cloned()),
            Backend::Disk(dir) => {
                let path = Self::entry_path(dir, key);
                match tokio::fs::read(&path).await {
                    Ok(bytes) => Ok(Some(Bytes::from(bytes))),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e).fs_context("reading cache entry", &path),
                }
            }
        }
    }

    /// Stores `bytes` under `key`, replacing any previous entry.
    pub async fn put(&self, key: &str, bytes: &Bytes) -> Result<()> {
        match &self.backend {
            Backend::Memory(map) => {
                map.lock().await.insert(key.to_string(), bytes.clone());
                Ok(())
            }
            Backend::Disk(dir) => write_atomic(&Self::entry_path(dir, key), bytes).await,
        }
    }

    /// Removes the entry under `key`.
    pub async fn remove(&self, key: &str) -> Result<()> {
        match &self.backend {
            Backend::Memory(map) => {
                map.lock().await.remove(key);
                Ok(())
            }
            Backend::Disk(dir) => remove_file_if_exists(&Self::entry_path(dir, key)).await,
        }
    }

    /// Removes every entry whose key is not in `valid_keys`, along with
    /// temporary files abandoned by interrupted writes. Returns the number of entries removed.
    pub async fn collect_garbage(&self, valid_keys: &HashSet<String>) -> Result<usize> {
        match &self.backend {
            Backend::Memory(map) => {
                let mut map = map.lock().await;
                let before = map.len();
                map.retain(|key, _| valid_keys.contains(key));
                Ok(before - map.len())
            }
            Backend::Disk(dir) => {
                let keep: HashSet<String> = valid_keys
                    .iter()
                    .map(|key| format!("{}{ENTRY_SUFFIX}", sha256_hex(key.as_bytes())))
                    .collect();
                let mut removed = 0;
                let mut entries = tokio::fs::read_dir(dir)
                    .await
                    .fs_context("listing cache directory", dir)?;
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .fs_context("listing cache directory", dir)?
                {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    let stale_entry = name.ends_with(ENTRY_SUFFIX) && !keep.contains(&name);
                    let abandoned = name.ends_with(".tmp") && is_abandoned(&entry).await;
                    if stale_entry || abandoned {
                        log::debug!("Removing cache file {}", name);
                        remove_file_if_exists(&entry.path()).await?;
                        if stale_entry {
                            removed += 1;
                        }
                    }
                }
                Ok(removed)
            }
        }
    }
}

async fn is_abandoned(entry: &tokio::fs::DirEntry) -> bool {
    let modified = match entry.metadata().await.and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(e) => {
            log::debug!("Keeping {}: {}", entry.path().display(), e);
            return false;
        }
    };
    SystemTime::now()
        .duration_since(modified)
        .is_ok_and(|age| age >= ABANDONED_TEMP_AGE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> HashSet<String> {
        list.iter().map(|k| k.to_string()).collect()
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path(), &keys(&["a"])).await.unwrap();
        store.put("a", &Bytes::from_static(b"payload")).await.unwrap();
        drop(store);

        let store = CacheStore::open(dir.path(), &keys(&["a"])).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap(), "payload");
        assert!(store.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reopening_purges_undeclared_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path(), &keys(&["a", "b"])).await.unwrap();
        store.put("a", &Bytes::from_static(b"1")).await.unwrap();
        store.put("b", &Bytes::from_static(b"2")).await.unwrap();
        let abandoned = dir.path().join(".x.bin.123.tmp");
        std::fs::write(&abandoned, b"partial").unwrap();
        backdate(&abandoned, ABANDONED_TEMP_AGE * 2);
        drop(store);

        let store = CacheStore::open(dir.path(), &keys(&["a"])).await.unwrap();
        assert!(store.get("a").await.unwrap().is_some());
        assert!(store.get("b").await.unwrap().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn in_flight_temp_files_survive_open() {
        let dir = tempfile::tempdir().unwrap();
        let in_flight = dir.path().join(".y.bin.456.tmp");
        std::fs::write(&in_flight, b"partial").unwrap();

        CacheStore::open(dir.path(), &keys(&[])).await.unwrap();
        assert!(in_flight.exists());
    }

    fn backdate(path: &Path, age: Duration) {
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - age)
            .unwrap();
    }

    #[tokio::test]
    async fn memory_store_collects_garbage() {
        let store = CacheStore::in_memory();
        store.put("a", &Bytes::from_static(b"1")).await.unwrap();
        store.put("b", &Bytes::from_static(b"2")).await.unwrap();
        assert_eq!(store.collect_garbage(&keys(&["b"])).await.unwrap(), 1);
        assert!(store.get("a").await.unwrap().is_none());
        store.remove("b").await.unwrap();
        assert!(store.get("b").await.unwrap().is_none());
    }
}
