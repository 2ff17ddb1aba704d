//! In-memory file tree assembled before the output archive is written.
//!
//! Entries are either owned bytes or lazy handles into the fetched runtime
//! archive. Lazy entries are copied without recompression unless their mode
//! has to change. Nothing touches a real archive until [`VirtualArchive::write`].

use crate::packager::error::{Error, Result};
use bytes::Bytes;
use std::{
    collections::BTreeMap,
    io::{Cursor, Read, Write},
};
use tokio_util::sync::CancellationToken;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter, write::SimpleFileOptions};

/// Mode of ordinary files.
pub const FILE_MODE: u32 = 0o644;

/// Mode of executables and launcher scripts.
pub const EXECUTABLE_MODE: u32 = 0o755;

/// Normalizes an archive path and rejects anything that could resolve
/// outside the archive root.
///
/// Backslashes count as separators and repeated separators collapse.
/// Absolute paths, drive prefixes, `.` and `..` components and NUL bytes
/// are rejected with [`Error::PathEscape`].
pub fn safe_path(path: &str) -> Result<String> {
    let unified = path.replace('\\', "/");
    let escape = || Error::PathEscape(path.to_string());
    if unified.starts_with('/') || unified.contains('\0') {
        return Err(escape());
    }
    let parts: Vec<&str> = unified.split('/').filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return Err(escape());
    }
    if parts.first().is_some_and(|first| first.contains(':')) {
        return Err(escape());
    }
    if parts.iter().any(|p| *p == "." || *p == "..") {
        return Err(escape());
    }
    Ok(parts.join("/"))
}

/// A fetched runtime archive opened for reading.
pub struct RuntimeArchive {
    name: String,
    zip: ZipArchive<Cursor<Bytes>>,
    root: String,
}

impl RuntimeArchive {
    /// Opens a runtime zip. A single top-level folder shared by every entry
    /// (other than an `.app` bundle) is treated as the archive's own root.
    pub fn open(name: &str, bytes: Bytes) -> Result<Self> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))?;
        let mut first_components = std::collections::BTreeSet::new();
        let mut nested = true;
        for i in 0..zip.len() {
            let file = zip.by_index_raw(i)?;
            let name = file.name().replace('\\', "/");
            let mut parts = name.splitn(2, '/');
            let first = parts.next().unwrap_or_default().to_string();
            if parts.next().is_none_or(str::is_empty) && !file.is_dir() {
                nested = false;
            }
            first_components.insert(first);
        }
        let root = match first_components.iter().next() {
            Some(only)
                if nested && first_components.len() == 1 && !only.ends_with(".app") =>
            {
                format!("{only}/")
            }
            _ => String::new(),
        };
        log::debug!("Opened runtime archive {} ({} entries, root {:?})", name, zip.len(), root);
        Ok(Self {
            name: name.to_string(),
            zip,
            root,
        })
    }

    /// Asset name of the runtime.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File entries as `(index, path relative to the archive root)`.
    /// Directory entries are skipped; they are implied by file paths.
    pub fn files(&mut self) -> Result<Vec<(usize, String)>> {
        let mut files = Vec::with_capacity(self.zip.len());
        for i in 0..self.zip.len() {
            let file = self.zip.by_index_raw(i)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().replace('\\', "/");
            let relative = name.strip_prefix(&self.root).unwrap_or(&name);
            files.push((i, safe_path(relative)?));
        }
        Ok(files)
    }

    fn read(&mut self, index: usize) -> Result<Vec<u8>> {
        let mut file = self.zip.by_index(index)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

/// One entry of the virtual tree.
#[derive(Debug, Clone)]
pub enum Entry {
    /// Owned bytes written with the given mode
    Data {
        /// File contents
        bytes: Vec<u8>,
        /// UNIX permission bits
        mode: u32,
    },
    /// Lazy handle to a runtime archive entry
    Runtime {
        /// Index in the runtime archive
        index: usize,
        /// Replacement mode; `None` keeps the original attributes
        mode: Option<u32>,
    },
}

/// Ordered path → payload tree.
#[derive(Default)]
pub struct VirtualArchive {
    entries: BTreeMap<String, Entry>,
    runtime: Option<RuntimeArchive>,
}

impl VirtualArchive {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty tree able to hold lazy entries from `runtime`.
    pub fn with_runtime(runtime: RuntimeArchive) -> Self {
        Self {
            entries: BTreeMap::new(),
            runtime: Some(runtime),
        }
    }

    /// Runtime archive backing lazy entries.
    pub fn runtime_mut(&mut self) -> Option<&mut RuntimeArchive> {
        self.runtime.as_mut()
    }

    /// Inserts or replaces a file with [`FILE_MODE`].
    pub fn insert(&mut self, path: &str, bytes: impl Into<Vec<u8>>) -> Result<()> {
        self.insert_with_mode(path, bytes, FILE_MODE)
    }

    /// Inserts or replaces a file with explicit permission bits.
    pub fn insert_with_mode(&mut self, path: &str, bytes: impl Into<Vec<u8>>, mode: u32) -> Result<()> {
        let path = safe_path(path)?;
        self.entries.insert(
            path,
            Entry::Data {
                bytes: bytes.into(),
                mode,
            },
        );
        Ok(())
    }

    /// Inserts a lazy handle to runtime entry `index`.
    pub fn insert_runtime(&mut self, path: &str, index: usize) -> Result<()> {
        let path = safe_path(path)?;
        self.entries.insert(path, Entry::Runtime { index, mode: None });
        Ok(())
    }

    /// Whether `path` exists.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Entry at `path`.
    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries.get(path)
    }

    /// All paths in output order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Moves an entry. Returns `false` if `from` does not exist.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<bool> {
        let to = safe_path(to)?;
        match self.entries.remove(from) {
            Some(entry) => {
                self.entries.insert(to, entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes an entry. Returns `false` if it did not exist.
    pub fn remove(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    /// Overrides the permission bits of an entry.
    pub fn set_mode(&mut self, path: &str, new_mode: u32) -> bool {
        match self.entries.get_mut(path) {
            Some(Entry::Data { mode, .. }) => *mode = new_mode,
            Some(Entry::Runtime { mode, .. }) => *mode = Some(new_mode),
            None => return false,
        }
        true
    }

    /// Reads the contents of an entry, decompressing lazy entries.
    pub fn read(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        match self.entries.get(path) {
            Some(Entry::Data { bytes, .. }) => Ok(Some(bytes.clone())),
            Some(Entry::Runtime { index, .. }) => {
                let index = *index;
                let runtime = self.runtime.as_mut().ok_or_else(|| {
                    Error::GenericError(format!("lazy entry {path} has no runtime archive"))
                })?;
                runtime.read(index).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Replaces the contents of an entry, keeping its permission bits.
    pub fn rewrite(&mut self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let mode = match self.entries.get(path) {
            Some(Entry::Data { mode, .. }) => *mode,
            Some(Entry::Runtime { mode, .. }) => mode.unwrap_or(FILE_MODE),
            None => FILE_MODE,
        };
        self.insert_with_mode(path, bytes, mode)
    }

    /// Serializes the tree into a deflate-compressed zip.
    ///
    /// Calls `on_progress` with the fraction of entries written and fails with
    /// [`Error::Aborted`] as soon as `cancel` fires. Entry timestamps are fixed
    /// so identical trees produce identical bytes.
    pub fn write(
        mut self,
        mut on_progress: impl FnMut(f64),
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default());
        let total = self.entries.len().max(1) as f64;

        let entries = std::mem::take(&mut self.entries);
        for (written, (path, entry)) in entries.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Aborted);
            }
            match entry {
                Entry::Data { bytes, mode } => {
                    writer.start_file(path, options.unix_permissions(mode))?;
                    writer.write_all(&bytes)?;
                }
                Entry::Runtime { index, mode: None } => {
                    let runtime = self.runtime.as_mut().ok_or_else(|| {
                        Error::GenericError(format!("lazy entry {path} has no runtime archive"))
                    })?;
                    let file = runtime.zip.by_index_raw(index)?;
                    writer.raw_copy_file_rename(file, path)?;
                }
                Entry::Runtime {
                    index,
                    mode: Some(mode),
                } => {
                    let runtime = self.runtime.as_mut().ok_or_else(|| {
                        Error::GenericError(format!("lazy entry {path} has no runtime archive"))
                    })?;
                    let bytes = runtime.read(index)?;
                    writer.start_file(path, options.unix_permissions(mode))?;
                    writer.write_all(&bytes)?;
                }
            }
            on_progress((written + 1) as f64 / total);
        }

        Ok(writer.finish()?.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::archive::testing::zip_of;

    fn read_back(bytes: Vec<u8>) -> ZipArchive<Cursor<Vec<u8>>> {
        ZipArchive::new(Cursor::new(bytes)).unwrap()
    }

    #[test]
    fn safe_path_rejects_escapes() {
        for bad in ["../x", "a/../../x", "/etc/passwd", "C:/Windows", "a/./b", "", "\\\\server\\x", "a\0b"] {
            assert!(matches!(safe_path(bad), Err(Error::PathEscape(_))), "{bad:?}");
        }
        assert_eq!(safe_path("a//b\\c").unwrap(), "a/b/c");
    }

    #[test]
    fn detects_shared_root_folder() {
        let bytes = zip_of(&[
            ("nwjs-v1-win-x64/nw.exe", b"exe", 0o755),
            ("nwjs-v1-win-x64/locales/en.pak", b"pak", 0o644),
        ]);
        let mut runtime = RuntimeArchive::open("nwjs-win64", bytes).unwrap();
        let files: Vec<String> = runtime.files().unwrap().into_iter().map(|(_, p)| p).collect();
        assert_eq!(files, vec!["nw.exe", "locales/en.pak"]);
    }

    #[test]
    fn app_bundle_is_not_treated_as_root() {
        let bytes = zip_of(&[("Electron.app/Contents/Info.plist", b"<plist/>", 0o644)]);
        let mut runtime = RuntimeArchive::open("electron-mac", bytes).unwrap();
        assert_eq!(runtime.files().unwrap()[0].1, "Electron.app/Contents/Info.plist");
    }

    #[test]
    fn writes_data_and_lazy_entries_with_modes() {
        let bytes = zip_of(&[("electron", b"ELF", 0o644), ("LICENSE", b"MIT", 0o644)]);
        let runtime = RuntimeArchive::open("electron-linux64", bytes).unwrap();
        let mut tree = VirtualArchive::with_runtime(runtime);
        tree.insert_runtime("Game/Game", 0).unwrap();
        tree.insert_runtime("Game/LICENSE", 1).unwrap();
        tree.set_mode("Game/Game", EXECUTABLE_MODE);
        tree.insert_with_mode("Game/start.sh", b"#!/bin/sh\n".to_vec(), EXECUTABLE_MODE)
            .unwrap();

        let mut progress = Vec::new();
        let out = tree.write(|p| progress.push(p), &CancellationToken::new()).unwrap();
        assert_eq!(progress.last().copied(), Some(1.0));

        let mut zip = read_back(out);
        let mut exe = zip.by_name("Game/Game").unwrap();
        assert_eq!(exe.unix_mode().unwrap() & 0o777, 0o755);
        let mut contents = String::new();
        exe.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "ELF");
        drop(exe);
        assert_eq!(zip.by_name("Game/start.sh").unwrap().unix_mode().unwrap() & 0o777, 0o755);
        assert!(zip.by_name("Game/LICENSE").is_ok());
    }

    #[test]
    fn rename_and_remove() {
        let mut tree = VirtualArchive::new();
        tree.insert("a.txt", b"a".to_vec()).unwrap();
        assert!(tree.rename("a.txt", "docs/a.txt").unwrap());
        assert!(!tree.rename("missing", "b").unwrap());
        assert!(tree.rename("docs/a.txt", "../a.txt").is_err());
        assert!(tree.contains("docs/a.txt"));
        assert!(tree.remove("docs/a.txt"));
        assert!(tree.is_empty());
    }

    #[test]
    fn cancelled_write_fails() {
        let mut tree = VirtualArchive::new();
        tree.insert("a.txt", b"a".to_vec()).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(tree.write(|_| {}, &token), Err(Error::Aborted)));
    }

    #[test]
    fn identical_trees_serialize_identically() {
        let build = || {
            let mut tree = VirtualArchive::new();
            tree.insert("b.txt", b"b".to_vec()).unwrap();
            tree.insert("a.txt", b"a".to_vec()).unwrap();
            tree.write(|_| {}, &CancellationToken::new()).unwrap()
        };
        assert_eq!(build(), build());
    }
}
