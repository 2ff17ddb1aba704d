//! Archive assembly for the zip and desktop targets.

use super::{
    icons::{Icon, PNG_SIZE},
    layout::{AppIdentity, DesktopLayout, RuntimeLayout},
    tree::{RuntimeArchive, VirtualArchive, safe_path},
};
use crate::packager::{
    builder::{ProgressTable, Step},
    error::{Error, Result},
    events::{EventEmitter, EventSender, PackagerEvent},
    settings::{Os, PackageOptions, RuntimeFamily},
    template::{ElectronMainValues, HandlebarsTemplate, NoticeValues, script_safe_json},
};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Project files placed into the output, relative to the data folder.
#[derive(Debug, Clone, Default)]
pub struct InnerFiles {
    files: Vec<(String, Vec<u8>)>,
}

impl InnerFiles {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file, rejecting paths that leave the data folder.
    pub fn push(&mut self, path: &str, bytes: impl Into<Vec<u8>>) -> Result<()> {
        self.files.push((safe_path(path)?, bytes.into()));
        Ok(())
    }

    /// Files in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(p, b)| (p.as_str(), b.as_slice()))
    }
}

/// Builds the output archive for the zip and desktop targets.
///
/// All methods are synchronous and meant to run on a blocking worker.
pub struct ArchiveAssembler {
    options: PackageOptions,
    icon: Arc<Icon>,
    templates: Arc<HandlebarsTemplate>,
    events: Option<EventSender>,
    cancel: CancellationToken,
}

impl ArchiveAssembler {
    /// Creates an assembler for one run.
    pub fn new(
        options: PackageOptions,
        icon: Arc<Icon>,
        templates: Arc<HandlebarsTemplate>,
        events: Option<EventSender>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            options,
            icon,
            templates,
            events,
            cancel,
        }
    }

    /// Wraps the project files in a plain zip.
    pub fn assemble_zip(&self, inner: &InnerFiles) -> Result<Vec<u8>> {
        log::info!("Assembling zip archive ({} files)", inner.files.len());
        let mut tree = VirtualArchive::new();
        for (path, bytes) in inner.iter() {
            tree.insert(path, bytes)?;
        }
        self.serialize(tree)
    }

    /// Merges the project files into a desktop runtime.
    pub fn assemble_desktop(
        &self,
        family: RuntimeFamily,
        os: Os,
        mut runtime: RuntimeArchive,
        inner: &InnerFiles,
    ) -> Result<Vec<u8>> {
        let layout = DesktopLayout::new(family, os, self.options.package_name());
        log::info!(
            "Assembling {} from runtime archive {}",
            layout.runtime_name(),
            runtime.name()
        );

        let files = runtime.files()?;
        let executable = layout.original_executable();
        if !files.iter().any(|(_, path)| *path == executable) {
            return Err(Error::MalformedRuntimeArchive {
                runtime: runtime.name().to_string(),
                entry: executable,
            });
        }

        let mut tree = VirtualArchive::with_runtime(runtime);
        for (index, path) in &files {
            tree.insert_runtime(&layout.rewrite_path(path), *index)?;
        }
        if self.cancel.is_cancelled() {
            return Err(Error::Aborted);
        }

        let prefix = layout.data_prefix();
        for (path, bytes) in inner.iter() {
            tree.insert(&format!("{prefix}{path}"), bytes)?;
        }
        self.write_descriptor(&layout, &mut tree, &prefix)?;
        self.write_icons(&layout, &mut tree, &prefix)?;

        let identity = AppIdentity {
            name: self.options.package_name().to_string(),
            identifier: self.options.bundle_identifier(),
            version: self.options.app.version.clone(),
        };
        layout.patch_metadata(&mut tree, &identity)?;
        self.append_notice(&layout, &mut tree)?;

        for placeholder in layout.placeholders() {
            if tree.remove(&placeholder) {
                log::debug!("Removed runtime placeholder {}", placeholder);
            }
        }
        for (from, to) in layout.relocated_licenses() {
            tree.rename(&from, &to)?;
        }

        self.serialize(tree)
    }

    fn write_descriptor(
        &self,
        layout: &DesktopLayout,
        tree: &mut VirtualArchive,
        prefix: &str,
    ) -> Result<()> {
        let (width, height) = self.options.app.window_size;
        let title = self.options.title();
        let slug = package_slug(self.options.package_name());
        match layout.family() {
            RuntimeFamily::Electron => {
                let manifest = json!({
                    "name": slug,
                    "productName": self.options.package_name(),
                    "version": self.options.app.version,
                    "main": "index.js",
                    "private": true,
                });
                tree.insert(
                    &format!("{prefix}package.json"),
                    serde_json::to_vec_pretty(&manifest)?,
                )?;
                let main = self.templates.render_electron_main(&ElectronMainValues {
                    width,
                    height,
                    title_json: script_safe_json(title)?,
                    icon_json: script_safe_json("icon.png")?,
                    background_json: script_safe_json(&self.options.appearance.background)?,
                })?;
                tree.insert(&format!("{prefix}index.js"), main)?;
            }
            RuntimeFamily::Nwjs => {
                let manifest = json!({
                    "name": slug,
                    "version": self.options.app.version,
                    "main": "index.html",
                    "window": {
                        "title": title,
                        "width": width,
                        "height": height,
                        "icon": "icon.png",
                        "position": "center",
                    },
                });
                tree.insert(
                    &format!("{prefix}package.json"),
                    serde_json::to_vec_pretty(&manifest)?,
                )?;
            }
            RuntimeFamily::WebView => {
                let manifest = json!({
                    "title": title,
                    "entry": "index.html",
                    "width": width,
                    "height": height,
                    "icon": layout.icon_file_name(),
                });
                tree.insert(
                    &format!("{prefix}webview.json"),
                    serde_json::to_vec_pretty(&manifest)?,
                )?;
            }
        }
        Ok(())
    }

    fn write_icons(
        &self,
        layout: &DesktopLayout,
        tree: &mut VirtualArchive,
        prefix: &str,
    ) -> Result<()> {
        tree.insert(&format!("{prefix}icon.png"), self.icon.to_png(PNG_SIZE)?)?;
        match layout.os() {
            Os::Windows => tree.insert(&format!("{prefix}icon.ico"), self.icon.to_ico()?)?,
            Os::MacOs => {
                let icns = self.icon.to_icns()?;
                tree.insert(
                    &format!("{}/Contents/Resources/icon.icns", layout.app_root()),
                    icns.clone(),
                )?;
                tree.insert(&format!("{prefix}icon.icns"), icns)?;
            }
            Os::Linux => {}
        }
        Ok(())
    }

    fn append_notice(&self, layout: &DesktopLayout, tree: &mut VirtualArchive) -> Result<()> {
        let Some(path) = layout.notice_document() else {
            return Ok(());
        };
        let Some(bytes) = tree.read(&path)? else {
            log::debug!("Runtime ships no notice document at {}", path);
            return Ok(());
        };
        let notice = self.templates.render_notice(&NoticeValues {
            package_name: handlebars::html_escape(self.options.package_name()),
            runtime: handlebars::html_escape(&layout.runtime_name()),
        })?;
        let document = String::from_utf8_lossy(&bytes);
        let patched = match document.rfind("</body>") {
            Some(at) => format!("{}{notice}{}", &document[..at], &document[at..]),
            None => format!("{document}{notice}"),
        };
        tree.rewrite(&path, patched.into_bytes())
    }

    fn serialize(&self, tree: VirtualArchive) -> Result<Vec<u8>> {
        let entries = tree.len();
        let mut last_percent = None;
        let bytes = tree.write(
            |fraction| {
                let percent = (fraction * 100.0) as u32;
                if last_percent == Some(percent) {
                    return;
                }
                last_percent = Some(percent);
                self.events.emit(PackagerEvent::ArchiveProgress { progress: fraction });
                self.events.emit(PackagerEvent::Progress {
                    step: Step::AssembleArchive,
                    fraction,
                    overall: ProgressTable::overall(Step::AssembleArchive, fraction),
                });
            },
            &self.cancel,
        )?;
        log::info!("✓ Wrote archive with {} entries ({} bytes)", entries, bytes.len());
        Ok(bytes)
    }
}

/// Lowercase, dash-separated package name for runtime manifests.
fn package_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "project".to_string()
    } else {
        slug.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::{
        archive::{property_list::PropertyList, testing::zip_of},
        events,
    };
    use std::io::{Cursor, Read};
    use zip::ZipArchive;

    fn assembler(events: Option<EventSender>, cancel: CancellationToken) -> ArchiveAssembler {
        let mut options = PackageOptions::default();
        options.app.package_name = "Maze".into();
        ArchiveAssembler::new(
            options,
            Arc::new(Icon::generated([0, 0, 0], [255, 0, 0])),
            Arc::new(HandlebarsTemplate::new().unwrap()),
            events,
            cancel,
        )
    }

    fn inner() -> InnerFiles {
        let mut inner = InnerFiles::new();
        inner.push("index.html", "<html></html>").unwrap();
        inner.push("project.zip", vec![1, 2, 3]).unwrap();
        inner
    }

    fn read(zip: &mut ZipArchive<Cursor<Vec<u8>>>, path: &str) -> Vec<u8> {
        let mut out = Vec::new();
        zip.by_name(path).unwrap().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn inner_paths_cannot_escape() {
        let mut inner = InnerFiles::new();
        assert!(matches!(inner.push("../evil", "x"), Err(Error::PathEscape(_))));
        assert!(matches!(inner.push("/etc/passwd", "x"), Err(Error::PathEscape(_))));
    }

    #[test]
    fn zip_target_keeps_files_side_by_side() {
        let out = assembler(None, CancellationToken::new())
            .assemble_zip(&inner())
            .unwrap();
        let mut zip = ZipArchive::new(Cursor::new(out)).unwrap();
        let names: Vec<&str> = zip.file_names().collect();
        assert_eq!(names.len(), 2);
        assert_eq!(read(&mut zip, "project.zip"), vec![1, 2, 3]);
    }

    #[test]
    fn linux_electron_layout() {
        let runtime = RuntimeArchive::open(
            "electron-linux64",
            zip_of(&[
                ("electron-v1-linux-x64/electron", b"ELF", 0o755),
                ("electron-v1-linux-x64/LICENSE", b"MIT", 0o644),
                ("electron-v1-linux-x64/resources/default_app.asar", b"asar", 0o644),
                (
                    "electron-v1-linux-x64/LICENSES.chromium.html",
                    b"<html><body><p>chromium</p></body></html>",
                    0o644,
                ),
            ]),
        )
        .unwrap();
        let (tx, mut rx) = events::channel();
        let out = assembler(Some(tx), CancellationToken::new())
            .assemble_desktop(RuntimeFamily::Electron, Os::Linux, runtime, &inner())
            .unwrap();

        let mut zip = ZipArchive::new(Cursor::new(out)).unwrap();
        assert_eq!(zip.by_name("Maze/Maze").unwrap().unix_mode().unwrap() & 0o777, 0o755);
        assert_eq!(zip.by_name("Maze/start.sh").unwrap().unix_mode().unwrap() & 0o777, 0o755);
        assert!(zip.by_name("Maze/resources/app/index.html").is_ok());
        assert!(zip.by_name("Maze/resources/app/index.js").is_ok());
        assert!(zip.by_name("Maze/resources/app/icon.png").is_ok());
        assert!(zip.by_name("Maze/resources/default_app.asar").is_err());
        assert!(zip.by_name("Maze/LICENSE").is_err());
        assert_eq!(read(&mut zip, "Maze/licenses/LICENSE.electron.txt"), b"MIT");

        let manifest: serde_json::Value =
            serde_json::from_slice(&read(&mut zip, "Maze/resources/app/package.json")).unwrap();
        assert_eq!(manifest["name"], "maze");
        assert_eq!(manifest["main"], "index.js");

        let notice = String::from_utf8(read(&mut zip, "Maze/LICENSES.chromium.html")).unwrap();
        let ours = notice.find("project_packager").unwrap();
        assert!(ours > notice.find("chromium").unwrap());
        assert!(ours < notice.find("</body>").unwrap());

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            if let PackagerEvent::ArchiveProgress { progress } = event {
                last = Some(progress);
            }
        }
        assert_eq!(last, Some(1.0));
    }

    #[test]
    fn macos_nwjs_layout_patches_bundle() {
        let plist = br#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict><key>CFBundleExecutable</key><string>nwjs</string><key>CFBundleIdentifier</key><string>io.nwjs.nwjs</string></dict></plist>"#;
        let runtime = RuntimeArchive::open(
            "nwjs-mac",
            zip_of(&[
                ("nwjs.app/Contents/MacOS/nwjs", b"MACHO", 0o755),
                ("nwjs.app/Contents/Info.plist", plist, 0o644),
            ]),
        )
        .unwrap();
        let out = assembler(None, CancellationToken::new())
            .assemble_desktop(RuntimeFamily::Nwjs, Os::MacOs, runtime, &inner())
            .unwrap();

        let mut zip = ZipArchive::new(Cursor::new(out)).unwrap();
        assert!(zip.by_name("Maze/Maze.app/Contents/MacOS/Maze").is_ok());
        assert!(zip.by_name("Maze/Maze.app/Contents/Resources/icon.icns").is_ok());
        assert!(zip.by_name("Maze/Maze.app/Contents/Resources/app.nw/index.html").is_ok());
        let info = PropertyList::parse(&read(&mut zip, "Maze/Maze.app/Contents/Info.plist")).unwrap();
        assert_eq!(info.string("CFBundleExecutable"), Some("Maze"));
        assert_eq!(info.string("CFBundleIdentifier"), Some("org.projectpackager.maze"));
    }

    #[test]
    fn missing_executable_is_malformed() {
        let runtime =
            RuntimeArchive::open("nwjs-win64", zip_of(&[("README.md", b"hi", 0o644)])).unwrap();
        let err = assembler(None, CancellationToken::new())
            .assemble_desktop(RuntimeFamily::Nwjs, Os::Windows, runtime, &inner())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedRuntimeArchive { ref entry, .. } if entry == "nw.exe"
        ));
    }

    #[test]
    fn cancelled_assembly_is_aborted() {
        let runtime =
            RuntimeArchive::open("nwjs-win64", zip_of(&[("nw.exe", b"MZ", 0o755)])).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = assembler(None, cancel)
            .assemble_desktop(RuntimeFamily::Nwjs, Os::Windows, runtime, &inner())
            .unwrap_err();
        assert!(matches!(err, Error::Aborted));
    }

    #[test]
    fn slugs() {
        assert_eq!(package_slug("Maze Runner 2!"), "maze-runner-2");
        assert_eq!(package_slug("!!!"), "project");
    }
}
