//! Per-runtime archive layouts.
//!
//! Every desktop target couples to the file layout of one prebuilt runtime
//! archive. A [`DesktopLayout`] knows where that runtime keeps its executable,
//! where app data goes and which metadata needs patching.

use super::{
    property_list::{BundleIdentity, patch_identity},
    tree::{EXECUTABLE_MODE, VirtualArchive},
};
use crate::packager::{
    error::{Error, Result},
    settings::{Os, RuntimeFamily},
};

/// Rules for merging a project into one runtime's file tree.
pub trait RuntimeLayout {
    /// Final location of a runtime entry, given its path relative to the
    /// runtime archive root.
    fn rewrite_path(&self, path: &str) -> String;

    /// Folder (with trailing `/`) that receives the project files.
    fn data_prefix(&self) -> String;

    /// Patches platform metadata once the tree is merged.
    fn patch_metadata(&self, archive: &mut VirtualArchive, identity: &AppIdentity) -> Result<()>;
}

/// Identity of the packaged application.
#[derive(Debug, Clone)]
pub struct AppIdentity {
    /// Package name
    pub name: String,
    /// Reverse-DNS bundle identifier
    pub identifier: String,
    /// Semantic version
    pub version: String,
}

/// Layout of one runtime family on one operating system.
#[derive(Debug, Clone)]
pub struct DesktopLayout {
    family: RuntimeFamily,
    os: Os,
    name: String,
}

impl DesktopLayout {
    /// Layout for `family` on `os`, renamed to `package_name`.
    pub fn new(family: RuntimeFamily, os: Os, package_name: &str) -> Self {
        Self {
            family,
            os,
            name: package_name.to_string(),
        }
    }

    /// Runtime family.
    pub fn family(&self) -> RuntimeFamily {
        self.family
    }

    /// Operating system.
    pub fn os(&self) -> Os {
        self.os
    }

    /// Application bundle name shipped in the macOS runtime, without `.app`.
    fn bundle_stem(&self) -> &'static str {
        match self.family {
            RuntimeFamily::Electron => "Electron",
            RuntimeFamily::Nwjs => "nwjs",
            RuntimeFamily::WebView => "WebView",
        }
    }

    /// Executable path inside the runtime archive.
    pub fn original_executable(&self) -> String {
        match (self.family, self.os) {
            (RuntimeFamily::Electron, Os::Windows) => "electron.exe".into(),
            (RuntimeFamily::Electron, Os::Linux) => "electron".into(),
            (RuntimeFamily::Nwjs, Os::Windows) => "nw.exe".into(),
            (RuntimeFamily::Nwjs, Os::Linux) => "nw".into(),
            (RuntimeFamily::WebView, Os::Windows) => "WebView.exe".into(),
            (RuntimeFamily::WebView, Os::Linux) => "webview".into(),
            (_, Os::MacOs) => {
                let stem = self.bundle_stem();
                format!("{stem}.app/Contents/MacOS/{stem}")
            }
        }
    }

    /// Executable path in the output archive.
    pub fn executable_path(&self) -> String {
        let name = &self.name;
        match self.os {
            Os::Windows => format!("{name}/{name}.exe"),
            Os::Linux => format!("{name}/{name}"),
            Os::MacOs => format!("{}/Contents/MacOS/{name}", self.app_root()),
        }
    }

    /// The renamed `.app` folder (macOS only).
    pub fn app_root(&self) -> String {
        format!("{0}/{0}.app", self.name)
    }

    /// Runtime placeholder content removed from the output.
    pub fn placeholders(&self) -> Vec<String> {
        match (self.family, self.os) {
            (RuntimeFamily::Electron, Os::MacOs) => {
                vec![format!("{}/Contents/Resources/default_app.asar", self.app_root())]
            }
            (RuntimeFamily::Electron, _) => {
                vec![format!("{}/resources/default_app.asar", self.name)]
            }
            _ => Vec::new(),
        }
    }

    /// Open source notice document the runtime ships with.
    pub fn notice_document(&self) -> Option<String> {
        match self.family {
            RuntimeFamily::Electron => Some(format!("{}/LICENSES.chromium.html", self.name)),
            RuntimeFamily::Nwjs => Some(format!("{}/credits.html", self.name)),
            RuntimeFamily::WebView => None,
        }
    }

    /// License files moved out of the application root, as `(from, to)`.
    pub fn relocated_licenses(&self) -> Vec<(String, String)> {
        let runtime = match self.family {
            RuntimeFamily::Electron => "electron",
            RuntimeFamily::Nwjs => "nwjs",
            RuntimeFamily::WebView => "webview",
        };
        vec![(
            format!("{}/LICENSE", self.name),
            format!("{}/licenses/LICENSE.{runtime}.txt", self.name),
        )]
    }

    /// File name of the native icon written into the data prefix.
    pub fn icon_file_name(&self) -> &'static str {
        match self.os {
            Os::Windows => "icon.ico",
            Os::MacOs => "icon.icns",
            Os::Linux => "icon.png",
        }
    }

    fn rewrite_inside_bundle(&self, rest: &str) -> String {
        let stem = self.bundle_stem();
        if rest == format!("Contents/MacOS/{stem}") {
            return format!("Contents/MacOS/{}", self.name);
        }
        if self.family != RuntimeFamily::Electron {
            return rest.to_string();
        }
        // Electron requires helper bundles and their executables to carry the
        // application name.
        rest.split('/')
            .map(|segment| match segment.strip_prefix("Electron Helper") {
                Some(suffix) => format!("{} Helper{suffix}", self.name),
                None => segment.to_string(),
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    fn patch_macos(&self, archive: &mut VirtualArchive, identity: &AppIdentity) -> Result<()> {
        let app_root = self.app_root();
        let main_plist = format!("{app_root}/Contents/Info.plist");
        let bytes = archive
            .read(&main_plist)?
            .ok_or_else(|| Error::MalformedRuntimeArchive {
                runtime: self.runtime_name(),
                entry: main_plist.clone(),
            })?;
        let patched = patch_identity(
            &bytes,
            &BundleIdentity {
                identifier: identity.identifier.clone(),
                name: identity.name.clone(),
                executable: Some(identity.name.clone()),
                version: identity.version.clone(),
                icon_file: Some("icon.icns".into()),
            },
        )?;
        archive.rewrite(&main_plist, patched)?;

        let frameworks = format!("{app_root}/Contents/Frameworks/");
        let helpers: Vec<String> = archive
            .paths()
            .filter(|p| p.starts_with(&frameworks) && p.ends_with(".app/Contents/Info.plist"))
            .map(str::to_string)
            .collect();
        for plist_path in helpers {
            let bundle = plist_path
                .trim_end_matches("/Contents/Info.plist")
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .trim_end_matches(".app")
                .to_string();
            let Some(bytes) = archive.read(&plist_path)? else {
                continue;
            };
            let helper = BundleIdentity {
                identifier: format!("{}.{}", identity.identifier, helper_suffix(&bundle)),
                name: bundle.clone(),
                executable: (self.family == RuntimeFamily::Electron).then(|| bundle.clone()),
                version: identity.version.clone(),
                icon_file: None,
            };
            log::debug!("Patching helper bundle {}", bundle);
            archive.rewrite(&plist_path, patch_identity(&bytes, &helper)?)?;
        }
        Ok(())
    }

    /// Runtime asset name, used in error messages.
    pub fn runtime_name(&self) -> String {
        crate::packager::settings::Target::Desktop(self.family, self.os).to_string()
    }
}

/// Identifier suffix for a helper bundle: `Maze Helper (GPU)` → `helper.gpu`.
fn helper_suffix(bundle: &str) -> String {
    let tail = bundle.find("Helper").map_or("Helper", |i| &bundle[i..]);
    let words: Vec<String> = tail
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();
    words.join(".")
}

/// Shell-quotes a value with single quotes.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Launcher script placed next to the Linux executable.
pub fn launcher_script(executable: &str) -> String {
    format!(
        "#!/bin/sh\ncd \"$(dirname \"$0\")\" || exit 1\nexec ./{} \"$@\"\n",
        shell_quote(executable)
    )
}

impl RuntimeLayout for DesktopLayout {
    fn rewrite_path(&self, path: &str) -> String {
        let name = &self.name;
        if path == self.original_executable() {
            return self.executable_path();
        }
        if self.os == Os::MacOs {
            let bundle = format!("{}.app/", self.bundle_stem());
            if let Some(rest) = path.strip_prefix(&bundle) {
                return format!("{}/{}", self.app_root(), self.rewrite_inside_bundle(rest));
            }
        }
        format!("{name}/{path}")
    }

    fn data_prefix(&self) -> String {
        let name = &self.name;
        match (self.family, self.os) {
            (RuntimeFamily::Electron, Os::MacOs) | (RuntimeFamily::WebView, Os::MacOs) => {
                format!("{}/Contents/Resources/app/", self.app_root())
            }
            (RuntimeFamily::Nwjs, Os::MacOs) => {
                format!("{}/Contents/Resources/app.nw/", self.app_root())
            }
            (RuntimeFamily::Electron, _) => format!("{name}/resources/app/"),
            (RuntimeFamily::Nwjs, _) => format!("{name}/"),
            (RuntimeFamily::WebView, _) => format!("{name}/resources/"),
        }
    }

    fn patch_metadata(&self, archive: &mut VirtualArchive, identity: &AppIdentity) -> Result<()> {
        let executable = self.executable_path();
        match self.os {
            Os::Windows => {}
            Os::Linux => {
                archive.set_mode(&executable, EXECUTABLE_MODE);
                archive.insert_with_mode(
                    &format!("{}/start.sh", self.name),
                    launcher_script(&self.name),
                    EXECUTABLE_MODE,
                )?;
            }
            Os::MacOs => {
                archive.set_mode(&executable, EXECUTABLE_MODE);
                self.patch_macos(archive, identity)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packager::archive::{
        property_list::PropertyList,
        testing::zip_of,
        tree::{Entry, RuntimeArchive},
    };

    fn layout(family: RuntimeFamily, os: Os) -> DesktopLayout {
        DesktopLayout::new(family, os, "Maze Game")
    }

    #[test]
    fn windows_renames_executable() {
        let l = layout(RuntimeFamily::Electron, Os::Windows);
        assert_eq!(l.rewrite_path("electron.exe"), "Maze Game/Maze Game.exe");
        assert_eq!(l.rewrite_path("resources/app.asar"), "Maze Game/resources/app.asar");
        assert_eq!(l.data_prefix(), "Maze Game/resources/app/");
    }

    #[test]
    fn macos_renames_bundle_executable_and_helpers() {
        let l = layout(RuntimeFamily::Electron, Os::MacOs);
        assert_eq!(
            l.rewrite_path("Electron.app/Contents/MacOS/Electron"),
            "Maze Game/Maze Game.app/Contents/MacOS/Maze Game"
        );
        assert_eq!(
            l.rewrite_path(
                "Electron.app/Contents/Frameworks/Electron Helper (GPU).app/Contents/MacOS/Electron Helper (GPU)"
            ),
            "Maze Game/Maze Game.app/Contents/Frameworks/Maze Game Helper (GPU).app/Contents/MacOS/Maze Game Helper (GPU)"
        );
        assert_eq!(
            l.rewrite_path("Electron.app/Contents/Frameworks/Electron Framework.framework/Electron Framework"),
            "Maze Game/Maze Game.app/Contents/Frameworks/Electron Framework.framework/Electron Framework"
        );
        assert_eq!(l.data_prefix(), "Maze Game/Maze Game.app/Contents/Resources/app/");
    }

    #[test]
    fn nwjs_keeps_data_beside_executable() {
        let l = layout(RuntimeFamily::Nwjs, Os::Linux);
        assert_eq!(l.rewrite_path("nw"), "Maze Game/Maze Game");
        assert_eq!(l.data_prefix(), "Maze Game/");
        let mac = layout(RuntimeFamily::Nwjs, Os::MacOs);
        assert_eq!(mac.data_prefix(), "Maze Game/Maze Game.app/Contents/Resources/app.nw/");
    }

    #[test]
    fn helper_suffixes() {
        assert_eq!(helper_suffix("Maze Helper (GPU)"), "helper.gpu");
        assert_eq!(helper_suffix("Maze Helper"), "helper");
        assert_eq!(helper_suffix("Other"), "helper");
    }

    #[test]
    fn launcher_quotes_names() {
        let script = launcher_script("it's a game");
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains(r"exec ./'it'\''s a game' "));
    }

    #[test]
    fn linux_patch_adds_executable_launcher() {
        let bytes = zip_of(&[("electron", b"ELF", 0o644)]);
        let runtime = RuntimeArchive::open("electron-linux64", bytes).unwrap();
        let mut tree = VirtualArchive::with_runtime(runtime);
        let l = layout(RuntimeFamily::Electron, Os::Linux);
        tree.insert_runtime(&l.rewrite_path("electron"), 0).unwrap();
        let identity = AppIdentity {
            name: "Maze Game".into(),
            identifier: "org.example.maze".into(),
            version: "1.0.0".into(),
        };
        l.patch_metadata(&mut tree, &identity).unwrap();
        assert!(matches!(
            tree.get("Maze Game/Maze Game"),
            Some(Entry::Runtime { mode: Some(0o755), .. })
        ));
        assert!(matches!(
            tree.get("Maze Game/start.sh"),
            Some(Entry::Data { mode: 0o755, .. })
        ));
    }

    #[test]
    fn macos_patch_requires_main_plist() {
        let mut tree = VirtualArchive::new();
        let l = layout(RuntimeFamily::Nwjs, Os::MacOs);
        let identity = AppIdentity {
            name: "Maze Game".into(),
            identifier: "org.example.maze".into(),
            version: "1.0.0".into(),
        };
        let err = l.patch_metadata(&mut tree, &identity).unwrap_err();
        assert!(matches!(err, Error::MalformedRuntimeArchive { .. }));
    }

    #[test]
    fn macos_patch_updates_helpers() {
        let plist = br#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0"><dict><key>CFBundleIdentifier</key><string>com.github.Electron</string><key>LSUIElement</key><true/></dict></plist>"#;
        let l = layout(RuntimeFamily::Electron, Os::MacOs);
        let mut tree = VirtualArchive::new();
        tree.insert("Maze Game/Maze Game.app/Contents/Info.plist", plist.to_vec())
            .unwrap();
        let helper =
            "Maze Game/Maze Game.app/Contents/Frameworks/Maze Game Helper (Renderer).app/Contents/Info.plist";
        tree.insert(helper, plist.to_vec()).unwrap();
        let identity = AppIdentity {
            name: "Maze Game".into(),
            identifier: "org.example.maze".into(),
            version: "2.0.0".into(),
        };
        l.patch_metadata(&mut tree, &identity).unwrap();

        let patched = PropertyList::parse(&tree.read(helper).unwrap().unwrap()).unwrap();
        assert_eq!(
            patched.string("CFBundleIdentifier"),
            Some("org.example.maze.helper.renderer")
        );
        assert_eq!(patched.string("CFBundleExecutable"), Some("Maze Game Helper (Renderer)"));
        assert!(patched.dict().unwrap().get("LSUIElement").is_some());

        let main = PropertyList::parse(
            &tree
                .read("Maze Game/Maze Game.app/Contents/Info.plist")
                .unwrap()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(main.string("CFBundleShortVersionString"), Some("2.0.0"));
        assert_eq!(main.string("CFBundleIconFile"), Some("icon.icns"));
    }
}
