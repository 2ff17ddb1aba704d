//! Output targets.

use std::{fmt, str::FromStr};

/// Operating system of a desktop target.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Os {
    /// Windows, x64
    Windows,
    /// macOS, universal
    MacOs,
    /// Linux, x64
    Linux,
}

/// Desktop runtime a packaged project is merged with.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RuntimeFamily {
    /// Electron
    Electron,
    /// NW.js
    Nwjs,
    /// Minimal native WebView shell
    WebView,
}

/// Selectable output platform or format.
///
/// Serialized as the short names accepted in options files, for example
/// `html`, `zip`, `electron-win64` or `nwjs-mac`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default, serde::Deserialize, serde::Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum Target {
    /// A single self-contained HTML document
    #[default]
    Html,
    /// The document and project data side by side in a zip
    Zip,
    /// A desktop application built on a prebuilt runtime
    Desktop(RuntimeFamily, Os),
}

const DESKTOP_NAMES: [(&str, RuntimeFamily, Os); 9] = [
    ("electron-win64", RuntimeFamily::Electron, Os::Windows),
    ("electron-mac", RuntimeFamily::Electron, Os::MacOs),
    ("electron-linux64", RuntimeFamily::Electron, Os::Linux),
    ("nwjs-win64", RuntimeFamily::Nwjs, Os::Windows),
    ("nwjs-mac", RuntimeFamily::Nwjs, Os::MacOs),
    ("nwjs-linux-x64", RuntimeFamily::Nwjs, Os::Linux),
    ("webview-win64", RuntimeFamily::WebView, Os::Windows),
    ("webview-mac", RuntimeFamily::WebView, Os::MacOs),
    ("webview-linux64", RuntimeFamily::WebView, Os::Linux),
];

impl Target {
    /// Every supported target.
    pub fn all() -> Vec<Target> {
        let mut targets = vec![Target::Html, Target::Zip];
        targets.extend(
            DESKTOP_NAMES
                .iter()
                .map(|&(_, family, os)| Target::Desktop(family, os)),
        );
        targets
    }

    /// Short name used in options files.
    pub fn name(&self) -> &'static str {
        match self {
            Target::Html => "html",
            Target::Zip => "zip",
            Target::Desktop(family, os) => DESKTOP_NAMES
                .iter()
                .find(|(_, f, o)| f == family && o == os)
                .map(|(name, _, _)| *name)
                .unwrap_or("desktop"),
        }
    }

    /// Whether the artifact is a zip archive rather than a text document.
    pub fn produces_archive(&self) -> bool {
        !matches!(self, Target::Html)
    }

    /// Name of the runtime archive asset this target is built on.
    pub fn runtime_asset(&self) -> Option<&'static str> {
        match self {
            Target::Desktop(..) => Some(self.name()),
            _ => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "html" => Ok(Target::Html),
            "zip" => Ok(Target::Zip),
            _ => DESKTOP_NAMES
                .iter()
                .find(|(name, _, _)| *name == s)
                .map(|&(_, family, os)| Target::Desktop(family, os))
                .ok_or_else(|| {
                    let names: Vec<_> = Target::all().iter().map(Target::name).collect();
                    format!("unknown target `{s}`; expected one of: {}", names.join(", "))
                }),
        }
    }
}

impl TryFrom<String> for Target {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.name().to_string()
    }
}
