//! Packaging options.

use super::Target;
use crate::packager::error::{Error, ErrorExt, Result};
use std::path::{Path, PathBuf};

/// Immutable configuration snapshot for one packaging run.
///
/// Every section carries `#[serde(default)]`, so unrecognized keys are ignored
/// and missing keys fall back to the defaults documented on each field.
///
/// # Example
///
/// ```json
/// {
///   "target": "electron-mac",
///   "app": { "package_name": "Maze Runner", "version": "1.2.0" },
///   "runtime": { "turbo": true }
/// }
/// ```
#[derive(Clone, Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct PackageOptions {
    /// Output target.
    ///
    /// Default: `html`
    pub target: Target,

    /// Branding and identity.
    pub app: AppSettings,

    /// Runtime feature toggles handed to the player.
    pub runtime: RuntimeSettings,

    /// Colors of the document and loading screen.
    pub appearance: AppearanceSettings,

    /// Loading screen text and progress bar.
    pub loading_screen: LoadingScreenSettings,

    /// Project data shrinking.
    pub optimize: OptimizeSettings,
}

/// Branding and identity of the packaged application.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Name used for files, folders and the executable.
    ///
    /// Default: "Packaged Project"
    pub package_name: String,

    /// Window and document title.
    ///
    /// Default: None (uses `package_name`)
    pub window_title: Option<String>,

    /// Version in semantic versioning format.
    ///
    /// Default: "1.0.0"
    pub version: String,

    /// Bundle identifier in reverse domain notation (macOS).
    ///
    /// Default: None (derived from `package_name`)
    pub bundle_identifier: Option<String>,

    /// Path to a PNG or JPEG icon.
    ///
    /// Default: None (a plain icon in the background color is generated)
    pub icon: Option<PathBuf>,

    /// Initial window size (width, height) in pixels.
    ///
    /// Default: (480, 360)
    pub window_size: (u32, u32),
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            package_name: "Packaged Project".into(),
            window_title: None,
            version: "1.0.0".into(),
            bundle_identifier: None,
            icon: None,
            window_size: (480, 360),
        }
    }
}

/// How cloud variables behave in the packaged project.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudVariables {
    /// Stored locally on the player's machine
    #[default]
    Local,
    /// Treated as ordinary variables
    Ignore,
}

/// Runtime feature toggles, serialized into the document as JSON.
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Run scripts without yielding between frames.
    ///
    /// Default: false
    pub turbo: bool,

    /// Interpolate sprite motion between frames.
    ///
    /// Default: false
    pub interpolation: bool,

    /// Target frames per second.
    ///
    /// Default: 30
    pub framerate: u32,

    /// Render pen at full resolution.
    ///
    /// Default: false
    pub high_quality_pen: bool,

    /// Maximum number of clones.
    ///
    /// Default: 300
    pub max_clones: u32,

    /// Keep sprites inside the stage.
    ///
    /// Default: true
    pub fencing: bool,

    /// Apply the player's miscellaneous limits.
    ///
    /// Default: true
    pub misc_limits: bool,

    /// Username reported to the project; `#` is replaced with random digits.
    ///
    /// Default: "player####"
    pub username: String,

    /// Cloud variable behavior.
    ///
    /// Default: local
    pub cloud_variables: CloudVariables,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            turbo: false,
            interpolation: false,
            framerate: 30,
            high_quality_pen: false,
            max_clones: 300,
            fencing: true,
            misc_limits: true,
            username: "player####".into(),
            cloud_variables: CloudVariables::Local,
        }
    }
}

/// Document colors in `#rrggbb` form.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
pub struct AppearanceSettings {
    /// Page background. Default: "#000000"
    pub background: String,
    /// Text and progress bar. Default: "#ffffff"
    pub foreground: String,
    /// Highlights. Default: "#ff4c4c"
    pub accent: String,
}

impl Default for AppearanceSettings {
    fn default() -> Self {
        Self {
            background: "#000000".into(),
            foreground: "#ffffff".into(),
            accent: "#ff4c4c".into(),
        }
    }
}

/// Loading screen contents.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
pub struct LoadingScreenSettings {
    /// Text shown while the project loads. Default: ""
    pub text: String,
    /// Show a progress bar. Default: true
    pub progress_bar: bool,
}

impl Default for LoadingScreenSettings {
    fn default() -> Self {
        Self {
            text: String::new(),
            progress_bar: true,
        }
    }
}

/// Project data shrinking.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
pub struct OptimizeSettings {
    /// Rewrite internal identifiers and strip redundant metadata.
    ///
    /// Default: true
    pub enabled: bool,

    /// Identifiers that must keep their original value.
    ///
    /// Default: empty
    pub reserved_ids: Vec<String>,
}

impl Default for OptimizeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            reserved_ids: Vec::new(),
        }
    }
}

const FORBIDDEN_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

impl PackageOptions {
    /// Loads options from a JSON or TOML file, chosen by extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).fs_context("reading options file", path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&text)
                .map_err(|e| Error::InvalidOptions(format!("{}: {e}", path.display()))),
            _ => Ok(serde_json::from_str(&text)?),
        }
    }

    /// Checks the options once before a run starts.
    pub fn validate(&self) -> Result<()> {
        let name = &self.app.package_name;
        if name.trim().is_empty() {
            return Err(Error::InvalidOptions("package name must not be empty".into()));
        }
        if name.starts_with('.')
            || name.chars().any(|c| c.is_control() || FORBIDDEN_NAME_CHARS.contains(&c))
        {
            return Err(Error::InvalidOptions(format!(
                "package name `{name}` cannot be used as a file name"
            )));
        }

        semver::Version::parse(&self.app.version).map_err(|e| {
            Error::InvalidOptions(format!("version `{}`: {e}", self.app.version))
        })?;

        let (width, height) = self.app.window_size;
        if width == 0 || height == 0 {
            return Err(Error::InvalidOptions(format!(
                "window size {width}x{height} must be non-zero"
            )));
        }

        if let Some(id) = &self.app.bundle_identifier {
            let valid = id.split('.').count() >= 2
                && id.split('.').all(|part| {
                    !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                });
            if !valid {
                return Err(Error::InvalidOptions(format!(
                    "bundle identifier `{id}` must be reverse-DNS, like org.example.game"
                )));
            }
        }

        for (field, color) in [
            ("background", &self.appearance.background),
            ("foreground", &self.appearance.foreground),
            ("accent", &self.appearance.accent),
        ] {
            if !is_hex_color(color) {
                return Err(Error::InvalidOptions(format!(
                    "{field} color `{color}` must look like #rrggbb"
                )));
            }
        }

        if self.runtime.framerate == 0 {
            return Err(Error::InvalidOptions("framerate must be positive".into()));
        }

        Ok(())
    }

    /// Package name used for files and folders.
    pub fn package_name(&self) -> &str {
        self.app.package_name.trim()
    }

    /// Window and document title.
    pub fn title(&self) -> &str {
        self.app
            .window_title
            .as_deref()
            .unwrap_or_else(|| self.package_name())
    }

    /// Bundle identifier, derived from the package name when unset.
    pub fn bundle_identifier(&self) -> String {
        if let Some(id) = &self.app.bundle_identifier {
            return id.clone();
        }
        let slug: String = self
            .package_name()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        let slug = if slug.is_empty() { "project".to_string() } else { slug };
        format!("org.projectpackager.{slug}")
    }
}

fn is_hex_color(s: &str) -> bool {
    s.len() == 7 && s.starts_with('#') && s[1..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Parses `#rrggbb` into RGB components.
pub fn parse_hex_color(s: &str) -> Option<[u8; 3]> {
    if !is_hex_color(s) {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&s[i..i + 2], 16).ok();
    Some([channel(1)?, channel(3)?, channel(5)?])
}
