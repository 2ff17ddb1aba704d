//! Document composition.
//!
//! The packaging core only hands named values to a [`DocumentTemplate`] and
//! gets a text document back. [`HandlebarsTemplate`] is the built-in
//! implementation; it also renders the small generated sources desktop
//! targets need.

mod sources;

use crate::packager::{
    base85,
    error::{Error, Result},
    settings::PackageOptions,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use handlebars::Handlebars;
use serde::Serialize;

pub use sources::{DOCUMENT_TEMPLATE, ELECTRON_MAIN_TEMPLATE, NOTICE_TEMPLATE};

/// Renders the packaged document from named values.
pub trait DocumentTemplate: Send + Sync {
    /// Renders a complete document.
    fn render(&self, values: &TemplateValues) -> Result<String>;
}

/// Where the document finds the project data.
#[derive(Debug, Clone, Copy)]
pub enum ProjectSource<'a> {
    /// Inline, base-85 encoded in chunked units
    Inline(&'a [u8]),
    /// A file next to the document
    Url(&'a str),
}

/// One inline unit of encoded project data.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectChunk {
    /// Encoded characters
    pub data: String,
    /// Load progress after this unit, 0..=1
    pub progress: f64,
}

/// Named values interpolated into the document.
///
/// Every field is already escaped for the context it is inserted into.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateValues {
    /// HTML-escaped title
    pub title: String,
    /// Background color
    pub background: String,
    /// Foreground color
    pub foreground: String,
    /// Accent color
    pub accent: String,
    /// HTML-escaped loading screen text
    pub loading_text: String,
    /// Whether to show the progress bar
    pub progress_bar: bool,
    /// Runtime options as a JSON literal safe inside a script body
    pub options_json: String,
    /// Scaffolding script, safe inside a script body
    pub scaffolding: String,
    /// `data:` URL of the PNG icon
    pub icon_data_url: Option<String>,
    /// JSON string literal of the project URL, for non-inline projects
    pub project_url_json: Option<String>,
    /// Inline project units, for inline projects
    pub project_chunks: Vec<ProjectChunk>,
}

impl TemplateValues {
    /// Collects values for `options`.
    pub fn new(
        options: &PackageOptions,
        scaffolding: &str,
        icon_png: Option<&[u8]>,
        project: ProjectSource<'_>,
    ) -> Result<Self> {
        let runtime_options = serde_json::json!({
            "title": options.title(),
            "runtime": options.runtime,
            "windowSize": [options.app.window_size.0, options.app.window_size.1],
        });

        let mut values = Self {
            title: handlebars::html_escape(options.title()),
            background: options.appearance.background.clone(),
            foreground: options.appearance.foreground.clone(),
            accent: options.appearance.accent.clone(),
            loading_text: handlebars::html_escape(&options.loading_screen.text),
            progress_bar: options.loading_screen.progress_bar,
            options_json: script_safe_json(&runtime_options)?,
            scaffolding: script_safe(scaffolding),
            icon_data_url: icon_png.map(|png| format!("data:image/png;base64,{}", STANDARD.encode(png))),
            project_url_json: None,
            project_chunks: Vec::new(),
        };

        match project {
            ProjectSource::Url(url) => {
                values.project_url_json = Some(script_safe_json(&url)?);
            }
            ProjectSource::Inline(bytes) => {
                values.project_chunks = inline_chunks(&base85::encode(bytes)?);
            }
        }
        Ok(values)
    }
}

/// Splits encoded project text into units carrying cumulative progress.
pub fn inline_chunks(encoded: &str) -> Vec<ProjectChunk> {
    let units: Vec<&str> = base85::chunks(encoded).collect();
    let total = units.len().max(1) as f64;
    units
        .into_iter()
        .enumerate()
        .map(|(i, data)| ProjectChunk {
            data: data.to_string(),
            progress: (i + 1) as f64 / total,
        })
        .collect()
}

/// Serializes `value` to JSON that cannot close a surrounding script element.
pub fn script_safe_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.replace('<', "\\u003c"))
}

/// Escapes every `</` so no spelling of a closing tag ends the script early.
fn script_safe(source: &str) -> String {
    source.replace("</", "<\\/")
}

/// Values for the Electron main process script.
#[derive(Debug, Clone, Serialize)]
pub struct ElectronMainValues {
    /// Initial content width
    pub width: u32,
    /// Initial content height
    pub height: u32,
    /// Window title as a JSON string literal
    pub title_json: String,
    /// Icon file name as a JSON string literal
    pub icon_json: String,
    /// Background color as a JSON string literal
    pub background_json: String,
}

/// Values for the attribution notice.
#[derive(Debug, Clone, Serialize)]
pub struct NoticeValues {
    /// HTML-escaped package name
    pub package_name: String,
    /// HTML-escaped runtime name
    pub runtime: String,
}

/// Handlebars-backed templates.
pub struct HandlebarsTemplate {
    registry: Handlebars<'static>,
}

impl HandlebarsTemplate {
    const DOCUMENT: &'static str = "document.html";
    const ELECTRON_MAIN: &'static str = "electron-main.js";
    const NOTICE: &'static str = "notice.html";

    /// Registers the built-in templates.
    pub fn new() -> Result<Self> {
        Self::with_document(DOCUMENT_TEMPLATE)
    }

    /// Registers the built-in templates with a custom document template.
    pub fn with_document(document: &str) -> Result<Self> {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);
        for (name, source) in [
            (Self::DOCUMENT, document),
            (Self::ELECTRON_MAIN, ELECTRON_MAIN_TEMPLATE),
            (Self::NOTICE, NOTICE_TEMPLATE),
        ] {
            registry
                .register_template_string(name, source)
                .map_err(|e| Error::GenericError(format!("failed to register {name} template: {e}")))?;
        }
        Ok(Self { registry })
    }

    /// Renders the Electron main process script.
    pub fn render_electron_main(&self, values: &ElectronMainValues) -> Result<String> {
        Ok(self.registry.render(Self::ELECTRON_MAIN, values)?)
    }

    /// Renders the attribution notice.
    pub fn render_notice(&self, values: &NoticeValues) -> Result<String> {
        Ok(self.registry.render(Self::NOTICE, values)?)
    }
}

impl DocumentTemplate for HandlebarsTemplate {
    fn render(&self, values: &TemplateValues) -> Result<String> {
        log::debug!(
            "Rendering document ({} inline project units)",
            values.project_chunks.len()
        );
        Ok(self.registry.render(Self::DOCUMENT, values)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> PackageOptions {
        let mut options = PackageOptions::default();
        options.app.package_name = "Maze".into();
        options.app.window_title = Some("Maze <Deluxe>".into());
        options.loading_screen.text = "Loading & stuff".into();
        options
    }

    fn collected_chunks(document: &str) -> String {
        let open = r#"<script type="application/x-project-chunk">"#;
        document
            .split(open)
            .skip(1)
            .map(|rest| rest.split("</script>").next().unwrap())
            .collect()
    }

    #[test]
    fn inline_project_round_trips_through_document() {
        let project = br#"{"targets":[],"meta":{"semver":"3.0.0"}}"#;
        let values =
            TemplateValues::new(&options(), "/* scaffolding */", None, ProjectSource::Inline(project))
                .unwrap();
        let document = HandlebarsTemplate::new().unwrap().render(&values).unwrap();
        assert_eq!(base85::decode(&collected_chunks(&document)).unwrap(), project);
        assert!(document.contains("setProgress(1"));
        assert!(document.contains("source = { base85: text };"));
    }

    #[test]
    fn url_project_has_no_inline_units() {
        let values =
            TemplateValues::new(&options(), "", None, ProjectSource::Url("project.zip")).unwrap();
        let document = HandlebarsTemplate::new().unwrap().render(&values).unwrap();
        assert!(collected_chunks(&document).is_empty());
        assert!(document.contains(r#"source = { url: "project.zip" };"#));
    }

    #[test]
    fn user_text_is_escaped_for_its_context() {
        let values = TemplateValues::new(
            &options(),
            "document.write('</script>')",
            Some(b"png"),
            ProjectSource::Url("project.json"),
        )
        .unwrap();
        let document = HandlebarsTemplate::new().unwrap().render(&values).unwrap();
        assert!(document.contains("<title>Maze &lt;Deluxe&gt;</title>"));
        assert!(document.contains("Loading &amp; stuff"));
        assert!(document.contains(r"document.write('<\/script>')"));
        assert!(document.contains("\\u003cDeluxe>"));
        assert!(document.contains("data:image/png;base64,cG5n"));
    }

    #[test]
    fn closing_tags_are_escaped_in_any_case() {
        let escaped = script_safe("a('</SCRIPT>'); b('</Script >'); c('</div>');");
        assert_eq!(escaped, r"a('<\/SCRIPT>'); b('<\/Script >'); c('<\/div>');");
        assert!(!escaped.contains("</"));
    }

    #[test]
    fn chunk_progress_ends_at_one() {
        let encoded = "a".repeat(base85::CHUNK_CHARS * 2 + 5);
        let chunks = inline_chunks(&encoded);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].data.len(), base85::CHUNK_CHARS);
        assert_eq!(chunks.last().unwrap().progress, 1.0);
    }

    #[test]
    fn electron_main_embeds_json_literals() {
        let template = HandlebarsTemplate::new().unwrap();
        let source = template
            .render_electron_main(&ElectronMainValues {
                width: 480,
                height: 360,
                title_json: script_safe_json("It's \"Maze\"").unwrap(),
                icon_json: script_safe_json("icon.png").unwrap(),
                background_json: script_safe_json("#000000").unwrap(),
            })
            .unwrap();
        assert!(source.contains("width: 480,"));
        assert!(source.contains(r#"title: "It's \"Maze\"","#));
    }
}
