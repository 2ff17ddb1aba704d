//! Project bundles handed to the packager by a project loader.

use crate::packager::{
    error::{ErrorExt, Result},
    optimizer::{CONFIG_COMMENT_MARKER, ProjectOptimizer},
};
use bytes::Bytes;
use regex::Regex;
use serde_json::Value;
use std::{
    io::{Cursor, Read, Write},
    path::Path,
    sync::LazyLock,
};
use zip::{CompressionMethod, ZipArchive, ZipWriter, write::SimpleFileOptions};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const PROJECT_ENTRY: &str = "project.json";

static CONFIG_COMMENT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(&format!(r"(?s)(\{{.*\}})\s*//\s*{CONFIG_COMMENT_MARKER}")).ok()
});

/// Storage format of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectKind {
    /// Plain `project.json`
    StructuredJson,
    /// Zip holding `project.json` and the project's media
    OpaqueArchive,
    /// Anything else; passed through untouched
    OpaqueBlob,
}

impl ProjectKind {
    /// Detects the kind from the leading bytes.
    pub fn sniff(data: &[u8]) -> Self {
        if data.starts_with(ZIP_MAGIC) {
            ProjectKind::OpaqueArchive
        } else if data.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{') {
            ProjectKind::StructuredJson
        } else {
            ProjectKind::OpaqueBlob
        }
    }
}

/// A variable owned by the stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageVariable {
    pub id: String,
    pub name: String,
    /// Synchronized through a cloud server
    pub is_cloud: bool,
}

/// Facts about a project gathered once when it is loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectAnalysis {
    pub stage_variables: Vec<StageVariable>,
    pub uses_cloud_variables: bool,
    /// Settings stored in the project's configuration comment
    pub config_comment: Option<Value>,
}

impl ProjectAnalysis {
    /// Analyzes a parsed `project.json`.
    pub fn of(project: &Value) -> Self {
        let stage = project
            .get("targets")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|t| t.get("isStage").and_then(Value::as_bool) == Some(true));
        let Some(stage) = stage else {
            return Self::default();
        };

        let stage_variables: Vec<StageVariable> = stage
            .get("variables")
            .and_then(Value::as_object)
            .into_iter()
            .flatten()
            .filter_map(|(id, variable)| {
                let fields = variable.as_array()?;
                Some(StageVariable {
                    id: id.clone(),
                    name: fields.first()?.as_str()?.to_string(),
                    is_cloud: fields.get(2).and_then(Value::as_bool).unwrap_or(false),
                })
            })
            .collect();

        let config_comment = stage
            .get("comments")
            .and_then(Value::as_object)
            .into_iter()
            .flatten()
            .filter_map(|(_, comment)| comment.get("text").and_then(Value::as_str))
            .find_map(parse_config_comment);

        Self {
            uses_cloud_variables: stage_variables.iter().any(|v| v.is_cloud),
            stage_variables,
            config_comment,
        }
    }
}

fn parse_config_comment(text: &str) -> Option<Value> {
    let captures = CONFIG_COMMENT.as_ref()?.captures(text)?;
    serde_json::from_str(captures.get(1)?.as_str()).ok()
}

/// A loaded project, read-only to the packager.
#[derive(Debug, Clone)]
pub struct ProjectBundle {
    pub kind: ProjectKind,
    pub data: Bytes,
    pub analysis: ProjectAnalysis,
}

impl ProjectBundle {
    /// Wraps raw project bytes, detecting their kind.
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let kind = ProjectKind::sniff(&data);
        let analysis = match kind {
            ProjectKind::StructuredJson => ProjectAnalysis::of(&serde_json::from_slice(&data)?),
            ProjectKind::OpaqueArchive => match read_entry(&data, PROJECT_ENTRY)? {
                Some(json) => serde_json::from_slice::<Value>(&json)
                    .map(|project| ProjectAnalysis::of(&project))
                    .unwrap_or_default(),
                None => ProjectAnalysis::default(),
            },
            ProjectKind::OpaqueBlob => ProjectAnalysis::default(),
        };
        log::debug!(
            "Loaded {:?} project ({} bytes, {} stage variables)",
            kind,
            data.len(),
            analysis.stage_variables.len()
        );
        Ok(Self {
            kind,
            data,
            analysis,
        })
    }

    /// Reads a project file.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path)
            .await
            .fs_context("reading project", path)?;
        Self::from_bytes(data)
    }

    /// File name the project data is stored under next to the document.
    pub fn file_name(&self) -> &'static str {
        match self.kind {
            ProjectKind::StructuredJson => "project.json",
            ProjectKind::OpaqueArchive => "project.zip",
            ProjectKind::OpaqueBlob => "project.sb",
        }
    }

    /// Project data ready to ship, optimized when `optimizer` is given.
    ///
    /// Archives are rebuilt with a recompressed `project.json`; the other
    /// entries are copied without recompression. Blocking.
    pub fn prepare(&self, optimizer: Option<&ProjectOptimizer>) -> Result<Bytes> {
        let Some(optimizer) = optimizer else {
            return Ok(self.data.clone());
        };
        match self.kind {
            ProjectKind::StructuredJson => Ok(optimizer.optimize_bytes(&self.data)?.into()),
            ProjectKind::OpaqueArchive => rezip(&self.data, optimizer),
            ProjectKind::OpaqueBlob => Ok(self.data.clone()),
        }
    }
}

fn read_entry(zip: &Bytes, name: &str) -> Result<Option<Vec<u8>>> {
    let mut archive = ZipArchive::new(Cursor::new(zip.clone()))?;
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(Some(bytes))
}

fn rezip(zip: &Bytes, optimizer: &ProjectOptimizer) -> Result<Bytes> {
    let Some(json) = read_entry(zip, PROJECT_ENTRY)? else {
        log::warn!("Project archive has no {}, leaving it unchanged", PROJECT_ENTRY);
        return Ok(zip.clone());
    };
    let optimized = optimizer.optimize_bytes(&json)?;
    log::info!(
        "Optimized {}: {} -> {} bytes",
        PROJECT_ENTRY,
        json.len(),
        optimized.len()
    );

    let mut archive = ZipArchive::new(Cursor::new(zip.clone()))?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for i in 0..archive.len() {
        let file = archive.by_index_raw(i)?;
        if file.name() == PROJECT_ENTRY {
            continue;
        }
        writer.raw_copy_file(file)?;
    }
    writer.start_file(
        PROJECT_ENTRY,
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
    )?;
    writer.write_all(&optimized)?;
    Ok(Bytes::from(writer.finish()?.into_inner()))
}
