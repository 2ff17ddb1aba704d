//! The output of a packaging run.

use crate::packager::{
    builder::sha256_hex,
    error::Result,
    utils::fs::write_atomic,
};
use std::path::Path;

/// Artifact payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactData {
    /// A text document
    Text(String),
    /// A binary archive
    Bytes(Vec<u8>),
}

impl ArtifactData {
    /// Raw bytes of the payload.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ArtifactData::Text(text) => text.as_bytes(),
            ArtifactData::Bytes(bytes) => bytes,
        }
    }
}

/// A finished artifact, ready to be saved.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub data: ArtifactData,
    pub mime_type: &'static str,
    pub suggested_filename: String,
}

impl Artifact {
    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.data.as_bytes().len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// SHA-256 of the payload, lowercase hex.
    pub fn checksum(&self) -> String {
        sha256_hex(self.data.as_bytes())
    }

    /// Writes the artifact to `path` atomically.
    pub async fn write_to(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.data.as_bytes()).await?;
        log::info!("✓ Created {} ({} bytes)", path.display(), self.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_payload() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = Artifact {
            data: ArtifactData::Text("<html></html>".into()),
            mime_type: "text/html",
            suggested_filename: "game.html".into(),
        };
        let path = dir.path().join(&artifact.suggested_filename);
        artifact.write_to(&path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<html></html>");
        assert_eq!(artifact.checksum(), sha256_hex(b"<html></html>"));
        assert_eq!(artifact.len(), 13);
    }
}
