//! The single JSON document the index is persisted to.

use crate::index::hash::PerceptualHash;
use crate::index::store::FolderStats;
use crate::util::fs::{read_json, write_json};
use crate::util::{LocateError, LocateResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// One template reference in the index document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    /// Path relative to the template store root.
    pub path: PathBuf,
    pub hash: PerceptualHash,
    pub element_name: String,
    pub created: DateTime<Utc>,
    pub version: u32,
}

/// `{templates: [...], folderStats: {path: {...}}}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDocument {
    #[serde(default)]
    pub templates: Vec<IndexEntry>,
    #[serde(default)]
    pub folder_stats: BTreeMap<String, FolderStats>,
}

impl IndexDocument {
    /// Reads the document; `Ok(None)` when the file does not exist.
    ///
    /// Unreadable or unparsable documents map to `IndexCorrupt`.
    pub fn load(path: &Path) -> LocateResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        read_json(path)
            .map(Some)
            .map_err(|err| LocateError::IndexCorrupt {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })
    }

    pub fn save(&self, path: &Path) -> LocateResult<()> {
        write_json(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::IndexDocument;
    use crate::util::LocateError;

    #[test]
    fn missing_document_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(IndexDocument::load(&dir.path().join("none.json")).unwrap(), None);
    }

    #[test]
    fn garbage_document_is_reported_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global_index.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            IndexDocument::load(&path),
            Err(LocateError::IndexCorrupt { .. })
        ));
    }

    #[test]
    fn document_uses_documented_keys() {
        let json = r#"{"templates":[{"path":"screens/current/a_auto.png","hash":"00000000000000ff","elementName":"a","created":"2024-01-02T03:04:05Z","version":2}],"folderStats":{"screens/current":{"sizeMB":0.5,"created":"2024-01-01T00:00:00Z","lastModified":"2024-01-02T00:00:00Z"}}}"#;
        let doc: IndexDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.templates[0].version, 2);
        assert_eq!(doc.templates[0].hash.0, 0xff);
        assert!((doc.folder_stats["screens/current"].size_mb - 0.5).abs() < 1e-12);
    }
}
