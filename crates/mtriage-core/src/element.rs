//! Elements: the data units that flow between analysers

use crate::etype::Etype;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::debug;

/// Payload carried by an element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementData {
    /// Raw bytes
    Bytes(Vec<u8>),

    /// File path reference
    FilePath(PathBuf),

    /// JSON value
    Json(serde_json::Value),

    /// Multiple payloads (e.g. frames of a video)
    Multiple(Vec<ElementData>),
}

impl ElementData {
    /// Short name of the payload variant
    pub fn kind(&self) -> &'static str {
        match self {
            ElementData::Bytes(_) => "bytes",
            ElementData::FilePath(_) => "file",
            ElementData::Json(_) => "json",
            ElementData::Multiple(_) => "multiple",
        }
    }

    fn hash_into(&self, hasher: &mut blake3::Hasher) {
        match self {
            ElementData::Bytes(bytes) => {
                hasher.update(b"Bytes");
                hasher.update(&(bytes.len() as u64).to_le_bytes());
                hasher.update(bytes);
            }
            ElementData::FilePath(path) => {
                hasher.update(b"FilePath");
                hasher.update(path.to_string_lossy().as_bytes());

                // Include file metadata so edits invalidate downstream results
                if let Ok(metadata) = std::fs::metadata(path) {
                    hasher.update(&metadata.len().to_le_bytes());
                    if let Ok(modified) = metadata.modified() {
                        let nanos = modified
                            .duration_since(UNIX_EPOCH)
                            .map(|d| d.as_nanos())
                            .unwrap_or_default();
                        hasher.update(&nanos.to_le_bytes());
                    }
                }
            }
            ElementData::Json(value) => {
                hasher.update(b"Json");
                if let Ok(json) = serde_json::to_vec(value) {
                    hasher.update(&json);
                }
            }
            ElementData::Multiple(items) => {
                hasher.update(b"Multiple");
                hasher.update(&(items.len() as u64).to_le_bytes());
                for item in items {
                    item.hash_into(hasher);
                }
            }
        }
    }
}

/// A media item or derived artifact, tagged with its etype.
///
/// Steps take elements by value and hand back a new one, so no step can keep
/// a handle on data that a later step is working with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    pub etype: Etype,
    pub payload: ElementData,
}

impl Element {
    pub fn new(id: impl Into<String>, etype: Etype, payload: ElementData) -> Self {
        Self {
            id: id.into(),
            etype,
            payload,
        }
    }

    pub fn json(id: impl Into<String>, etype: Etype, value: serde_json::Value) -> Self {
        Self::new(id, etype, ElementData::Json(value))
    }

    /// Wrap a media file, guessing its etype from the extension
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let etype = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Etype::from_extension)
            .unwrap_or(Etype::Any);
        let id = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self::new(id, etype, ElementData::FilePath(path))
    }

    /// Deterministic stand-in element of the given etype, used by `test` runs
    pub fn synthetic(etype: Etype, index: usize) -> Self {
        let id = format!("synthetic-{index:03}");
        let payload = match etype {
            Etype::Image | Etype::Video | Etype::Audio => {
                let seed = (index as u8).wrapping_add(1);
                ElementData::Bytes((0..64u8).map(|b| b.wrapping_mul(seed)).collect())
            }
            Etype::Text => ElementData::Bytes(format!("synthetic text {index}").into_bytes()),
            Etype::CvJson => ElementData::Json(serde_json::json!({
                "predictions": [
                    {"label": "person", "score": 0.9},
                    {"label": "car", "score": 0.05},
                ]
            })),
            Etype::Json | Etype::Any => ElementData::Json(serde_json::json!({ "synthetic": index })),
        };
        Self::new(id, etype, payload)
    }

    /// Hex blake3 digest of etype, id and payload
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.etype.name().as_bytes());
        hasher.update(&(self.id.len() as u64).to_le_bytes());
        hasher.update(self.id.as_bytes());
        self.payload.hash_into(&mut hasher);
        hasher.finalize().to_hex().to_string()
    }
}

/// Read every media file directly inside `folder` as an element.
///
/// Files are returned sorted by name; hidden files are skipped.
pub fn load_elements(folder: &Path) -> std::io::Result<Vec<Element>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        paths.push(entry.path());
    }
    paths.sort();

    debug!("Loaded {} elements from {}", paths.len(), folder.display());
    Ok(paths.into_iter().map(Element::from_path).collect())
}
