//! Export of persisted step outputs to a plain directory

use crate::cache::StageResult;
use crate::element::ElementData;
use crate::error::OrchestratorError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Name of the listing written next to the exported files
pub const INDEX_FILE: &str = "index.json";

/// One exported element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEntry {
    pub element: String,
    pub analyser: String,
    pub step: usize,
    pub fingerprint: String,

    /// File names written for this element, relative to the export dir
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub out_dir: PathBuf,
    pub entries: Vec<ExportEntry>,
}

impl ExportReport {
    pub fn file_count(&self) -> usize {
        self.entries.iter().map(|e| e.files.len()).sum()
    }
}

/// Keep file names portable
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Write `payload` under `stem`, returning the file names created
fn write_payload(
    out_dir: &Path,
    stem: &str,
    payload: &ElementData,
) -> Result<Vec<String>, OrchestratorError> {
    let mut files = Vec::new();
    let mut pending = vec![(stem.to_string(), payload)];

    while let Some((stem, payload)) = pending.pop() {
        match payload {
            ElementData::Json(value) => {
                let name = format!("{stem}.json");
                std::fs::write(out_dir.join(&name), serde_json::to_vec_pretty(value)?)?;
                files.push(name);
            }
            ElementData::Bytes(bytes) => {
                let name = format!("{stem}.bin");
                std::fs::write(out_dir.join(&name), bytes)?;
                files.push(name);
            }
            ElementData::FilePath(path) => {
                let name = match path.extension() {
                    Some(ext) => format!("{stem}.{}", sanitize(&ext.to_string_lossy())),
                    None => stem,
                };
                std::fs::copy(path, out_dir.join(&name))?;
                files.push(name);
            }
            ElementData::Multiple(items) => {
                for (i, item) in items.iter().enumerate().rev() {
                    pending.push((format!("{stem}_{i:03}"), item));
                }
            }
        }
    }

    Ok(files)
}

/// Write the outputs of `results` into `out_dir`, plus an [`INDEX_FILE`]
/// listing what was written.
pub fn export_results(
    results: &[StageResult],
    out_dir: &Path,
) -> Result<ExportReport, OrchestratorError> {
    std::fs::create_dir_all(out_dir)?;

    let mut entries = Vec::with_capacity(results.len());
    for result in results {
        let Some(element) = result.output() else {
            continue;
        };
        let short = &result.fingerprint[..result.fingerprint.len().min(8)];
        let stem = format!(
            "{:02}_{}_{}_{}",
            result.step_index,
            sanitize(&result.analyser),
            sanitize(&element.id),
            short
        );
        let files = write_payload(out_dir, &stem, &element.payload)?;
        entries.push(ExportEntry {
            element: element.id.clone(),
            analyser: result.analyser.clone(),
            step: result.step_index,
            fingerprint: result.fingerprint.clone(),
            files,
        });
    }

    std::fs::write(
        out_dir.join(INDEX_FILE),
        serde_json::to_vec_pretty(&entries)?,
    )?;

    let report = ExportReport {
        out_dir: out_dir.to_path_buf(),
        entries,
    };
    info!(
        "Exported {} elements ({} files) to {}",
        report.entries.len(),
        report.file_count(),
        out_dir.display()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StageOutcome;
    use crate::element::Element;
    use crate::etype::Etype;
    use serde_json::json;
    use std::time::{Duration, SystemTime};

    fn stored(id: &str, payload: ElementData) -> StageResult {
        StageResult {
            pipeline: "demo".to_string(),
            step_index: 1,
            analyser: "MediaMeta".to_string(),
            fingerprint: "0123456789abcdef".to_string(),
            input_fingerprint: "in".to_string(),
            outcome: StageOutcome::Succeeded(Element::new(id, Etype::Any, payload)),
            duration: Duration::ZERO,
            created_at: SystemTime::now(),
        }
    }

    #[test]
    fn test_export_writes_files_and_index() {
        let src = tempfile::tempdir().unwrap();
        let photo = src.path().join("photo.jpg");
        std::fs::write(&photo, b"jpeg").unwrap();
        let out = tempfile::tempdir().unwrap();

        let results = vec![
            stored("a", ElementData::Json(json!({"k": 1}))),
            stored("b c", ElementData::Bytes(vec![1, 2])),
            stored(
                "frames",
                ElementData::Multiple(vec![
                    ElementData::FilePath(photo),
                    ElementData::Json(json!([])),
                ]),
            ),
        ];

        let report = export_results(&results, out.path()).unwrap();
        assert_eq!(report.entries.len(), 3);
        assert_eq!(report.entries[0].files, vec!["01_MediaMeta_a_01234567.json"]);
        assert_eq!(report.entries[1].files, vec!["01_MediaMeta_b_c_01234567.bin"]);
        assert_eq!(
            report.entries[2].files,
            vec![
                "01_MediaMeta_frames_01234567_000.jpg",
                "01_MediaMeta_frames_01234567_001.json"
            ]
        );
        assert_eq!(
            std::fs::read(out.path().join("01_MediaMeta_frames_01234567_000.jpg")).unwrap(),
            b"jpeg"
        );

        let index: Vec<ExportEntry> =
            serde_json::from_slice(&std::fs::read(out.path().join(INDEX_FILE)).unwrap()).unwrap();
        assert_eq!(index, report.entries);
    }

    #[test]
    fn test_failed_results_are_skipped() {
        let out = tempfile::tempdir().unwrap();
        let mut failed = stored("a", ElementData::Bytes(vec![]));
        failed.outcome = StageOutcome::Failed("boom".to_string());
        let report = export_results(&[failed], out.path()).unwrap();
        assert!(report.entries.is_empty());
        assert!(out.path().join(INDEX_FILE).is_file());
    }
}
