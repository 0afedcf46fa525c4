//! Step fingerprints and the persistent result store

use crate::element::Element;
use crate::error::StoreError;
use crate::schema::ResolvedConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::debug;

/// Cache key for one step applied to one element.
///
/// Any change to the analyser's name, cache version, resolved config or the
/// upstream element yields a different fingerprint.
pub fn fingerprint(
    analyser: &str,
    version: u32,
    config: &ResolvedConfig,
    upstream: &str,
) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [analyser.as_bytes(), upstream.as_bytes()] {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.update(&version.to_le_bytes());
    config.hash_into(&mut hasher);
    hasher.finalize().to_hex().to_string()
}

/// What a step produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageOutcome {
    Succeeded(Element),
    Failed(String),
    Skipped(String),
}

/// Record of one step applied to one element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub pipeline: String,
    pub step_index: usize,
    pub analyser: String,
    pub fingerprint: String,

    /// Fingerprint of the element the step consumed
    pub input_fingerprint: String,
    pub outcome: StageOutcome,
    pub duration: Duration,
    pub created_at: SystemTime,
}

impl StageResult {
    pub fn output(&self) -> Option<&Element> {
        match &self.outcome {
            StageOutcome::Succeeded(element) => Some(element),
            StageOutcome::Failed(_) | StageOutcome::Skipped(_) => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, StageOutcome::Succeeded(_))
    }

    /// Get age of the result
    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.created_at)
            .unwrap_or_default()
    }
}

/// Storage for successful step results, keyed by pipeline, step and
/// fingerprint.
///
/// Readers may run concurrently. Writes are first-writer-wins: a second
/// `put_if_absent` for the same key leaves the stored result untouched.
pub trait ResultStore: Send + Sync {
    fn get(
        &self,
        pipeline: &str,
        step: usize,
        fingerprint: &str,
    ) -> Result<Option<StageResult>, StoreError>;

    /// Store `result` unless its key is taken. Only successful outcomes are
    /// stored. Returns whether this call wrote the result.
    fn put_if_absent(&self, result: &StageResult) -> Result<bool, StoreError>;

    /// Stored results of a pipeline, ordered by step then element id.
    /// `step = None` lists every step.
    fn list(&self, pipeline: &str, step: Option<usize>) -> Result<Vec<StageResult>, StoreError>;

    /// Delete stored results; returns how many were removed
    fn remove(&self, pipeline: &str, step: Option<usize>) -> Result<usize, StoreError>;
}

fn sort_results(results: &mut [StageResult]) {
    results.sort_by(|a, b| {
        let id = |r: &StageResult| r.output().map(|e| e.id.clone()).unwrap_or_default();
        a.step_index
            .cmp(&b.step_index)
            .then_with(|| id(a).cmp(&id(b)))
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });
}

type MemoryKey = (String, usize, String);

/// In-process store, used by `test` runs and unit tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    results: RwLock<HashMap<MemoryKey, StageResult>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.results
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultStore for MemoryStore {
    fn get(
        &self,
        pipeline: &str,
        step: usize,
        fingerprint: &str,
    ) -> Result<Option<StageResult>, StoreError> {
        let results = self.results.read().unwrap_or_else(PoisonError::into_inner);
        let key = (pipeline.to_string(), step, fingerprint.to_string());
        Ok(results.get(&key).cloned())
    }

    fn put_if_absent(&self, result: &StageResult) -> Result<bool, StoreError> {
        if !result.is_success() {
            return Ok(false);
        }
        let mut results = self.results.write().unwrap_or_else(PoisonError::into_inner);
        let key = (
            result.pipeline.clone(),
            result.step_index,
            result.fingerprint.clone(),
        );
        if results.contains_key(&key) {
            return Ok(false);
        }
        results.insert(key, result.clone());
        Ok(true)
    }

    fn list(&self, pipeline: &str, step: Option<usize>) -> Result<Vec<StageResult>, StoreError> {
        let results = self.results.read().unwrap_or_else(PoisonError::into_inner);
        let mut listed: Vec<StageResult> = results
            .iter()
            .filter(|((p, s, _), _)| p == pipeline && step.map_or(true, |step| *s == step))
            .map(|(_, result)| result.clone())
            .collect();
        sort_results(&mut listed);
        Ok(listed)
    }

    fn remove(&self, pipeline: &str, step: Option<usize>) -> Result<usize, StoreError> {
        let mut results = self.results.write().unwrap_or_else(PoisonError::into_inner);
        let before = results.len();
        results.retain(|(p, s, _), _| !(p == pipeline && step.map_or(true, |step| *s == step)));
        Ok(before - results.len())
    }
}

/// Filesystem store: `<root>/<pipeline>-<hash>/<step:02>/<fingerprint>.json`.
///
/// The pipeline name is sanitised for the filesystem and suffixed with a
/// short hash of the raw name, so distinct names never share a directory.
///
/// Results are written to a temp file in the target directory and published
/// with a no-clobber rename, so readers never observe a partial file.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pipeline_dir(&self, pipeline: &str) -> PathBuf {
        let safe: String = pipeline
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let hash = blake3::hash(pipeline.as_bytes()).to_hex();
        self.root.join(format!("{safe}-{}", &hash.as_str()[..8]))
    }

    fn step_dir(&self, pipeline: &str, step: usize) -> PathBuf {
        self.pipeline_dir(pipeline).join(format!("{step:02}"))
    }

    /// Step directories present for `pipeline`, as `(index, path)`
    fn step_dirs(&self, pipeline: &str) -> Result<Vec<(usize, PathBuf)>, StoreError> {
        let dir = self.pipeline_dir(pipeline);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut steps = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Ok(index) = entry.file_name().to_string_lossy().parse::<usize>() {
                steps.push((index, entry.path()));
            }
        }
        steps.sort();
        Ok(steps)
    }

    /// Result files in one step directory; temp files are skipped
    fn result_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl ResultStore for DiskStore {
    fn get(
        &self,
        pipeline: &str,
        step: usize,
        fingerprint: &str,
    ) -> Result<Option<StageResult>, StoreError> {
        let path = self
            .step_dir(pipeline, step)
            .join(format!("{fingerprint}.json"));
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put_if_absent(&self, result: &StageResult) -> Result<bool, StoreError> {
        if !result.is_success() {
            return Ok(false);
        }

        let dir = self.step_dir(&result.pipeline, result.step_index);
        std::fs::create_dir_all(&dir)?;
        let target = dir.join(format!("{}.json", result.fingerprint));
        if target.exists() {
            return Ok(false);
        }

        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer(&mut tmp, result)?;
        tmp.flush()?;

        match tmp.persist_noclobber(&target) {
            Ok(_) => {
                debug!("Stored result {}", target.display());
                Ok(true)
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.error.into()),
        }
    }

    fn list(&self, pipeline: &str, step: Option<usize>) -> Result<Vec<StageResult>, StoreError> {
        let mut results = Vec::new();
        for (index, dir) in self.step_dirs(pipeline)? {
            if step.is_some_and(|step| step != index) {
                continue;
            }
            for file in Self::result_files(&dir)? {
                let bytes = std::fs::read(&file)?;
                results.push(serde_json::from_slice(&bytes)?);
            }
        }
        sort_results(&mut results);
        Ok(results)
    }

    fn remove(&self, pipeline: &str, step: Option<usize>) -> Result<usize, StoreError> {
        let mut removed = 0;
        for (index, dir) in self.step_dirs(pipeline)? {
            if step.is_some_and(|step| step != index) {
                continue;
            }
            removed += Self::result_files(&dir)?.len();
            std::fs::remove_dir_all(&dir)?;
        }

        if step.is_none() {
            let dir = self.pipeline_dir(pipeline);
            if dir.exists() {
                std::fs::remove_dir_all(&dir)?;
            }
        }
        Ok(removed)
    }
}
