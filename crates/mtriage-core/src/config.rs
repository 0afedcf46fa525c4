//! Run files: the YAML that names a pipeline, its inputs and its steps

use crate::composer::StepConfig;
use crate::context::Context;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides the cache root
pub const CACHE_DIR_ENV: &str = "MTRIAGE_CACHE_DIR";

/// Overrides `max_parallel`
pub const THREADS_ENV: &str = "MTRIAGE_THREADS";

fn default_analyser_roots() -> Vec<PathBuf> {
    vec![PathBuf::from("analysers")]
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".mtriage/cache")
}

fn default_stage_timeout_secs() -> u64 {
    300
}

fn default_develop_sample() -> usize {
    3
}

fn default_test_elements() -> usize {
    2
}

/// Parsed run file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Pipeline name, also the cache namespace
    pub name: String,

    /// Folder holding the input media
    pub folder: PathBuf,

    /// Directories scanned for analysers, in priority order
    #[serde(default = "default_analyser_roots")]
    pub analysers: Vec<PathBuf>,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Defaults to the number of CPUs
    #[serde(default)]
    pub max_parallel: Option<usize>,

    /// Per-step timeout in seconds; 0 disables it
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    #[serde(default = "default_develop_sample")]
    pub develop_sample: usize,

    #[serde(default = "default_test_elements")]
    pub test_elements: usize,

    pub steps: Vec<StepConfig>,

    /// Directory of the run file; relative paths resolve against it
    #[serde(skip)]
    base_dir: PathBuf,
}

impl RunConfig {
    pub fn from_yaml_str(contents: &str, base_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut config: RunConfig = serde_yaml::from_str(contents)?;
        config.base_dir = base_dir.into();
        config.check()?;
        Ok(config)
    }

    /// Load a run file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::from_yaml_str(&contents, base_dir)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "pipeline '{}' has no steps",
                self.name
            )));
        }
        if self.max_parallel == Some(0) {
            return Err(ConfigError::Invalid(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn input_dir(&self) -> PathBuf {
        self.resolve(&self.folder)
    }

    pub fn analyser_roots(&self) -> Vec<PathBuf> {
        self.analysers.iter().map(|root| self.resolve(root)).collect()
    }

    /// Cache root, honouring `MTRIAGE_CACHE_DIR`
    pub fn cache_root(&self) -> PathBuf {
        self.cache_root_with(std::env::var_os(CACHE_DIR_ENV).map(PathBuf::from))
    }

    fn cache_root_with(&self, env: Option<PathBuf>) -> PathBuf {
        match env {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => self.resolve(&self.cache_dir),
        }
    }

    /// Execution context for this run, honouring `MTRIAGE_THREADS`
    pub fn context(&self) -> Context {
        self.context_with(std::env::var(THREADS_ENV).ok())
    }

    fn context_with(&self, threads: Option<String>) -> Context {
        let mut context = Context::new(self.base_dir.clone())
            .with_develop_sample(self.develop_sample)
            .with_test_elements(self.test_elements)
            .with_stage_timeout(
                (self.stage_timeout_secs > 0).then(|| Duration::from_secs(self.stage_timeout_secs)),
            );

        let threads = threads.and_then(|t| t.trim().parse::<usize>().ok());
        if let Some(max) = threads.or(self.max_parallel) {
            context = context.with_max_parallel(max);
        }
        context
    }
}
