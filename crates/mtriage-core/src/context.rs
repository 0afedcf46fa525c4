//! Execution context passed down to the orchestrator and analysers

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which orchestrator entry point is driving execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Full run over every input element
    Run,

    /// Run over a small sample of the inputs
    Develop,

    /// Run over synthetic inputs against a throw-away store
    Test,
}

/// Context passed to analysers during execution.
///
/// Carries everything that would otherwise be process-wide state: base
/// directory for relative paths, parallelism and timeouts.
#[derive(Debug, Clone)]
pub struct Context {
    /// Execution mode
    pub mode: ExecutionMode,

    /// Directory relative `path` arguments are resolved against
    pub base_dir: PathBuf,

    /// Maximum number of element traversals in flight
    pub max_parallel: usize,

    /// Timeout for a single step (None = no timeout)
    pub stage_timeout: Option<Duration>,

    /// Attempts per element when an analyser asks for a retry
    pub max_attempts: usize,

    /// Number of inputs a `develop` run keeps
    pub develop_sample: usize,

    /// Number of synthetic inputs a `test` run generates
    pub test_elements: usize,

    /// Whether verbose logging is enabled
    pub verbose: bool,
}

impl Context {
    /// Create a run context rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode: ExecutionMode::Run,
            base_dir: base_dir.into(),
            max_parallel: num_cpus::get(),
            stage_timeout: Some(Duration::from_secs(300)), // 5 minutes default
            max_attempts: 5,
            develop_sample: 3,
            test_elements: 2,
            verbose: false,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    /// Use `None` to disable the per-step timeout
    pub fn with_stage_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_develop_sample(mut self, sample: usize) -> Self {
        self.develop_sample = sample;
        self
    }

    pub fn with_test_elements(mut self, count: usize) -> Self {
        self.test_elements = count;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Resolve `path` against the base directory unless it is absolute
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}
