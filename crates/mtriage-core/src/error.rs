//! Error types for the analyser system

use crate::etype::Etype;
use crate::schema::ArgKind;
use thiserror::Error;

/// Configuration rejected by an analyser's argument schema
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("missing required argument '{0}'")]
    MissingRequiredArg(String),

    #[error("unknown argument '{0}'")]
    UnknownArg(String),

    #[error("argument '{name}' expects a {expected} value, got {got}")]
    InvalidArgType {
        name: String,
        expected: ArgKind,
        got: String,
    },

    #[error("argument '{0}' is declared more than once")]
    DuplicateArg(String),

    #[error("required argument '{0}' must not declare a default")]
    RequiredWithDefault(String),

    #[error("default for argument '{name}' is invalid: {reason}")]
    InvalidDefault { name: String, reason: String },
}

/// Failure raised by an analyser's own code
#[derive(Error, Debug)]
pub enum AnalyserError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Analysis failed: {0}")]
    ExecutionFailed(String),

    /// Transient failure; the element is offered again
    #[error("Retry requested: {0}")]
    Retry(String),

    /// The element is dropped without failing its traversal
    #[error("Element skipped: {0}")]
    Skip(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("malformed analyser '{name}': {cause}")]
    MalformedAnalyser { name: String, cause: String },

    #[error("all {failed} discovered analysers failed to load")]
    NothingDiscovered { failed: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RegistryError {
    pub(crate) fn malformed(name: impl Into<String>, cause: impl ToString) -> Self {
        RegistryError::MalformedAnalyser {
            name: name.into(),
            cause: cause.to_string(),
        }
    }
}

/// Pipeline rejected before any analyser runs
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompositionError {
    #[error("pipeline has no steps")]
    EmptyPipeline,

    #[error("step {step}: unknown analyser '{name}'")]
    UnknownAnalyser { step: usize, name: String },

    #[error("step {step} ({analyser}): {source}")]
    InvalidConfig {
        step: usize,
        analyser: String,
        #[source]
        source: SchemaError,
    },

    #[error("step {step} ({analyser}): expects {expected} input but the previous step produces {got}")]
    TypeMismatch {
        step: usize,
        analyser: String,
        expected: Etype,
        got: Etype,
    },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("step {step} ({analyser}) violated its contract: declared output {expected}, produced {got}")]
    ContractViolation {
        step: usize,
        analyser: String,
        expected: Etype,
        got: Etype,
    },

    #[error("step {step} ({analyser}) failed: {cause}")]
    ExecutionFailure {
        step: usize,
        analyser: String,
        #[source]
        cause: AnalyserError,
    },

    #[error("step {step} ({analyser}) setup failed: {cause}")]
    Setup {
        step: usize,
        analyser: String,
        #[source]
        cause: AnalyserError,
    },

    #[error("step {step} ({analyser}) timed out after {seconds}s")]
    Timeout {
        step: usize,
        analyser: String,
        seconds: u64,
    },

    #[error("no input elements for pipeline '{0}'")]
    NoElements(String),

    #[error("nothing to export for pipeline '{0}'")]
    NothingToExport(String),

    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Result store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Traversal task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum ScaffoldError {
    #[error("'{0}' is not a CamelCase analyser name")]
    InvalidName(String),

    #[error("analyser '{0}' already exists")]
    AlreadyExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid run file: {0}")]
    Invalid(String),
}
