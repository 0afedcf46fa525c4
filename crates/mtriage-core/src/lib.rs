//! mtriage core - analyser pipelines over media collections
//!
//! Analysers are discovered from directories holding an `info.yaml`, bound to
//! Rust implementations through a [`BindingTable`], composed into type-checked
//! pipelines and executed element by element with results cached on disk.

pub mod analyser;
pub mod analysers;
pub mod cache;
pub mod composer;
pub mod config;
pub mod context;
pub mod element;
pub mod error;
pub mod etype;
pub mod export;
pub mod manifest;
pub mod orchestrator;
pub mod registry;
pub mod scaffold;
pub mod schema;
pub mod state;

pub use analyser::{is_camel_case, Analyser, AnalyserDescriptor, BindingTable};
pub use cache::{fingerprint, DiskStore, MemoryStore, ResultStore, StageOutcome, StageResult};
pub use composer::{Composer, PipelineSpec, PipelineStep, StepConfig};
pub use config::RunConfig;
pub use context::{Context, ExecutionMode};
pub use element::{load_elements, Element, ElementData};
pub use error::{
    AnalyserError, CompositionError, ConfigError, OrchestratorError, RegistryError,
    ScaffoldError, SchemaError, StoreError,
};
pub use etype::Etype;
pub use export::{ExportEntry, ExportReport};
pub use manifest::AnalyserManifest;
pub use orchestrator::{
    BuildFailure, BuildFilter, BuildReport, Orchestrator, RunReport, StepRecord, TraversalReport,
};
pub use registry::{Collision, Discovery, Registry};
pub use scaffold::create_analyser;
pub use schema::{ArgKind, ArgSchema, ArgSpec, ArgValue, ResolvedConfig};
pub use state::{PipelineState, StepState};
