//! Shared run-file loading
//!
//! Every pipeline command goes through the same steps: read the run file,
//! discover analysers, compose the pipeline and open the result store.

use anyhow::{Context, Result};
use mtriage_core::{
    load_elements, BindingTable, Composer, DiskStore, Element, Orchestrator, PipelineSpec,
    PipelineState, Registry, RunConfig, RunReport,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// A run file with everything needed to execute it
pub struct LoadedPipeline {
    pub config: RunConfig,
    pub spec: PipelineSpec,
}

impl LoadedPipeline {
    /// Orchestrator over the on-disk result store
    pub fn orchestrator(&self, verbose: bool) -> Orchestrator {
        let cache_root = self.config.cache_root();
        info!("Cache: {}", cache_root.display());
        Orchestrator::new(
            self.config.context().with_verbose(verbose),
            Arc::new(DiskStore::new(cache_root)),
        )
    }

    /// Elements of the run file's input folder
    pub fn inputs(&self) -> Result<Vec<Element>> {
        let input_dir = self.config.input_dir();
        info!("Input folder: {}", input_dir.display());
        load_elements(&input_dir)
            .with_context(|| format!("Failed to read input folder {}", input_dir.display()))
    }
}

/// Discover analysers from the run file's roots, logging isolated failures
pub fn discover(config: &RunConfig) -> Result<Registry> {
    let discovery = Registry::discover(&config.analyser_roots(), &BindingTable::builtin())
        .context("Failed to discover analysers")?;
    for failure in &discovery.failures {
        warn!("{}", failure);
    }
    Ok(discovery.registry)
}

/// Load, discover and compose the pipeline described by `yaml`
pub fn load_pipeline(yaml: &Path) -> Result<LoadedPipeline> {
    let config = RunConfig::load(yaml)
        .with_context(|| format!("Failed to load run file {}", yaml.display()))?;
    let registry = discover(&config)?;
    let spec = Composer::new(&registry)
        .compose(&config.name, &config.steps)
        .with_context(|| format!("Invalid pipeline '{}'", config.name))?;

    Ok(LoadedPipeline { config, spec })
}

/// Print a human summary of a run, or the outputs as JSON
pub fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        let outputs: Vec<_> = report.outputs().collect();
        println!("{}", serde_json::to_string_pretty(&outputs)?);
        return Ok(());
    }

    println!(
        "{}: {} ({} completed, {} skipped, {} aborted; {} steps executed, {} from cache)",
        report.pipeline,
        report.state,
        report.completed(),
        report.skipped(),
        report.aborted(),
        report.executed,
        report.resolved
    );
    for traversal in report.traversals.iter().filter(|t| !t.is_completed()) {
        if let Some(failure) = &traversal.failure {
            println!("  {}: {}", traversal.element_id, failure);
        }
    }
    Ok(())
}

/// Fail when any traversal aborted, so the exit status reflects the run
pub fn ensure_completed(report: &RunReport) -> Result<()> {
    if report.state == PipelineState::Aborted {
        anyhow::bail!(
            "pipeline '{}': {} of {} traversals aborted",
            report.pipeline,
            report.aborted(),
            report.traversals.len()
        );
    }
    Ok(())
}
