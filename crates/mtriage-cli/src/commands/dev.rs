//! Development helpers: sample runs, builds, synthetic tests and cache cleanup

use super::pipeline_helper::{discover, ensure_completed, load_pipeline, print_report};
use anyhow::{Context as _, Result};
use clap::{Args, ValueEnum};
use mtriage_core::{BuildFilter, DiskStore, Orchestrator, RunConfig};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum DevAction {
    /// Run over the first few inputs
    Develop,

    /// Prepare analyser dependencies
    Build,

    /// Run over synthetic inputs without touching the cache
    Test,

    /// Remove cached results
    Clean,
}

#[derive(Args)]
pub struct DevCommand {
    #[arg(value_enum, default_value = "develop")]
    action: DevAction,

    /// Run file describing the pipeline
    #[arg(long)]
    yaml: PathBuf,

    /// Restrict `clean` to one step
    #[arg(long)]
    step: Option<usize>,

    /// Only build these analysers
    #[arg(long, value_delimiter = ',')]
    whitelist: Option<Vec<String>>,

    /// Never build these analysers
    #[arg(long, value_delimiter = ',')]
    blacklist: Vec<String>,
}

impl DevCommand {
    pub async fn execute(self, verbose: bool) -> Result<()> {
        match self.action {
            DevAction::Develop => {
                let pipeline = load_pipeline(&self.yaml)?;
                let inputs = pipeline.inputs()?;
                let report = pipeline
                    .orchestrator(verbose)
                    .develop(&pipeline.spec, inputs)
                    .await?;
                print_report(&report, false)?;
                ensure_completed(&report)
            }
            DevAction::Test => {
                let pipeline = load_pipeline(&self.yaml)?;
                let report = pipeline.orchestrator(verbose).test(&pipeline.spec).await?;
                print_report(&report, false)?;
                ensure_completed(&report)
            }
            DevAction::Build => {
                let config = self.config()?;
                let registry = discover(&config)?;
                let filter = BuildFilter {
                    whitelist: self.whitelist.clone(),
                    blacklist: self.blacklist.clone(),
                };
                let orchestrator = Orchestrator::new(
                    config.context().with_verbose(verbose),
                    Arc::new(DiskStore::new(config.cache_root())),
                );
                let report = orchestrator.build(&registry, &filter).await;
                for name in &report.built {
                    println!("built  {name}");
                }
                for failure in &report.failed {
                    println!("FAILED {}: {}", failure.analyser, failure.reason);
                }
                if !report.is_success() {
                    anyhow::bail!("{} analysers failed to build", report.failed.len());
                }
                Ok(())
            }
            DevAction::Clean => {
                let config = self.config()?;
                let orchestrator = Orchestrator::new(
                    config.context(),
                    Arc::new(DiskStore::new(config.cache_root())),
                );
                let removed = orchestrator.clean(&config.name, self.step)?;
                println!("removed {removed} cached results");
                Ok(())
            }
        }
    }

    fn config(&self) -> Result<RunConfig> {
        RunConfig::load(&self.yaml)
            .with_context(|| format!("Failed to load run file {}", self.yaml.display()))
    }
}
