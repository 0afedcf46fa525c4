//! Full pipeline run

use super::pipeline_helper::{ensure_completed, load_pipeline, print_report};
use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct RunCommand {
    /// Run file describing the pipeline
    #[arg(value_name = "YAML")]
    yaml: PathBuf,

    /// Print final outputs as JSON instead of a summary
    #[arg(long)]
    json: bool,
}

impl RunCommand {
    pub fn new(yaml: PathBuf) -> Self {
        Self { yaml, json: false }
    }

    pub async fn execute(self, verbose: bool) -> Result<()> {
        let pipeline = load_pipeline(&self.yaml)?;
        let inputs = pipeline.inputs()?;

        let report = pipeline
            .orchestrator(verbose)
            .run(&pipeline.spec, inputs)
            .await
            .with_context(|| format!("Pipeline '{}' failed", pipeline.spec.name))?;

        print_report(&report, self.json)?;
        ensure_completed(&report)
    }
}
