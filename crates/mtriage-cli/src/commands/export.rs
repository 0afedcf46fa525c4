//! Export of cached pipeline outputs

use super::pipeline_helper::load_pipeline;
use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct ExportCommand {
    /// Run file describing the pipeline
    #[arg(long)]
    yaml: PathBuf,

    /// Directory to write the exported files to
    #[arg(short, long)]
    output: PathBuf,

    /// Step to export (defaults to the deepest step reached)
    #[arg(long)]
    step: Option<usize>,
}

impl ExportCommand {
    pub fn execute(self) -> Result<()> {
        let pipeline = load_pipeline(&self.yaml)?;
        let inputs = pipeline.inputs()?;

        let report = pipeline
            .orchestrator(false)
            .export(&pipeline.spec, &inputs, self.step, &self.output)
            .with_context(|| format!("Failed to export pipeline '{}'", pipeline.spec.name))?;

        println!(
            "exported {} elements ({} files) to {}",
            report.entries.len(),
            report.file_count(),
            report.out_dir.display()
        );
        Ok(())
    }
}
