//! New analyser generator

use anyhow::{Context as _, Result};
use clap::Args;
use mtriage_core::create_analyser;
use std::path::PathBuf;

#[derive(Args)]
pub struct NewCommand {
    /// CamelCase analyser name
    name: String,

    /// One-line description written to info.yaml
    #[arg(long)]
    desc: String,

    /// Directory the analyser is created in
    #[arg(long, default_value = "analysers")]
    root: PathBuf,
}

impl NewCommand {
    pub fn execute(self) -> Result<()> {
        let dir = create_analyser(&self.root, &self.name, &self.desc)
            .with_context(|| format!("Failed to create analyser {}", self.name))?;
        println!("created {}", dir.display());
        println!(
            "bind it with BindingTable::bind(\"{}\", ...) to make it runnable",
            self.name
        );
        Ok(())
    }
}
