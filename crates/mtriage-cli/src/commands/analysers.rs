//! Analyser listing command

use anyhow::{Context as _, Result};
use clap::Args;
use mtriage_core::{BindingTable, Registry};
use std::path::PathBuf;

#[derive(Args)]
pub struct AnalysersCommand {
    /// Directories to scan
    #[arg(long = "root", default_value = "analysers")]
    roots: Vec<PathBuf>,
}

impl AnalysersCommand {
    pub fn execute(self) -> Result<()> {
        let discovery = Registry::discover(&self.roots, &BindingTable::builtin())
            .context("Failed to discover analysers")?;

        println!("Available analysers:");
        for analyser in discovery.registry.iter() {
            println!("\n{}", analyser.name);
            println!("  Description: {}", analyser.desc);
            println!("  Etypes: {} -> {}", analyser.in_etype, analyser.out_etype);
            println!("  Version: {}", analyser.version);
            for arg in analyser.schema.specs() {
                let default = arg
                    .default
                    .as_ref()
                    .map(|d| format!(" (default {d})"))
                    .unwrap_or_default();
                let required = if arg.required { ", required" } else { "" };
                println!("  --{} <{}{}>{}: {}", arg.name, arg.input, required, default, arg.desc);
            }
        }

        for failure in &discovery.failures {
            println!("\nskipped: {failure}");
        }
        for collision in &discovery.collisions {
            println!(
                "\nignored: {} at {} (already defined)",
                collision.name,
                collision.ignored.display()
            );
        }
        Ok(())
    }
}
