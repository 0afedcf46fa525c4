//! mtriage CLI - analyser pipelines over media collections
//!
//! Command-line interface for discovering analysers, running pipelines
//! described by a YAML run file, and exporting cached results.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;

use commands::analysers::AnalysersCommand;
use commands::dev::DevCommand;
use commands::export::ExportCommand;
use commands::run::RunCommand;
use commands::scaffold::NewCommand;

#[derive(Parser)]
#[command(
    name = "mtriage",
    version,
    about = "Run chains of analysers over media collections",
    after_help = "EXAMPLES:\n  \
                  # Run the pipeline described by a run file\n  \
                  mtriage run pipeline.yaml\n  \
                  mtriage pipeline.yaml\n\n  \
                  # Try a pipeline on a few inputs, or on synthetic ones\n  \
                  mtriage dev develop --yaml pipeline.yaml\n  \
                  mtriage dev test --yaml pipeline.yaml\n\n  \
                  # Copy the final step's outputs to a directory\n  \
                  mtriage export --yaml pipeline.yaml -o ./out\n\n  \
                  # Start a new analyser\n  \
                  mtriage new FaceBlur --desc \"blur faces\""
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Run file; shorthand for `mtriage run <YAML>`
    #[arg(value_name = "YAML")]
    yaml: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl Cli {
    /// The command to execute; a bare run file means `run`
    fn into_command(self) -> Result<Commands> {
        match (self.command, self.yaml) {
            (Some(_), Some(yaml)) => anyhow::bail!(
                "unexpected run file {} before a subcommand; pass it to the subcommand instead",
                yaml.display()
            ),
            (Some(command), None) => Ok(command),
            (None, Some(yaml)) => Ok(Commands::Run(RunCommand::new(yaml))),
            (None, None) => anyhow::bail!("no run file given; see `mtriage --help`"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline over every input
    Run(RunCommand),

    /// Develop, build, test or clean a pipeline
    Dev(DevCommand),

    /// Export persisted results of a pipeline
    Export(ExportCommand),

    /// List discoverable analysers
    Analysers(AnalysersCommand),

    /// Create a new analyser directory
    New(NewCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match &cli.command {
        Some(Commands::Analysers(_)) => Level::WARN,
        _ if cli.verbose => Level::DEBUG,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    // RUST_LOG takes precedence over --verbose
    let result = match EnvFilter::try_from_default_env() {
        Ok(filter) => tracing::subscriber::set_global_default(
            builder.with_env_filter(filter).finish(),
        ),
        Err(_) => {
            tracing::subscriber::set_global_default(builder.with_max_level(log_level).finish())
        }
    };
    result.context("Failed to set tracing subscriber")?;

    let verbose = cli.verbose;
    match cli.into_command()? {
        Commands::Run(cmd) => cmd.execute(verbose).await,
        Commands::Dev(cmd) => cmd.execute(verbose).await,
        Commands::Export(cmd) => cmd.execute(),
        Commands::Analysers(cmd) => cmd.execute(),
        Commands::New(cmd) => cmd.execute(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_bare_yaml_is_a_run() {
        let cli = Cli::try_parse_from(["mtriage", "pipeline.yaml"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.yaml, Some(PathBuf::from("pipeline.yaml")));
    }

    #[test]
    fn test_verbose_anywhere() {
        for args in [
            vec!["mtriage", "-v", "run", "p.yaml"],
            vec!["mtriage", "run", "p.yaml", "-v"],
            vec!["mtriage", "-v", "p.yaml"],
            vec!["mtriage", "--verbose", "dev", "test", "--yaml", "p.yaml"],
        ] {
            let cli = Cli::try_parse_from(args.clone()).unwrap_or_else(|e| panic!("{args:?}: {e}"));
            assert!(cli.verbose, "{args:?}");
        }

        let cli = Cli::try_parse_from(["mtriage", "-v", "run", "p.yaml"]).unwrap();
        assert!(matches!(cli.into_command(), Ok(Commands::Run(_))));
    }

    #[test]
    fn test_bare_yaml_becomes_run_command() {
        let cli = Cli::try_parse_from(["mtriage", "pipeline.yaml"]).unwrap();
        assert!(matches!(cli.into_command(), Ok(Commands::Run(_))));

        let cli = Cli::try_parse_from(["mtriage"]).unwrap();
        assert!(cli.into_command().is_err());

        let both = Cli {
            command: Some(Commands::Run(RunCommand::new(PathBuf::from("a.yaml")))),
            yaml: Some(PathBuf::from("b.yaml")),
            verbose: false,
        };
        assert!(both.into_command().is_err());
    }

    #[test]
    fn test_dev_defaults_to_develop() {
        let cli = Cli::try_parse_from(["mtriage", "dev", "--yaml", "p.yaml"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Dev(_))));

        let cli = Cli::try_parse_from(["mtriage", "dev", "clean", "--yaml", "p.yaml", "--step", "1"]);
        assert!(cli.is_ok());
        assert!(Cli::try_parse_from(["mtriage", "dev", "deploy", "--yaml", "p.yaml"]).is_err());
    }

    #[test]
    fn test_export_and_new() {
        let cli = Cli::try_parse_from(["mtriage", "export", "--yaml", "p.yaml", "-o", "out"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Export(_))));

        let cli = Cli::try_parse_from(["mtriage", "new", "FaceBlur", "--desc", "blur"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::New(_))));
        assert!(Cli::try_parse_from(["mtriage", "new", "FaceBlur"]).is_err());
    }
}
