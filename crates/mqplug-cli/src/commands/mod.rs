//! CLI command definitions and dispatch.

pub mod build;
pub mod run;

use clap::{Parser, Subcommand};
use mqplug_core::config::RunnerConfig;
use mqplug_core::error::AppError;

use crate::output::OutputFormat;

/// mqplug: conformance runner and build tool for broker plugins
#[derive(Debug, Parser)]
#[command(name = "mqplug", version, about, long_about = None)]
pub struct Cli {
    /// Path to the runner settings file (optional)
    #[arg(long, default_value = "mqplug.toml")]
    pub settings: String,

    /// Output format for metadata
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load a plugin and exercise its hooks
    Run(run::RunArgs),
    /// Build a plugin and write its metadata sidecar
    Build(build::BuildArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self, config: &RunnerConfig) -> Result<(), AppError> {
        match &self.command {
            Commands::Run(args) => run::execute(args, config, self.format).await,
            Commands::Build(args) => build::execute(args, self.format).await,
        }
    }
}
