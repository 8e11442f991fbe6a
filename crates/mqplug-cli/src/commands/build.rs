//! `mqplug build`: build a plugin and write its sidecar.

use std::path::PathBuf;

use clap::Args;
use mqplug_cli::builder::{self, BuildOptions, MetaSource};
use mqplug_core::error::AppError;

use crate::output::{self, OutputFormat};

/// Arguments for the build command
#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Plugin crate directory
    #[arg(short, long, default_value = ".")]
    pub dir: PathBuf,

    /// Output path for the artifact
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Target triple (host when omitted)
    #[arg(short, long)]
    pub target: Option<String>,

    /// Build with the release profile
    #[arg(long)]
    pub release: bool,

    /// Show cargo's output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Execute the build command
pub async fn execute(args: &BuildArgs, format: OutputFormat) -> Result<(), AppError> {
    let opts = BuildOptions {
        dir: args.dir.clone(),
        output: args.output.clone(),
        target: args.target.clone(),
        release: args.release,
        verbose: args.verbose,
    };
    let report = builder::build(&opts).await?;

    if format == OutputFormat::Json {
        output::print_json(&report.meta);
        return Ok(());
    }

    output::print_success("Build complete");
    output::print_kv("Plugin", &report.artifact.display().to_string());
    output::print_kv("Meta", &report.sidecar.display().to_string());
    output::print_kv("Name", &report.meta.meta.name);
    output::print_kv("Version", &report.meta.meta.version);
    output::print_kv(
        "Target",
        &format!("{}/{}", report.meta.build_os, report.meta.build_arch),
    );
    if report.source == MetaSource::Manifest {
        output::print_warning("Metadata taken from Cargo.toml; the artifact was not loaded");
    }
    Ok(())
}
