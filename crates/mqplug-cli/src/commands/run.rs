//! `mqplug run`: conformance runner.

use std::path::{Path, PathBuf};

use clap::Args;
use mqplug_cli::runner::{self, RunnerSession};
use mqplug_core::config::RunnerConfig;
use mqplug_core::error::{AppError, ErrorKind};
use mqplug_plugin::{DynamicLoader, PluginHandle};
use tokio::io::BufReader;

use crate::output::{self, OutputFormat};

/// Arguments for the run command
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Plugin artifact (.so, .dylib or .dll)
    #[arg(short, long)]
    pub plugin: PathBuf,

    /// File whose bytes are passed to the plugin's init
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// JSON test script; interactive mode when omitted
    #[arg(short, long)]
    pub script: Option<PathBuf>,
}

/// Execute the run command. The session is closed on every path.
pub async fn execute(
    args: &RunArgs,
    config: &RunnerConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let mut session = RunnerSession::new(DynamicLoader::new(), &config.host);
    let result = drive(&mut session, args, format).await;

    if let Err(e) = session.close().await {
        output::print_warning(&format!("Plugin close failed: {}", e));
    }
    result
}

async fn drive(
    session: &mut RunnerSession,
    args: &RunArgs,
    format: OutputFormat,
) -> Result<(), AppError> {
    let blob = read_blob(args.config.as_deref()).await;
    let handle = session.open(&args.plugin, &blob).await?;
    print_plugin(session, &handle, format);
    output::print_success("Plugin initialized");
    println!();

    let mut stdout = std::io::stdout();
    match &args.script {
        Some(path) => {
            let cases = runner::script::load_script(path)?;
            let summary = runner::run_script(session, &cases, &mut stdout).await?;
            if !summary.is_success() {
                return Err(AppError::new(
                    ErrorKind::Hook,
                    format!("{} of {} scripted cases failed", summary.failed, cases.len()),
                ));
            }
            Ok(())
        }
        None => {
            let stdin = BufReader::new(tokio::io::stdin());
            runner::run_interactive(session, stdin, &mut stdout).await
        }
    }
}

/// Reads the init blob. An unreadable file is reported and replaced by an
/// empty blob.
async fn read_blob(path: Option<&Path>) -> Vec<u8> {
    let Some(path) = path else {
        return Vec::new();
    };
    match tokio::fs::read(path).await {
        Ok(blob) => blob,
        Err(e) => {
            output::print_warning(&format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ));
            Vec::new()
        }
    }
}

fn print_plugin(session: &RunnerSession, handle: &PluginHandle, format: OutputFormat) {
    let meta = handle.meta();
    if format == OutputFormat::Json {
        output::print_json(meta);
        if let Some(sidecar) = session.sidecar() {
            output::print_json(sidecar);
        }
        return;
    }

    output::print_success("Plugin loaded");
    output::print_kv("Name", &meta.name);
    output::print_kv("Version", &meta.version);
    output::print_kv("SDK Version", &meta.sdk_version);
    output::print_kv("Runtime", &meta.runtime_version);
    output::print_kv("Build Time", meta.build_time.as_deref().unwrap_or("unknown"));
    output::print_kv(
        "Hook Timeout",
        &format!("{}ms", handle.dispatcher().timeout().as_millis()),
    );

    if let Some(sidecar) = session.sidecar() {
        output::print_kv(
            "Built On",
            &format!(
                "{} ({}/{})",
                sidecar.build_host, sidecar.build_os, sidecar.build_arch
            ),
        );
        let fields = sidecar.mismatches(meta);
        if !fields.is_empty() {
            output::print_warning(&format!(
                "Build sidecar disagrees with the plugin on: {}",
                fields.join(", ")
            ));
        }
    }
}
