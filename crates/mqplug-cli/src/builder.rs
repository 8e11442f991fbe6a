//! Plugin build tool.
//!
//! Runs `cargo build` for a plugin crate, copies the produced `cdylib` to
//! its destination and writes the build sidecar next to it.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::Utc;
use mqplug_core::error::{AppError, ErrorKind};
use mqplug_plugin::{BuildMeta, DynamicLoader, Loader, PluginMeta};
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Environment variable carrying the build timestamp into the plugin crate.
pub const BUILD_TIME_ENV: &str = "MQPLUG_BUILD_TIME";

/// Shared-library extensions cargo produces for a `cdylib`.
const DYLIB_EXTENSIONS: [&str; 3] = ["so", "dylib", "dll"];

/// Errors from building a plugin.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The plugin directory does not exist.
    #[error("plugin directory does not exist: {0}")]
    MissingDir(PathBuf),

    /// The plugin directory has no manifest.
    #[error("no Cargo.toml in {0}")]
    MissingManifest(PathBuf),

    /// The manifest could not be read as a package manifest.
    #[error("invalid manifest {path}: {reason}")]
    InvalidManifest {
        /// Manifest path.
        path: PathBuf,
        /// Parser diagnostic.
        reason: String,
    },

    /// cargo could not be started.
    #[error("failed to run cargo: {0}")]
    Spawn(#[source] std::io::Error),

    /// cargo exited unsuccessfully.
    #[error("cargo build failed with exit code {code}")]
    CargoFailed {
        /// Exit code, `-1` when killed by a signal.
        code: i32,
        /// Tail of cargo's diagnostics.
        stderr: String,
    },

    /// The build succeeded but produced no shared library.
    #[error("cargo produced no cdylib for {0}; is `crate-type = [\"cdylib\"]` set?")]
    NoArtifact(PathBuf),

    /// IO error while copying the artifact.
    #[error("IO error during build: {0}")]
    Io(#[from] std::io::Error),

    /// The sidecar could not be written.
    #[error("failed to write build sidecar: {0}")]
    Sidecar(#[from] AppError),
}

impl From<BuildError> for AppError {
    fn from(err: BuildError) -> Self {
        let kind = match &err {
            BuildError::MissingDir(_) | BuildError::MissingManifest(_) => ErrorKind::Configuration,
            BuildError::InvalidManifest { .. } => ErrorKind::Serialization,
            BuildError::Spawn(_) | BuildError::Io(_) | BuildError::Sidecar(_) => ErrorKind::Io,
            BuildError::CargoFailed { .. } | BuildError::NoArtifact(_) => ErrorKind::Internal,
        };
        let message = match &err {
            BuildError::CargoFailed { stderr, .. } if !stderr.is_empty() => {
                format!("{err}\n{stderr}")
            }
            _ => err.to_string(),
        };
        AppError::with_source(kind, message, err)
    }
}

/// What to build and where to put it.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Plugin crate directory.
    pub dir: PathBuf,
    /// Destination of the artifact; defaults to the plugin directory.
    pub output: Option<PathBuf>,
    /// Target triple; the host when unset.
    pub target: Option<String>,
    /// Build with the release profile.
    pub release: bool,
    /// Pass cargo's diagnostics through.
    pub verbose: bool,
}

/// Where the sidecar metadata came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaSource {
    /// The fresh artifact was loaded and described itself.
    Described,
    /// Name and version were read from `Cargo.toml`.
    Manifest,
}

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// Final artifact path.
    pub artifact: PathBuf,
    /// Sidecar path.
    pub sidecar: PathBuf,
    /// Sidecar contents.
    pub meta: BuildMeta,
    /// Where the metadata came from.
    pub source: MetaSource,
}

/// Builds the plugin crate described by `opts`.
pub async fn build(opts: &BuildOptions) -> Result<BuildReport, BuildError> {
    if !opts.dir.is_dir() {
        return Err(BuildError::MissingDir(opts.dir.clone()));
    }
    let dir = opts.dir.canonicalize()?;
    let manifest = dir.join("Cargo.toml");
    if !manifest.is_file() {
        return Err(BuildError::MissingManifest(dir));
    }

    let build_time = Utc::now().to_rfc3339();
    info!(dir = %dir.display(), target = ?opts.target, release = opts.release, "Building plugin");

    let produced = run_cargo(&dir, &manifest, opts, &build_time).await?;
    let artifact = match &opts.output {
        Some(output) => output.clone(),
        None => match produced.file_name() {
            Some(name) => dir.join(name),
            None => return Err(BuildError::NoArtifact(dir)),
        },
    };
    if let Some(parent) = artifact.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(&produced, &artifact).await?;
    info!(from = %produced.display(), to = %artifact.display(), "Artifact copied");

    let (meta, source) = match opts.target.as_deref() {
        None => match describe_artifact(&artifact) {
            Ok(meta) => (meta, MetaSource::Described),
            Err(reason) => {
                warn!(artifact = %artifact.display(), reason = %reason, "Could not describe artifact, using manifest");
                (manifest_meta(&manifest, &build_time)?, MetaSource::Manifest)
            }
        },
        Some(_) => (manifest_meta(&manifest, &build_time)?, MetaSource::Manifest),
    };

    let (build_os, build_arch) = match opts.target.as_deref() {
        Some(triple) => target_os_arch(triple),
        None => (
            std::env::consts::OS.to_string(),
            std::env::consts::ARCH.to_string(),
        ),
    };
    let meta = BuildMeta {
        meta,
        build_host: hostname(),
        build_os,
        build_arch,
    };
    let sidecar = meta.write_for(&artifact)?;
    info!(sidecar = %sidecar.display(), plugin = %meta.meta.name, "Build sidecar written");

    Ok(BuildReport {
        artifact,
        sidecar,
        meta,
        source,
    })
}

async fn run_cargo(
    dir: &Path,
    manifest: &Path,
    opts: &BuildOptions,
    build_time: &str,
) -> Result<PathBuf, BuildError> {
    let mut cmd = Command::new(std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string()));
    cmd.args(["build", "--lib", "--message-format=json-render-diagnostics"])
        .current_dir(dir)
        .env(BUILD_TIME_ENV, build_time)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(if opts.verbose {
            Stdio::inherit()
        } else {
            Stdio::piped()
        })
        .kill_on_drop(true);
    if opts.release {
        cmd.arg("--release");
    }
    if let Some(target) = &opts.target {
        cmd.args(["--target", target]);
    }
    debug!(command = ?cmd.as_std(), "Running cargo");

    let output = cmd.output().await.map_err(BuildError::Spawn)?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BuildError::CargoFailed {
            code: output.status.code().unwrap_or(-1),
            stderr: tail(&stderr, 40),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    find_cdylib(&stdout, manifest).ok_or_else(|| BuildError::NoArtifact(dir.to_path_buf()))
}

#[derive(Debug, Deserialize)]
struct CargoMessage {
    reason: String,
    #[serde(default)]
    manifest_path: Option<PathBuf>,
    #[serde(default)]
    target: Option<CargoTarget>,
    #[serde(default)]
    filenames: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct CargoTarget {
    #[serde(default)]
    crate_types: Vec<String>,
}

/// Picks the shared library out of cargo's JSON messages, preferring the
/// package whose manifest is `manifest`.
fn find_cdylib(messages: &str, manifest: &Path) -> Option<PathBuf> {
    let mut fallback = None;
    for line in messages.lines().filter(|l| l.starts_with('{')) {
        let Ok(msg) = serde_json::from_str::<CargoMessage>(line) else {
            continue;
        };
        if msg.reason != "compiler-artifact" {
            continue;
        }
        let is_cdylib = msg
            .target
            .as_ref()
            .is_some_and(|t| t.crate_types.iter().any(|c| c == "cdylib"));
        if !is_cdylib {
            continue;
        }
        let Some(file) = msg.filenames.into_iter().find(|f| is_dylib(f)) else {
            continue;
        };
        if msg.manifest_path.as_deref() == Some(manifest) {
            return Some(file);
        }
        fallback = Some(file);
    }
    fallback
}

fn is_dylib(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| DYLIB_EXTENSIONS.contains(&ext))
}

/// Loads the fresh artifact and asks it to describe itself. The build time
/// comes from the declaration, which `export_plugin!` stamped during the
/// build.
fn describe_artifact(artifact: &Path) -> Result<PluginMeta, String> {
    let factory = DynamicLoader::new()
        .resolve(artifact)
        .map_err(|e| e.to_string())?;
    Ok(factory.stamp(factory.instantiate().describe()))
}

#[derive(Debug, Deserialize)]
struct Manifest {
    package: Option<ManifestPackage>,
    workspace: Option<ManifestWorkspace>,
}

#[derive(Debug, Deserialize)]
struct ManifestPackage {
    name: String,
    #[serde(default)]
    version: Option<toml::Value>,
}

#[derive(Debug, Deserialize)]
struct ManifestWorkspace {
    package: Option<WorkspacePackage>,
}

#[derive(Debug, Deserialize)]
struct WorkspacePackage {
    version: Option<String>,
}

fn read_manifest(path: &Path) -> Result<Manifest, BuildError> {
    let raw = std::fs::read_to_string(path)?;
    toml::from_str(&raw).map_err(|e| BuildError::InvalidManifest {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Metadata from the manifest, for artifacts the host cannot load.
fn manifest_meta(manifest: &Path, build_time: &str) -> Result<PluginMeta, BuildError> {
    let package = read_manifest(manifest)?
        .package
        .ok_or_else(|| BuildError::InvalidManifest {
            path: manifest.to_path_buf(),
            reason: "missing [package] table".to_string(),
        })?;

    let version = match package.version {
        Some(toml::Value::String(version)) => version,
        // `version.workspace = true`
        Some(_) => workspace_version(manifest).unwrap_or_else(|| "0.0.0".to_string()),
        None => "0.0.0".to_string(),
    };
    Ok(PluginMeta::new(package.name, version).with_build_time(build_time))
}

/// Version inherited from the nearest enclosing workspace manifest.
fn workspace_version(manifest: &Path) -> Option<String> {
    manifest
        .parent()?
        .ancestors()
        .skip(1)
        .map(|dir| dir.join("Cargo.toml"))
        .filter(|path| path.is_file())
        .find_map(|path| read_manifest(&path).ok()?.workspace?.package?.version)
}

/// `(os, arch)` for a target triple, named like `std::env::consts`.
fn target_os_arch(triple: &str) -> (String, String) {
    let arch = triple.split('-').next().unwrap_or(triple).to_string();
    let os = if triple.contains("darwin") {
        "macos"
    } else if triple.contains("windows") {
        "windows"
    } else if triple.contains("android") {
        "android"
    } else if triple.contains("linux") {
        "linux"
    } else if triple.contains("freebsd") {
        "freebsd"
    } else {
        triple.split('-').nth(2).unwrap_or("unknown")
    };
    (os.to_string(), arch)
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
