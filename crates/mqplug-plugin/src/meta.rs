//! Plugin identity, compatibility validation, and the build sidecar.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mqplug_core::config::HostConfig;
use mqplug_core::config::host::{
    CONTRACT_VERSION, DEFAULT_HOOK_TIMEOUT, DEFAULT_LIFECYCLE_TIMEOUT, MAX_HOOK_TIMEOUT,
};
use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// Contract version compiled into this SDK.
pub const SDK_VERSION: &str = CONTRACT_VERSION;

/// Suffix appended to an artifact path to locate its build sidecar.
pub const SIDECAR_SUFFIX: &str = ".meta.json";

/// Identity and compatibility record returned by [`Plugin::describe`](crate::Plugin::describe).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMeta {
    /// Unique plugin name.
    pub name: String,
    /// Free-form plugin version.
    pub version: String,
    /// Contract version the plugin was built against.
    pub sdk_version: String,
    /// Toolchain the plugin was built with (informational).
    #[serde(default)]
    pub runtime_version: String,
    /// Build timestamp, RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_time: Option<String>,
    /// Requested hook timeout; zero means the host default.
    #[serde(
        default,
        rename = "hook_timeout_ms",
        with = "duration_ms",
        skip_serializing_if = "Duration::is_zero"
    )]
    pub hook_timeout: Duration,
}

impl PluginMeta {
    /// Metadata for the SDK this plugin is compiled against.
    ///
    /// Fills in the SDK and runtime versions. The build time is left unset;
    /// the host copies it from the artifact's declaration.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            sdk_version: SDK_VERSION.to_string(),
            runtime_version: runtime_version(),
            build_time: None,
            hook_timeout: Duration::ZERO,
        }
    }

    /// Request a non-default hook timeout.
    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout = timeout;
        self
    }

    /// Override the build timestamp.
    pub fn with_build_time(mut self, build_time: impl Into<String>) -> Self {
        self.build_time = Some(build_time.into());
        self
    }
}

/// Toolchain identifier recorded in [`PluginMeta::runtime_version`].
pub fn runtime_version() -> String {
    format!(
        "mqplug-plugin/{} ({}-{})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::ARCH,
        std::env::consts::OS
    )
}

/// What a host demands of every plugin before activating it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRequirements {
    /// Contract version plugins must report exactly.
    pub contract_version: String,
    /// Timeout applied when a plugin requests none.
    pub default_hook_timeout: Duration,
    /// Ceiling for plugin-requested timeouts.
    pub max_hook_timeout: Duration,
    /// Bound on `init` and on `close`.
    pub lifecycle_timeout: Duration,
}

impl Default for HostRequirements {
    fn default() -> Self {
        Self {
            contract_version: SDK_VERSION.to_string(),
            default_hook_timeout: DEFAULT_HOOK_TIMEOUT,
            max_hook_timeout: MAX_HOOK_TIMEOUT,
            lifecycle_timeout: DEFAULT_LIFECYCLE_TIMEOUT,
        }
    }
}

impl From<&HostConfig> for HostRequirements {
    fn from(config: &HostConfig) -> Self {
        Self {
            contract_version: config.contract_version.clone(),
            default_hook_timeout: config.default_hook_timeout(),
            max_hook_timeout: config.max_hook_timeout(),
            lifecycle_timeout: config.lifecycle_timeout(),
        }
    }
}

impl HostRequirements {
    /// Check a freshly described plugin against the host contract.
    ///
    /// The contract version is compared as an exact string: hook signatures
    /// may change incompatibly between any two versions.
    pub fn validate(&self, meta: &PluginMeta) -> Result<(), PluginError> {
        if meta.name.is_empty() {
            return Err(PluginError::InvalidName);
        }
        if meta.sdk_version.is_empty() {
            return Err(PluginError::MissingContractVersion {
                name: meta.name.clone(),
            });
        }
        if meta.sdk_version != self.contract_version {
            return Err(PluginError::ContractVersionMismatch {
                name: meta.name.clone(),
                expected: self.contract_version.clone(),
                found: meta.sdk_version.clone(),
            });
        }
        Ok(())
    }

    /// The timeout the dispatcher enforces for this plugin's hooks.
    ///
    /// Zero selects the default; anything above the ceiling is clamped.
    pub fn effective_hook_timeout(&self, meta: &PluginMeta) -> Duration {
        if meta.hook_timeout.is_zero() {
            self.default_hook_timeout
        } else {
            meta.hook_timeout.min(self.max_hook_timeout)
        }
    }
}

/// Sidecar written next to an artifact by `mqplug build`.
///
/// Advisory only: loading never requires it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildMeta {
    /// Plugin metadata as known at build time.
    #[serde(flatten)]
    pub meta: PluginMeta,
    /// Host that produced the artifact.
    pub build_host: String,
    /// Target operating system.
    pub build_os: String,
    /// Target architecture.
    pub build_arch: String,
}

impl BuildMeta {
    /// Path of the sidecar belonging to `artifact`.
    pub fn sidecar_path(artifact: &Path) -> PathBuf {
        let mut path = artifact.as_os_str().to_owned();
        path.push(SIDECAR_SUFFIX);
        PathBuf::from(path)
    }

    /// Read the sidecar for `artifact`, if one exists.
    pub fn read_for(artifact: &Path) -> Result<Option<Self>, mqplug_core::AppError> {
        let path = Self::sidecar_path(artifact);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    /// Write the sidecar for `artifact` as pretty JSON.
    pub fn write_for(&self, artifact: &Path) -> Result<PathBuf, mqplug_core::AppError> {
        let path = Self::sidecar_path(artifact);
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(&path, data)?;
        Ok(path)
    }

    /// Fields where the sidecar disagrees with what the plugin described.
    pub fn mismatches(&self, described: &PluginMeta) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.meta.name != described.name {
            fields.push("name");
        }
        if self.meta.version != described.version {
            fields.push("version");
        }
        if self.meta.sdk_version != described.sdk_version {
            fields.push("sdk_version");
        }
        fields
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        // Negative values mean "use the default", the same as zero.
        let millis = i64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis.max(0) as u64))
    }
}
