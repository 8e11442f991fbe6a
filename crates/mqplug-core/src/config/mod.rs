//! Runner and host configuration schemas.
//!
//! Configuration is deserialized from an optional TOML file via the `config`
//! crate, overlaid with environment variables prefixed with `MQPLUG__`.

pub mod host;
pub mod logging;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use self::host::{HostConfig, TimeoutPolicy};
pub use self::logging::LoggingConfig;

use crate::error::AppError;

/// Root configuration for the plugin host and the conformance runner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Host compatibility and dispatch settings.
    #[serde(default)]
    pub host: HostConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RunnerConfig {
    /// Load configuration from a TOML file and the environment.
    ///
    /// The file is optional; a missing file yields the defaults. Environment
    /// variables such as `MQPLUG__HOST__TIMEOUT_POLICY=deny` override it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        if path.exists() {
            debug!(path = %path.display(), "Loading configuration file");
        } else {
            debug!(path = %path.display(), "No configuration file, using defaults and environment");
        }

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("MQPLUG")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let loaded: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        if let Err(e) = loaded.host.check() {
            warn!(path = %path.display(), error = %e, "Rejected host configuration");
            return Err(e);
        }
        debug!(
            contract_version = %loaded.host.contract_version,
            default_hook_timeout_ms = loaded.host.default_hook_timeout_ms,
            max_hook_timeout_ms = loaded.host.max_hook_timeout_ms,
            lifecycle_timeout_ms = loaded.host.lifecycle_timeout_ms,
            timeout_policy = ?loaded.host.timeout_policy,
            "Configuration loaded"
        );
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = RunnerConfig::load(dir.path().join("absent.toml")).expect("load");
        assert_eq!(config.host.default_hook_timeout_ms, 100);
        assert_eq!(config.host.max_hook_timeout_ms, 30_000);
        assert_eq!(config.host.lifecycle_timeout_ms, 30_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mqplug.toml");
        std::fs::write(
            &path,
            "[host]\ncontract_version = \"9.9.9\"\ntimeout_policy = \"deny\"\n\n[logging]\nformat = \"json\"\n",
        )
        .expect("write");

        let config = RunnerConfig::load(&path).expect("load");
        assert_eq!(config.host.contract_version, "9.9.9");
        assert_eq!(config.host.timeout_policy, TimeoutPolicy::Deny);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.host.default_hook_timeout_ms, 100);
    }

    #[test]
    fn test_inverted_timeouts_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mqplug.toml");
        std::fs::write(
            &path,
            "[host]\ndefault_hook_timeout_ms = 5000\nmax_hook_timeout_ms = 1000\n",
        )
        .expect("write");

        let err = RunnerConfig::load(&path).expect_err("must fail");
        assert_eq!(err.kind, crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_zero_lifecycle_timeout_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mqplug.toml");
        std::fs::write(&path, "[host]\nlifecycle_timeout_ms = 0\n").expect("write");

        let err = RunnerConfig::load(&path).expect_err("must fail");
        assert_eq!(err.kind, crate::error::ErrorKind::Configuration);
        assert!(err.to_string().contains("lifecycle_timeout_ms"));
    }
}
