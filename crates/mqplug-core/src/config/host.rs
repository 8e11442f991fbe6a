//! Plugin host configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// The plugin contract version implemented by this host.
///
/// Plugins must report exactly this string as their SDK version.
pub const CONTRACT_VERSION: &str = "1.0.0";

/// Hook timeout used when a plugin does not request one.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_millis(100);

/// Upper bound for any plugin-requested hook timeout.
pub const MAX_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on a plugin's `init` and on its `close`.
pub const DEFAULT_LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(30);

/// What the host does with a decision hook that timed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Fail open: treat the event as allowed.
    #[default]
    Allow,
    /// Fail closed: treat the event as rejected.
    Deny,
}

impl TimeoutPolicy {
    /// The decision this policy substitutes for a timed-out hook.
    pub fn allows(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Host compatibility requirements and dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Contract version plugins must match exactly.
    #[serde(default = "default_contract_version")]
    pub contract_version: String,
    /// Hook timeout in milliseconds applied when a plugin requests none.
    #[serde(default = "default_hook_timeout_ms")]
    pub default_hook_timeout_ms: u64,
    /// Ceiling in milliseconds for plugin-requested hook timeouts.
    #[serde(default = "default_max_hook_timeout_ms")]
    pub max_hook_timeout_ms: u64,
    /// Outcome substituted for a timed-out decision hook.
    #[serde(default)]
    pub timeout_policy: TimeoutPolicy,
    /// Milliseconds a plugin's `init` or `close` may run.
    #[serde(default = "default_lifecycle_timeout_ms")]
    pub lifecycle_timeout_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            contract_version: default_contract_version(),
            default_hook_timeout_ms: default_hook_timeout_ms(),
            max_hook_timeout_ms: default_max_hook_timeout_ms(),
            timeout_policy: TimeoutPolicy::default(),
            lifecycle_timeout_ms: default_lifecycle_timeout_ms(),
        }
    }
}

impl HostConfig {
    /// Default hook timeout as a [`Duration`].
    pub fn default_hook_timeout(&self) -> Duration {
        Duration::from_millis(self.default_hook_timeout_ms)
    }

    /// Maximum hook timeout as a [`Duration`].
    pub fn max_hook_timeout(&self) -> Duration {
        Duration::from_millis(self.max_hook_timeout_ms)
    }

    /// Lifecycle timeout as a [`Duration`].
    pub fn lifecycle_timeout(&self) -> Duration {
        Duration::from_millis(self.lifecycle_timeout_ms)
    }

    /// Reject settings the dispatcher cannot honour.
    pub fn check(&self) -> Result<(), AppError> {
        if self.contract_version.trim().is_empty() {
            return Err(AppError::configuration(
                "host.contract_version must not be empty",
            ));
        }
        if self.default_hook_timeout_ms == 0 {
            return Err(AppError::configuration(
                "host.default_hook_timeout_ms must be greater than zero",
            ));
        }
        if self.default_hook_timeout_ms > self.max_hook_timeout_ms {
            return Err(AppError::configuration(format!(
                "host.default_hook_timeout_ms ({}) exceeds host.max_hook_timeout_ms ({})",
                self.default_hook_timeout_ms, self.max_hook_timeout_ms
            )));
        }
        if self.lifecycle_timeout_ms == 0 {
            return Err(AppError::configuration(
                "host.lifecycle_timeout_ms must be greater than zero",
            ));
        }
        Ok(())
    }
}

fn default_contract_version() -> String {
    CONTRACT_VERSION.to_string()
}

fn default_hook_timeout_ms() -> u64 {
    DEFAULT_HOOK_TIMEOUT.as_millis() as u64
}

fn default_max_hook_timeout_ms() -> u64 {
    MAX_HOOK_TIMEOUT.as_millis() as u64
}

fn default_lifecycle_timeout_ms() -> u64 {
    DEFAULT_LIFECYCLE_TIMEOUT.as_millis() as u64
}
