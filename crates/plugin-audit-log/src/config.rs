//! Configuration for the audit log plugin.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::AuditLogError;

/// File name used when no `log_path` is configured.
pub const DEFAULT_LOG_FILE: &str = "mqplug_audit.log";

/// Where audit lines are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditLogConfig {
    /// Log file, created if missing and appended to otherwise.
    pub log_path: PathBuf,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
        }
    }
}

impl AuditLogConfig {
    /// Parse the blob handed to `init`. An empty blob selects the defaults.
    pub fn from_blob(blob: &[u8]) -> Result<Self, AuditLogError> {
        if blob.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        let mut config: AuditLogConfig = serde_json::from_slice(blob)?;
        if config.log_path.as_os_str().is_empty() {
            config.log_path = default_log_path();
        }
        Ok(config)
    }
}

fn default_log_path() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_LOG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_temp_dir() {
        let config = AuditLogConfig::from_blob(b"  ").expect("parse");
        assert_eq!(config.log_path, std::env::temp_dir().join(DEFAULT_LOG_FILE));

        let config = AuditLogConfig::from_blob(br#"{"log_path":""}"#).expect("parse");
        assert_eq!(config.log_path, std::env::temp_dir().join(DEFAULT_LOG_FILE));
    }

    #[test]
    fn test_explicit_path() {
        let config = AuditLogConfig::from_blob(br#"{"log_path":"/tmp/a.log"}"#).expect("parse");
        assert_eq!(config.log_path, PathBuf::from("/tmp/a.log"));
    }

    #[test]
    fn test_malformed_blob() {
        assert!(AuditLogConfig::from_blob(br#"{"log_path": 7}"#).is_err());
    }
}
