//! Error type for the audit log plugin.
//!
//! Setup failures abort `init`; write failures inside hooks are logged and
//! never reach the broker.

use std::path::PathBuf;

use mqplug_core::error::{AppError, ErrorKind};
use thiserror::Error;

/// Errors raised while opening, writing or flushing the audit log.
#[derive(Debug, Error)]
pub enum AuditLogError {
    /// The configuration blob is not valid JSON for the plugin.
    #[error("invalid audit log configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),

    /// The log file could not be opened for appending.
    #[error("failed to open audit log {path}: {source}")]
    Open {
        /// The configured log path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// A hook fired before `init` or after `close`.
    #[error("audit log is not open")]
    NotOpen,

    /// IO error while writing or flushing.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<AuditLogError> for AppError {
    fn from(err: AuditLogError) -> Self {
        let kind = match &err {
            AuditLogError::InvalidConfig(_) | AuditLogError::Open { .. } => {
                ErrorKind::Initialization
            }
            AuditLogError::NotOpen => ErrorKind::InvalidState,
            AuditLogError::Io(_) => ErrorKind::Io,
        };
        AppError::new(kind, err.to_string())
    }
}
