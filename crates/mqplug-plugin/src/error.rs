//! Error taxonomy for the plugin contract.
//!
//! Contract and loader failures abort a single load attempt, initialization
//! failures discard the instance. Hook-level failures never appear here: they
//! travel inside [`HookDecision`](crate::traits::HookDecision) or as a
//! [`DispatchError`](crate::hooks::dispatcher::DispatchError).

use std::path::PathBuf;

use mqplug_core::error::{AppError, ErrorKind};
use thiserror::Error;

use crate::lifecycle::SessionState;

/// Every way activating a plugin can fail.
#[derive(Debug, Error)]
pub enum PluginError {
    // --- Contract errors ---
    /// `describe()` returned an empty name.
    #[error("plugin name is empty")]
    InvalidName,

    /// `describe()` returned an empty SDK version.
    #[error("plugin '{name}' does not declare an sdk version")]
    MissingContractVersion {
        /// Name the plugin described itself with.
        name: String,
    },

    /// The plugin was built against a different contract version.
    #[error("plugin '{name}' targets sdk version '{found}', host requires '{expected}'")]
    ContractVersionMismatch {
        /// Name the plugin described itself with.
        name: String,
        /// Version the host requires.
        expected: String,
        /// Version the plugin reported.
        found: String,
    },

    /// A plugin with the same name is already loaded in this host session.
    #[error("plugin '{name}' is already loaded")]
    DuplicatePlugin {
        /// The conflicting name.
        name: String,
    },

    // --- Loader errors ---
    /// The artifact does not exist.
    #[error("plugin artifact not found: {path}")]
    ArtifactNotFound {
        /// The requested artifact path.
        path: PathBuf,
    },

    /// The artifact exists but could not be opened as a module.
    #[error("failed to open plugin artifact {path}: {reason}")]
    ArtifactUnreadable {
        /// The artifact path.
        path: PathBuf,
        /// Loader diagnostic.
        reason: String,
    },

    /// The artifact does not export the factory entry point.
    #[error("plugin artifact {path} does not export '{symbol}'")]
    FactoryNotFound {
        /// The artifact path.
        path: PathBuf,
        /// The missing symbol.
        symbol: String,
    },

    /// The factory export exists but was built for another ABI.
    #[error("plugin artifact {path} exports an incompatible factory: {reason}")]
    FactoryTypeMismatch {
        /// The artifact path.
        path: PathBuf,
        /// What did not match.
        reason: String,
    },

    // --- Initialization errors ---
    /// `init` returned an error.
    #[error("plugin '{name}' initialization failed: {reason}")]
    InitFailed {
        /// The plugin name.
        name: String,
        /// Error reported by the plugin.
        reason: String,
    },

    // --- Teardown errors ---
    /// `close` returned an error.
    #[error("plugin '{name}' failed to close: {reason}")]
    CloseFailed {
        /// The plugin name.
        name: String,
        /// Error reported by the plugin.
        reason: String,
    },

    // --- Session errors ---
    /// An operation was attempted in a lifecycle state that does not allow it.
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        /// The attempted operation.
        operation: &'static str,
        /// The state the session was in.
        state: SessionState,
    },

    /// No active plugin has the given name.
    #[error("plugin '{name}' is not active")]
    NotActive {
        /// The requested name.
        name: String,
    },
}

impl PluginError {
    /// The error category used by operators and the CLI exit path.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidName
            | Self::MissingContractVersion { .. }
            | Self::ContractVersionMismatch { .. }
            | Self::DuplicatePlugin { .. } => ErrorKind::Contract,
            Self::ArtifactNotFound { .. }
            | Self::ArtifactUnreadable { .. }
            | Self::FactoryNotFound { .. }
            | Self::FactoryTypeMismatch { .. } => ErrorKind::Loader,
            Self::InitFailed { .. } => ErrorKind::Initialization,
            Self::CloseFailed { .. } => ErrorKind::Teardown,
            Self::InvalidState { .. } | Self::NotActive { .. } => ErrorKind::InvalidState,
        }
    }
}

impl From<PluginError> for AppError {
    fn from(err: PluginError) -> Self {
        AppError::new(err.kind(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(PluginError::InvalidName.kind(), ErrorKind::Contract);
        assert_eq!(
            PluginError::FactoryNotFound {
                path: PathBuf::from("a.so"),
                symbol: "x".into()
            }
            .kind(),
            ErrorKind::Loader
        );
        assert_eq!(
            PluginError::InitFailed {
                name: "p".into(),
                reason: "bad".into()
            }
            .kind(),
            ErrorKind::Initialization
        );
    }

    #[test]
    fn test_into_app_error_keeps_message() {
        let err: AppError = PluginError::DuplicatePlugin {
            name: "auth_plugin".into(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::Contract);
        assert!(err.message.contains("auth_plugin"));
    }
}
