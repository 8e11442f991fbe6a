//! Errors raised by the auth plugin.

use mqplug_core::error::{AppError, ErrorKind};
use thiserror::Error;

/// Everything that can go wrong while setting up the credential table.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The configuration blob is not valid JSON for [`AuthConfig`](crate::AuthConfig).
    #[error("invalid auth plugin configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),

    /// A configured user has an empty name.
    #[error("user table contains an empty username")]
    EmptyUsername,
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::new(ErrorKind::Initialization, err.to_string())
    }
}
