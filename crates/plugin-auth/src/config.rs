//! Credential table configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Users known to the plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Username → password.
    #[serde(default)]
    pub users: HashMap<String, String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            users: default_users(),
        }
    }
}

impl AuthConfig {
    /// Parse the blob handed to `init`.
    ///
    /// An empty blob, or one with no users, selects the built-in table.
    pub fn from_blob(blob: &[u8]) -> Result<Self, AuthError> {
        if blob.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        let parsed: AuthConfig = serde_json::from_slice(blob)?;
        if parsed.users.is_empty() {
            return Ok(Self::default());
        }
        if parsed.users.keys().any(String::is_empty) {
            return Err(AuthError::EmptyUsername);
        }
        Ok(parsed)
    }
}

fn default_users() -> HashMap<String, String> {
    HashMap::from([
        ("admin".to_string(), "secret".to_string()),
        ("guest".to_string(), "guest123".to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_blob_uses_builtin_users() {
        let config = AuthConfig::from_blob(b"").expect("parse");
        assert_eq!(config.users.get("admin").map(String::as_str), Some("secret"));
        assert_eq!(config.users.len(), 2);
    }

    #[test]
    fn test_users_replace_builtin_table() {
        let config = AuthConfig::from_blob(br#"{"users":{"alice":"wonderland"}}"#).expect("parse");
        assert_eq!(config.users.len(), 1);
        assert!(!config.users.contains_key("admin"));
    }

    #[test]
    fn test_malformed_blob_is_rejected() {
        assert!(matches!(
            AuthConfig::from_blob(b"{users:"),
            Err(AuthError::InvalidConfig(_))
        ));
        assert!(matches!(
            AuthConfig::from_blob(br#"{"users":{"":"x"}}"#),
            Err(AuthError::EmptyUsername)
        ));
    }
}
