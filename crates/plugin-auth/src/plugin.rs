//! Auth plugin implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use mqplug_plugin::prelude::*;

use crate::config::AuthConfig;

/// Plugin name reported by `describe()`.
pub const PLUGIN_NAME: &str = "auth_plugin";

/// Threat score for a username not in the table.
pub const UNKNOWN_USER_THREAT: u32 = 30;

/// Threat score for a known user with the wrong password.
pub const WRONG_PASSWORD_THREAT: u32 = 50;

/// Only this user may subscribe to `$SYS` topics.
const ADMIN_USER: &str = "admin";

/// Credential-table authentication plugin.
#[derive(Debug, Default)]
pub struct AuthPlugin {
    /// Username → password, filled by `init`.
    users: RwLock<HashMap<String, String>>,
}

impl AuthPlugin {
    /// Creates an uninitialized plugin with an empty user table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users currently known.
    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl Plugin for AuthPlugin {
    fn describe(&self) -> PluginMeta {
        PluginMeta::new(PLUGIN_NAME, env!("CARGO_PKG_VERSION"))
    }

    async fn init(&self, config: &[u8]) -> anyhow::Result<()> {
        let config = AuthConfig::from_blob(config)?;
        let mut users = self.users.write().await;
        *users = config.users;
        info!(plugin = PLUGIN_NAME, users = users.len(), "Auth plugin initialized");
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.users.write().await.clear();
        info!(plugin = PLUGIN_NAME, "Auth plugin closed");
        Ok(())
    }

    async fn on_auth(&self, event: &mut AuthEvent) -> HookDecision {
        let users = self.users.read().await;

        let Some(expected) = users.get(&event.username) else {
            warn!(username = %event.username, client_id = %event.client_id, "Unknown user");
            event.threat_score = UNKNOWN_USER_THREAT;
            return HookDecision::deny();
        };

        if event.password.as_ref() != expected.as_bytes() {
            warn!(username = %event.username, client_id = %event.client_id, ip = %event.ip, "Wrong password");
            event.threat_score = WRONG_PASSWORD_THREAT;
            return HookDecision::deny();
        }

        info!(
            username = %event.username,
            client_id = %event.client_id,
            ip = %event.ip,
            "Auth success"
        );
        HookDecision::allow()
    }

    async fn on_subscribe(&self, event: &mut SubscribeEvent) -> HookDecision {
        if event.topic.starts_with("$SYS") && event.username != ADMIN_USER {
            warn!(username = %event.username, topic = %event.topic, "Denied $SYS subscription for non-admin");
            return HookDecision::deny();
        }
        HookDecision::allow()
    }

    async fn on_publish(&self, event: &PublishEvent) {
        debug!(
            username = %event.username,
            topic = %event.topic,
            qos = event.qos,
            size = event.payload.len(),
            "Publish"
        );
    }

    async fn on_disconnect(&self, event: &DisconnectEvent) {
        debug!(
            username = %event.username,
            client_id = %event.client_id,
            reason = %event.reason,
            "Disconnect"
        );
    }
}
