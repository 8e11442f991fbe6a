//! The capability contract every plugin implements.

use async_trait::async_trait;

use crate::api::events::{AuthEvent, DisconnectEvent, PublishEvent, SubscribeEvent};
use crate::meta::PluginMeta;

/// Answer of a decision hook.
///
/// `allow` is authoritative. An attached `error` is logged by the host but
/// never turns an allow into a rejection: "the plugin had trouble" and "the
/// plugin says no" are separate signals.
#[derive(Debug)]
pub struct HookDecision {
    /// Whether the event may proceed.
    pub allow: bool,
    /// Application error observed while deciding.
    pub error: Option<anyhow::Error>,
}

impl HookDecision {
    /// Let the event proceed.
    pub fn allow() -> Self {
        Self {
            allow: true,
            error: None,
        }
    }

    /// Deliberately reject the event.
    pub fn deny() -> Self {
        Self {
            allow: false,
            error: None,
        }
    }

    /// Attach an application error without changing the decision.
    pub fn with_error(mut self, error: impl Into<anyhow::Error>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Trait that all broker plugins must implement.
///
/// One instance is shared by every concurrent hook invocation, so hooks take
/// `&self` and implementations synchronize their own state. `init` completes
/// before any event hook fires and no event hook fires once `close` begins.
///
/// Only `describe`, `init` and `close` are required. The decision hooks
/// default to allow, the notification hooks to no-op.
#[async_trait]
pub trait Plugin: Send + Sync + std::fmt::Debug {
    /// Returns identity and compatibility metadata.
    fn describe(&self) -> PluginMeta;

    /// Called once with the opaque configuration blob (possibly empty).
    ///
    /// On error the instance is discarded without `close`, so anything
    /// acquired here must be released before returning the error.
    async fn init(&self, config: &[u8]) -> anyhow::Result<()>;

    /// Called once at teardown. Errors are logged and never block shutdown.
    async fn close(&self) -> anyhow::Result<()>;

    /// Decides whether a connection may authenticate.
    async fn on_auth(&self, event: &mut AuthEvent) -> HookDecision {
        let _ = event;
        HookDecision::allow()
    }

    /// Decides whether a subscription may be created.
    async fn on_subscribe(&self, event: &mut SubscribeEvent) -> HookDecision {
        let _ = event;
        HookDecision::allow()
    }

    /// Observes a message after routing is final.
    async fn on_publish(&self, event: &PublishEvent) {
        let _ = event;
    }

    /// Observes a client disconnect.
    async fn on_disconnect(&self, event: &DisconnectEvent) {
        let _ = event;
    }
}
