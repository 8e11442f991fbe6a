//! Hook dispatcher: invokes one plugin's hooks under its timeout.
//!
//! Every hook runs on the lane of the client it concerns, behind that
//! client's earlier hooks, and on its own task bounded by the plugin's
//! effective timeout. On timeout the invocation is aborted and its result
//! discarded.
//!
//! Decision hooks (`auth`, `subscribe`):
//! - Awaited by the caller until the lane reaches them and they answer.
//! - A timeout or panic surfaces as a [`DispatchError`], never as a rejection.
//! - An application error is logged; the plugin's `allow` value stands.
//!
//! Notification hooks (`publish`, `disconnect`):
//! - Queued and never block the caller.
//! - Overruns and panics are logged.
//!
//! Once [`HookDispatcher::shut`] returns, no hook is running and none will
//! start.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{OwnedRwLockReadGuard, RwLock, oneshot};
use tracing::{debug, error, warn};

use crate::api::events::{AuthEvent, DisconnectEvent, PublishEvent, SubscribeEvent};
use crate::traits::{HookDecision, Plugin};

use super::definitions::{DecisionOutcome, HookPoint};
use super::lanes::ClientLanes;

/// Why a hook produced no answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The hook did not return within the plugin's timeout.
    #[error("plugin '{plugin}' {hook} hook timed out after {}ms", timeout.as_millis())]
    TimedOut {
        /// Plugin name.
        plugin: String,
        /// Hook that overran.
        hook: HookPoint,
        /// The enforced timeout.
        timeout: Duration,
    },
    /// The hook panicked.
    #[error("plugin '{plugin}' {hook} hook panicked")]
    Panicked {
        /// Plugin name.
        plugin: String,
        /// Hook that panicked.
        hook: HookPoint,
    },
    /// The plugin is closing or closed.
    #[error("plugin '{plugin}' is closed")]
    Closed {
        /// Plugin name.
        plugin: String,
    },
}

impl DispatchError {
    /// Whether this is a timeout rather than a crash or a closed plugin.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Final state of a notification hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationStatus {
    /// The hook returned within its timeout.
    Delivered {
        /// Wall time spent in the hook.
        elapsed: Duration,
    },
    /// The hook did not complete and was aborted.
    Failed(DispatchError),
}

/// Completion handle for a queued notification.
///
/// Brokers drop it; the conformance runner awaits it to keep scripted cases
/// strictly sequential.
#[derive(Debug)]
pub struct NotificationHandle {
    plugin: String,
    rx: oneshot::Receiver<NotificationStatus>,
}

impl NotificationHandle {
    fn ready(plugin: &str, status: NotificationStatus) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(status);
        Self {
            plugin: plugin.to_string(),
            rx,
        }
    }

    /// Waits until the notification has been delivered or abandoned.
    pub async fn wait(self) -> NotificationStatus {
        let plugin = self.plugin;
        self.rx
            .await
            .unwrap_or(NotificationStatus::Failed(DispatchError::Closed { plugin }))
    }
}

/// Dispatches hooks to a single plugin instance.
#[derive(Debug)]
pub struct HookDispatcher {
    /// The plugin instance shared by all invocations.
    plugin: Arc<dyn Plugin>,
    /// Plugin name used in logs and errors.
    name: String,
    /// Effective hook timeout.
    timeout: Duration,
    /// Read-held by every running hook; `true` once shut.
    gate: Arc<RwLock<bool>>,
    /// Per-client hook lanes.
    lanes: ClientLanes,
}

impl HookDispatcher {
    /// Creates a dispatcher enforcing `timeout` on every hook of `plugin`.
    pub fn new(plugin: Arc<dyn Plugin>, name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            plugin,
            name: name.into(),
            timeout,
            gate: Arc::new(RwLock::new(false)),
            lanes: ClientLanes::new(),
        }
    }

    /// Plugin name.
    pub fn plugin_name(&self) -> &str {
        &self.name
    }

    /// Effective hook timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Clients with queued or running hooks.
    pub fn open_lanes(&self) -> usize {
        self.lanes.len()
    }

    /// Dispatches `on_auth`. On success the plugin's writes to `event`
    /// (the threat score) are copied back.
    pub async fn dispatch_auth(
        &self,
        event: &mut AuthEvent,
    ) -> Result<DecisionOutcome, DispatchError> {
        let plugin = self.plugin.clone();
        let mut owned = event.clone();
        let client_id = event.client_id.clone();
        let (decision, owned, elapsed) = self
            .run_decision(HookPoint::Auth, &client_id, async move {
                let decision = plugin.on_auth(&mut owned).await;
                (decision, owned)
            })
            .await
            .map(|((decision, owned), elapsed)| (decision, owned, elapsed))?;

        *event = owned;
        Ok(self.outcome(HookPoint::Auth, decision, event.threat_score, elapsed))
    }

    /// Dispatches `on_subscribe`, copying the plugin's writes back to `event`.
    pub async fn dispatch_subscribe(
        &self,
        event: &mut SubscribeEvent,
    ) -> Result<DecisionOutcome, DispatchError> {
        let plugin = self.plugin.clone();
        let mut owned = event.clone();
        let client_id = event.client_id.clone();
        let (decision, owned, elapsed) = self
            .run_decision(HookPoint::Subscribe, &client_id, async move {
                let decision = plugin.on_subscribe(&mut owned).await;
                (decision, owned)
            })
            .await
            .map(|((decision, owned), elapsed)| (decision, owned, elapsed))?;

        *event = owned;
        Ok(self.outcome(
            HookPoint::Subscribe,
            decision,
            event.threat_score,
            elapsed,
        ))
    }

    /// Queues `on_publish` behind the client's earlier notifications.
    pub fn notify_publish(&self, event: PublishEvent) -> NotificationHandle {
        let client_id = event.client_id.clone();
        let plugin = self.plugin.clone();
        self.run_notification(HookPoint::Publish, &client_id, async move {
            plugin.on_publish(&event).await;
        })
    }

    /// Queues `on_disconnect`. A reconnect of the same client waits for it.
    pub fn notify_disconnect(&self, event: DisconnectEvent) -> NotificationHandle {
        let client_id = event.client_id.clone();
        let plugin = self.plugin.clone();
        self.run_notification(HookPoint::Disconnect, &client_id, async move {
            plugin.on_disconnect(&event).await;
        })
    }

    /// Waits for running hooks to finish and refuses new ones.
    pub async fn shut(&self) {
        let mut closed = self.gate.write().await;
        *closed = true;
        self.lanes.retire_all();
        debug!(plugin = %self.name, "Hook dispatcher shut");
    }

    /// Whether [`shut`](Self::shut) has completed.
    pub fn is_shut(&self) -> bool {
        self.gate.try_read().map(|closed| *closed).unwrap_or(true)
    }

    fn outcome(
        &self,
        hook: HookPoint,
        decision: HookDecision,
        threat_score: u32,
        elapsed: Duration,
    ) -> DecisionOutcome {
        let error = decision.error.map(|e| format!("{e:#}"));
        if let Some(err) = &error {
            warn!(
                plugin = %self.name,
                hook = %hook,
                allow = decision.allow,
                error = %err,
                "Hook reported an application error"
            );
        }
        debug!(
            plugin = %self.name,
            hook = %hook,
            allow = decision.allow,
            threat_score,
            elapsed_us = elapsed.as_micros() as u64,
            "Decision hook returned"
        );
        DecisionOutcome {
            hook,
            plugin: self.name.clone(),
            allow: decision.allow,
            error,
            threat_score,
            elapsed,
        }
    }

    fn enter(&self) -> Result<OwnedRwLockReadGuard<bool>, DispatchError> {
        match self.gate.clone().try_read_owned() {
            Ok(guard) if !*guard => Ok(guard),
            _ => Err(DispatchError::Closed {
                plugin: self.name.clone(),
            }),
        }
    }

    async fn run_decision<T, F>(
        &self,
        hook: HookPoint,
        client_id: &str,
        call: F,
    ) -> Result<(T, Duration), DispatchError>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let guard = self.enter()?;
        let (tx, rx) = oneshot::channel();
        let name = self.name.clone();
        let timeout = self.timeout;

        self.lanes.submit(
            client_id,
            Box::pin(async move {
                let _ = tx.send(run_bounded(&name, hook, timeout, guard, call).await);
            }),
        );

        rx.await.unwrap_or_else(|_| {
            Err(DispatchError::Closed {
                plugin: self.name.clone(),
            })
        })
    }

    fn run_notification<F>(&self, hook: HookPoint, client_id: &str, call: F) -> NotificationHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = match self.enter() {
            Ok(guard) => guard,
            Err(err) => {
                debug!(plugin = %self.name, hook = %hook, "Notification dropped, plugin closed");
                return NotificationHandle::ready(&self.name, NotificationStatus::Failed(err));
            }
        };

        let (tx, rx) = oneshot::channel();
        let name = self.name.clone();
        let timeout = self.timeout;

        self.lanes.submit(
            client_id,
            Box::pin(async move {
                let status = match run_bounded(&name, hook, timeout, guard, call).await {
                    Ok(((), elapsed)) => NotificationStatus::Delivered { elapsed },
                    Err(err) => NotificationStatus::Failed(err),
                };
                let _ = tx.send(status);
            }),
        );

        NotificationHandle {
            plugin: self.name.clone(),
            rx,
        }
    }
}

/// Runs one hook on its own task, holding `guard` until it ends.
async fn run_bounded<T, F>(
    name: &str,
    hook: HookPoint,
    timeout: Duration,
    guard: OwnedRwLockReadGuard<bool>,
    call: F,
) -> Result<(T, Duration), DispatchError>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    let started = Instant::now();
    let mut task = tokio::spawn(async move {
        let _guard = guard;
        call.await
    });

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(value)) => Ok((value, started.elapsed())),
        Ok(Err(join_err)) => {
            error!(plugin = %name, hook = %hook, error = %join_err, "Hook panicked");
            Err(DispatchError::Panicked {
                plugin: name.to_string(),
                hook,
            })
        }
        Err(_) => {
            task.abort();
            warn!(
                plugin = %name,
                hook = %hook,
                timeout_ms = timeout.as_millis() as u64,
                "Hook timed out, invocation aborted"
            );
            Err(DispatchError::TimedOut {
                plugin: name.to_string(),
                hook,
                timeout,
            })
        }
    }
}
