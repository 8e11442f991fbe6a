//! One plugin session as the conformance runner drives it.

use std::path::Path;

use mqplug_core::config::HostConfig;
use mqplug_core::error::ErrorKind;
use mqplug_plugin::lifecycle::Transition;
use mqplug_plugin::{
    BuildMeta, Lifecycle, Loader, PluginError, PluginHandle, PluginManager, PluginMeta,
    SessionState,
};
use tracing::{info, warn};

use super::call::{HookCall, Observation};

/// A single plugin taken through `load → validate → init → dispatch → close`.
#[derive(Debug)]
pub struct RunnerSession {
    manager: PluginManager,
    lifecycle: Lifecycle,
    handle: Option<PluginHandle>,
    meta: Option<PluginMeta>,
    sidecar: Option<BuildMeta>,
    timeout_allows: bool,
}

impl RunnerSession {
    /// A fresh, unloaded session resolving artifacts with `loader`.
    pub fn new(loader: impl Loader + 'static, host: &HostConfig) -> Self {
        Self {
            manager: PluginManager::new(loader, host),
            lifecycle: Lifecycle::new(),
            handle: None,
            meta: None,
            sidecar: None,
            timeout_allows: host.timeout_policy.allows(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    /// Transitions recorded so far.
    pub fn history(&self) -> &[Transition] {
        self.lifecycle.history()
    }

    /// Metadata the plugin described itself with, once loaded.
    pub fn meta(&self) -> Option<&PluginMeta> {
        self.meta.as_ref()
    }

    /// Build sidecar found next to the artifact, if any.
    pub fn sidecar(&self) -> Option<&BuildMeta> {
        self.sidecar.as_ref()
    }

    /// Host-side manager owning the plugin.
    pub fn manager(&self) -> &PluginManager {
        &self.manager
    }

    /// Loads, validates and initializes the artifact at `path`.
    ///
    /// A failure to resolve the artifact leaves the session `Unloaded`; any
    /// later failure closes it.
    pub async fn open(&mut self, path: &Path, config: &[u8]) -> Result<PluginHandle, PluginError> {
        if self.state() != SessionState::Unloaded {
            return Err(PluginError::InvalidState {
                operation: "load",
                state: self.state(),
            });
        }

        let loaded = match self.manager.load(path).await {
            Ok(loaded) => loaded,
            Err(e) => {
                if e.kind() != ErrorKind::Loader {
                    // The artifact resolved; it was the plugin that was rejected.
                    self.lifecycle.advance(SessionState::Loaded)?;
                }
                self.lifecycle.fail(&e);
                return Err(e);
            }
        };
        self.lifecycle.advance(SessionState::Loaded)?;
        self.lifecycle.advance(SessionState::Validated)?;
        self.meta = Some(loaded.meta().clone());

        match BuildMeta::read_for(path) {
            Ok(sidecar) => self.sidecar = sidecar,
            Err(e) => warn!(path = %path.display(), error = %e, "Ignoring unreadable build sidecar"),
        }

        let handle = match self.manager.initialize(loaded, config).await {
            Ok(handle) => handle,
            Err(e) => {
                self.lifecycle.fail(&e);
                return Err(e);
            }
        };
        self.lifecycle.advance(SessionState::Initialized)?;
        self.lifecycle.advance(SessionState::Active)?;

        info!(
            plugin = %handle.name(),
            hook_timeout_ms = handle.dispatcher().timeout().as_millis() as u64,
            "Plugin session active"
        );
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Dispatches one hook and reports what came back.
    ///
    /// Notifications are awaited so calls observe strictly sequential
    /// delivery.
    pub async fn invoke(&self, call: HookCall) -> Result<Observation, PluginError> {
        let handle = match (&self.handle, self.lifecycle.is_active()) {
            (Some(handle), true) => handle,
            _ => {
                return Err(PluginError::InvalidState {
                    operation: "dispatch hooks",
                    state: self.state(),
                });
            }
        };
        let dispatcher = handle.dispatcher();
        let hook = call.hook();

        let observation = match call {
            HookCall::Auth(mut event) => Observation::from_decision(
                hook,
                dispatcher.dispatch_auth(&mut event).await,
                self.timeout_allows,
            ),
            HookCall::Subscribe(mut event) => Observation::from_decision(
                hook,
                dispatcher.dispatch_subscribe(&mut event).await,
                self.timeout_allows,
            ),
            HookCall::Publish(event) => {
                Observation::from_notification(hook, dispatcher.notify_publish(event).wait().await)
            }
            HookCall::Disconnect(event) => Observation::from_notification(
                hook,
                dispatcher.notify_disconnect(event).wait().await,
            ),
        };
        Ok(observation)
    }

    /// Closes the plugin, if one was initialized, and ends the session.
    ///
    /// Idempotent. A session that never resolved an artifact stays
    /// `Unloaded`. Teardown errors are returned after the session is
    /// closed.
    pub async fn close(&mut self) -> Result<(), PluginError> {
        let result = match self.handle.take() {
            Some(handle) => self.manager.unload(handle.name()).await,
            None => Ok(()),
        };
        if self.state() != SessionState::Unloaded {
            self.lifecycle.close();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use async_trait::async_trait;
    use mqplug_plugin::ffi::abi::PluginDeclaration;
    use mqplug_plugin::prelude::*;
    use mqplug_plugin::StaticLoader;

    use super::*;

    #[derive(Debug, Default)]
    struct Sleepy;

    #[async_trait]
    impl Plugin for Sleepy {
        fn describe(&self) -> PluginMeta {
            PluginMeta::new("sleepy", "0.1.0").with_hook_timeout(Duration::from_millis(50))
        }

        async fn init(&self, config: &[u8]) -> anyhow::Result<()> {
            anyhow::ensure!(config != b"fail", "refused config");
            Ok(())
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn on_subscribe(&self, _event: &mut SubscribeEvent) -> HookDecision {
            tokio::time::sleep(Duration::from_secs(5)).await;
            HookDecision::allow()
        }
    }

    fn sleepy() -> Box<dyn Plugin> {
        Box::new(Sleepy)
    }

    fn session() -> RunnerSession {
        let loader = StaticLoader::new()
            .with_plugin("sleepy.so", PluginDeclaration::new(sleepy))
            .with_empty_artifact("empty.so");
        RunnerSession::new(loader, &HostConfig::default())
    }

    fn states(session: &RunnerSession) -> Vec<SessionState> {
        session.history().iter().map(|t| t.to).collect()
    }

    #[tokio::test]
    async fn test_missing_factory_stays_unloaded() {
        let mut session = session();
        let err = session
            .open(&PathBuf::from("empty.so"), b"")
            .await
            .expect_err("open");
        assert!(matches!(err, PluginError::FactoryNotFound { .. }));
        session.close().await.expect("close");
        assert_eq!(session.state(), SessionState::Unloaded);
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_init_failure_closes_without_dispatch() {
        let mut session = session();
        let err = session
            .open(&PathBuf::from("sleepy.so"), b"fail")
            .await
            .expect_err("open");
        assert!(matches!(err, PluginError::InitFailed { .. }));
        assert_eq!(
            states(&session),
            vec![
                SessionState::Loaded,
                SessionState::Validated,
                SessionState::Closed
            ]
        );
        assert!(
            session
                .invoke(HookCall::Disconnect(DisconnectEvent::default()))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_timeout_is_observed_and_session_survives() {
        let mut session = session();
        session
            .open(&PathBuf::from("sleepy.so"), b"")
            .await
            .expect("open");
        assert_eq!(session.state(), SessionState::Active);

        let obs = session
            .invoke(HookCall::Subscribe(SubscribeEvent::default()))
            .await
            .expect("invoke");
        assert!(obs.timed_out);
        assert!(obs.allow, "default policy allows on timeout");

        let obs = session
            .invoke(HookCall::Publish(PublishEvent::default()))
            .await
            .expect("invoke");
        assert!(obs.allow);
        assert!(obs.error.is_none());

        session.close().await.expect("close");
        session.close().await.expect("close again");
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.manager().list().await.is_empty());
    }

    #[tokio::test]
    async fn test_open_twice_is_rejected() {
        let mut session = session();
        session
            .open(&PathBuf::from("sleepy.so"), b"")
            .await
            .expect("open");
        let err = session
            .open(&PathBuf::from("sleepy.so"), b"")
            .await
            .expect_err("second open");
        assert!(matches!(err, PluginError::InvalidState { .. }));
        assert_eq!(session.meta().map(|m| m.name.as_str()), Some("sleepy"));
        assert!(session.sidecar().is_none());
        session.close().await.expect("close");
    }
}
