//! Plugin manager: lifecycle management and hook fan-out for all plugins.

use std::path::Path;
use std::sync::Arc;

use mqplug_core::config::{HostConfig, TimeoutPolicy};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::api::events::{AuthEvent, DisconnectEvent, PublishEvent, SubscribeEvent};
use crate::error::PluginError;
use crate::hooks::definitions::DecisionOutcome;
use crate::hooks::dispatcher::{DispatchError, NotificationHandle};
use crate::instance::{LifecycleStep, LoadedPlugin, PluginHandle, run_step};
use crate::loader::Loader;
use crate::meta::{HostRequirements, PluginMeta};
use crate::registry::PluginRegistry;
use crate::traits::Plugin;

/// Combined answer of every active plugin to one decision event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the event may proceed.
    pub allow: bool,
    /// Sum of the threat scores written by the consulted plugins.
    pub threat_score: u32,
    /// Plugin that rejected the event, or whose timeout policy did.
    pub rejected_by: Option<String>,
    /// Answers of the plugins consulted, in order.
    pub outcomes: Vec<DecisionOutcome>,
    /// Plugins that gave no answer.
    pub failures: Vec<DispatchError>,
}

/// Manages the full lifecycle of plugins: load, initialize, unload.
#[derive(Debug)]
pub struct PluginManager {
    /// Artifact loader.
    loader: Mutex<Box<dyn Loader>>,
    /// Compatibility requirements plugins are validated against.
    requirements: HostRequirements,
    /// Decision substituted for a hook that gave no answer.
    timeout_policy: TimeoutPolicy,
    /// Plugin registry.
    registry: PluginRegistry,
}

impl PluginManager {
    /// Creates a manager resolving artifacts with `loader`.
    pub fn new(loader: impl Loader + 'static, host: &HostConfig) -> Self {
        Self {
            loader: Mutex::new(Box::new(loader)),
            requirements: HostRequirements::from(host),
            timeout_policy: host.timeout_policy,
            registry: PluginRegistry::new(),
        }
    }

    /// Requirements plugins are validated against.
    pub fn requirements(&self) -> &HostRequirements {
        &self.requirements
    }

    /// Resolves, instantiates, describes and validates an artifact.
    ///
    /// On success the plugin's name is reserved until the instance is
    /// initialized, discarded or unloaded.
    pub async fn load(&self, path: &Path) -> Result<LoadedPlugin, PluginError> {
        let factory = self.loader.lock().await.resolve(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "Plugin artifact could not be resolved");
            e
        })?;

        let plugin: Arc<dyn Plugin> = Arc::from(factory.instantiate());
        let meta = factory.stamp(plugin.describe());

        if let Err(e) = self.requirements.validate(&meta) {
            error!(
                path = %path.display(),
                plugin = %meta.name,
                sdk_version = %meta.sdk_version,
                error = %e,
                "Plugin failed compatibility validation"
            );
            return Err(e);
        }

        self.registry.reserve(&meta.name).await.map_err(|e| {
            error!(plugin = %meta.name, error = %e, "Plugin name already in use");
            e
        })?;

        let timeout = self.requirements.effective_hook_timeout(&meta);
        info!(
            plugin = %meta.name,
            version = %meta.version,
            sdk_version = %meta.sdk_version,
            hook_timeout_ms = timeout.as_millis() as u64,
            "Plugin loaded"
        );

        Ok(LoadedPlugin {
            meta,
            path: path.to_path_buf(),
            timeout,
            lifecycle_timeout: self.requirements.lifecycle_timeout,
            plugin,
        })
    }

    /// Calls `init` and activates the plugin.
    ///
    /// `init` runs on its own task under the lifecycle timeout; a panic or
    /// an overrun fails initialization like an error does. On failure the
    /// instance is discarded without `close` and its name is released.
    pub async fn initialize(
        &self,
        loaded: LoadedPlugin,
        config: &[u8],
    ) -> Result<PluginHandle, PluginError> {
        let plugin = loaded.plugin.clone();
        let config = config.to_vec();
        let outcome = run_step(
            LifecycleStep::Init,
            loaded.lifecycle_timeout,
            async move { plugin.init(&config).await },
        )
        .await;

        if let Err(reason) = outcome {
            error!(plugin = %loaded.meta.name, error = %reason, "Plugin initialization failed");
            self.registry.release(&loaded.meta.name).await;
            return Err(PluginError::InitFailed {
                name: loaded.meta.name.clone(),
                reason,
            });
        }

        let handle = PluginHandle::new(loaded);
        self.registry.activate(handle.clone()).await;
        Ok(handle)
    }

    /// Loads and initializes in one step.
    pub async fn activate(&self, path: &Path, config: &[u8]) -> Result<PluginHandle, PluginError> {
        let loaded = self.load(path).await?;
        self.initialize(loaded, config).await
    }

    /// Drops a loaded instance that will not be initialized.
    pub async fn discard(&self, loaded: LoadedPlugin) {
        self.registry.release(&loaded.meta.name).await;
        info!(plugin = %loaded.meta.name, "Loaded plugin discarded");
    }

    /// Deactivates and closes one plugin.
    pub async fn unload(&self, name: &str) -> Result<(), PluginError> {
        let handle = self
            .registry
            .release(name)
            .await
            .ok_or_else(|| PluginError::NotActive {
                name: name.to_string(),
            })?;
        handle.close().await?;
        info!(plugin = %name, "Plugin unloaded");
        Ok(())
    }

    /// Closes every active plugin. Close errors are logged and skipped.
    pub async fn shutdown(&self) {
        for handle in self.registry.active().await {
            self.registry.release(handle.name()).await;
            if let Err(e) = handle.close().await {
                error!(plugin = %handle.name(), error = %e, "Error closing plugin");
            }
        }
        info!("All plugins closed");
    }

    /// Gets an active plugin by name.
    pub async fn get(&self, name: &str) -> Option<PluginHandle> {
        self.registry.get(name).await
    }

    /// Lists active plugins in activation order.
    pub async fn list(&self) -> Vec<PluginMeta> {
        self.registry.list().await
    }

    /// Asks every active plugin whether a connection may authenticate.
    pub async fn authorize_connect(&self, event: &mut AuthEvent) -> Verdict {
        let mut verdict = Verdict {
            allow: true,
            ..Default::default()
        };

        for handle in self.registry.active().await {
            let mut scored = AuthEvent {
                threat_score: 0,
                ..event.clone()
            };
            let result = handle.dispatcher().dispatch_auth(&mut scored).await;
            if !self.record(&mut verdict, handle.name(), result) {
                break;
            }
        }

        event.threat_score = verdict.threat_score;
        verdict
    }

    /// Asks every active plugin whether a subscription may be created.
    pub async fn authorize_subscribe(&self, event: &mut SubscribeEvent) -> Verdict {
        let mut verdict = Verdict {
            allow: true,
            ..Default::default()
        };

        for handle in self.registry.active().await {
            let mut scored = SubscribeEvent {
                threat_score: 0,
                ..event.clone()
            };
            let result = handle.dispatcher().dispatch_subscribe(&mut scored).await;
            if !self.record(&mut verdict, handle.name(), result) {
                break;
            }
        }

        event.threat_score = verdict.threat_score;
        verdict
    }

    /// Queues a publish notification for every active plugin.
    pub async fn notify_publish(&self, event: &PublishEvent) -> Vec<NotificationHandle> {
        self.registry
            .active()
            .await
            .iter()
            .map(|handle| handle.dispatcher().notify_publish(event.clone()))
            .collect()
    }

    /// Queues a disconnect notification for every active plugin.
    pub async fn notify_disconnect(&self, event: &DisconnectEvent) -> Vec<NotificationHandle> {
        self.registry
            .active()
            .await
            .iter()
            .map(|handle| handle.dispatcher().notify_disconnect(event.clone()))
            .collect()
    }

    /// Folds one plugin's answer into the verdict. Returns whether to go on.
    fn record(
        &self,
        verdict: &mut Verdict,
        plugin: &str,
        result: Result<DecisionOutcome, DispatchError>,
    ) -> bool {
        match result {
            Ok(outcome) => {
                verdict.threat_score = verdict.threat_score.saturating_add(outcome.threat_score);
                let rejected = outcome.is_rejection();
                verdict.outcomes.push(outcome);
                if rejected {
                    verdict.allow = false;
                    verdict.rejected_by = Some(plugin.to_string());
                }
                !rejected
            }
            Err(DispatchError::Closed { .. }) => true,
            Err(e) => {
                let allow = self.timeout_policy.allows();
                warn!(plugin = %plugin, error = %e, allow, "No answer from plugin, applying timeout policy");
                verdict.failures.push(e);
                if !allow {
                    verdict.allow = false;
                    verdict.rejected_by = Some(plugin.to_string());
                }
                allow
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::ffi::abi::PluginDeclaration;
    use crate::loader::StaticLoader;
    use crate::traits::HookDecision;

    static GATE_CLOSES: AtomicUsize = AtomicUsize::new(0);

    /// Denies user "bob" with threat 10, scores everyone else 1.
    #[derive(Debug)]
    struct Gate;

    #[async_trait]
    impl Plugin for Gate {
        fn describe(&self) -> PluginMeta {
            PluginMeta::new("gate", "1.0.0")
        }

        async fn init(&self, _config: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }

        async fn close(&self) -> anyhow::Result<()> {
            GATE_CLOSES.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_auth(&self, event: &mut AuthEvent) -> HookDecision {
            if event.username == "bob" {
                event.threat_score = 10;
                HookDecision::deny()
            } else {
                event.threat_score = 1;
                HookDecision::allow()
            }
        }
    }

    /// Never answers auth in time; fails init on config "fail".
    #[derive(Debug)]
    struct Sleeper;

    #[async_trait]
    impl Plugin for Sleeper {
        fn describe(&self) -> PluginMeta {
            PluginMeta::new("sleeper", "1.0.0").with_hook_timeout(Duration::from_millis(20))
        }

        async fn init(&self, config: &[u8]) -> anyhow::Result<()> {
            if config == b"fail" {
                anyhow::bail!("refusing config");
            }
            Ok(())
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn on_auth(&self, event: &mut AuthEvent) -> HookDecision {
            event.threat_score = 99;
            tokio::time::sleep(Duration::from_secs(5)).await;
            HookDecision::deny()
        }
    }

    /// Claims an SDK version the host does not speak.
    #[derive(Debug)]
    struct Stale;

    #[async_trait]
    impl Plugin for Stale {
        fn describe(&self) -> PluginMeta {
            PluginMeta {
                sdk_version: "0.9.0".into(),
                ..PluginMeta::new("stale", "1.0.0")
            }
        }

        async fn init(&self, _config: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    /// Panics on config "panic", never finishes on config "hang".
    #[derive(Debug)]
    struct Brittle;

    #[async_trait]
    impl Plugin for Brittle {
        fn describe(&self) -> PluginMeta {
            PluginMeta::new("brittle", "1.0.0")
        }

        async fn init(&self, config: &[u8]) -> anyhow::Result<()> {
            match config {
                b"panic" => panic!("secrets file missing"),
                b"hang" => std::future::pending().await,
                _ => Ok(()),
            }
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn loader() -> StaticLoader {
        StaticLoader::new()
            .with_plugin("brittle.so", PluginDeclaration::new(|| Box::new(Brittle)))
            .with_plugin("gate.so", PluginDeclaration::new(|| Box::new(Gate)))
            .with_plugin("gate-copy.so", PluginDeclaration::new(|| Box::new(Gate)))
            .with_plugin("sleeper.so", PluginDeclaration::new(|| Box::new(Sleeper)))
            .with_plugin("stale.so", PluginDeclaration::new(|| Box::new(Stale)))
    }

    fn manager(policy: TimeoutPolicy) -> PluginManager {
        let host = HostConfig {
            timeout_policy: policy,
            ..Default::default()
        };
        PluginManager::new(loader(), &host)
    }

    fn auth(username: &str) -> AuthEvent {
        AuthEvent {
            client_id: "c1".into(),
            username: username.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_second_plugin_with_same_name_is_rejected() {
        let mgr = manager(TimeoutPolicy::Allow);
        let _gate = mgr.activate(Path::new("gate.so"), b"").await.expect("first");

        let err = mgr.load(Path::new("gate-copy.so")).await.expect_err("duplicate");
        assert!(matches!(err, PluginError::DuplicatePlugin { name } if name == "gate"));
        assert_eq!(mgr.list().await.len(), 1);
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn test_contract_mismatch_discards_instance() {
        let mgr = manager(TimeoutPolicy::Allow);
        let err = mgr.load(Path::new("stale.so")).await.expect_err("mismatch");
        assert!(matches!(err, PluginError::ContractVersionMismatch { .. }));
        assert!(mgr.get("stale").await.is_none());
    }

    #[tokio::test]
    async fn test_init_failure_releases_name() {
        let mgr = manager(TimeoutPolicy::Allow);
        let loaded = mgr.load(Path::new("sleeper.so")).await.expect("load");
        assert_eq!(loaded.hook_timeout(), Duration::from_millis(20));

        let err = mgr.initialize(loaded, b"fail").await.expect_err("init");
        assert!(matches!(err, PluginError::InitFailed { .. }));

        // The name is free again.
        let loaded = mgr.load(Path::new("sleeper.so")).await.expect("reload");
        mgr.discard(loaded).await;
    }

    #[tokio::test]
    async fn test_fan_out_stops_at_first_rejection() {
        let mgr = manager(TimeoutPolicy::Allow);
        mgr.activate(Path::new("gate.so"), b"").await.expect("gate");
        mgr.activate(Path::new("sleeper.so"), b"").await.expect("sleeper");

        let mut event = auth("bob");
        let verdict = mgr.authorize_connect(&mut event).await;
        assert!(!verdict.allow);
        assert_eq!(verdict.rejected_by.as_deref(), Some("gate"));
        assert_eq!(verdict.outcomes.len(), 1);
        assert_eq!(event.threat_score, 10);
        mgr.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_policy_decides_silent_plugins() {
        let open = manager(TimeoutPolicy::Allow);
        open.activate(Path::new("gate.so"), b"").await.expect("gate");
        open.activate(Path::new("sleeper.so"), b"").await.expect("sleeper");

        let mut event = auth("alice");
        let verdict = open.authorize_connect(&mut event).await;
        assert!(verdict.allow);
        assert_eq!(verdict.failures.len(), 1);
        assert!(verdict.failures[0].is_timeout());
        // The timed-out plugin's write never reaches the caller.
        assert_eq!(event.threat_score, 1);
        open.shutdown().await;

        let closed = manager(TimeoutPolicy::Deny);
        closed.activate(Path::new("sleeper.so"), b"").await.expect("sleeper");
        let verdict = closed.authorize_connect(&mut auth("alice")).await;
        assert!(!verdict.allow);
        assert_eq!(verdict.rejected_by.as_deref(), Some("sleeper"));
        closed.shutdown().await;
    }

    #[tokio::test]
    async fn test_unload_closes_and_frees_name() {
        let mgr = manager(TimeoutPolicy::Allow);
        let before = GATE_CLOSES.load(Ordering::SeqCst);
        let handle = mgr.activate(Path::new("gate.so"), b"").await.expect("gate");

        mgr.unload("gate").await.expect("unload");
        assert!(handle.is_closed());
        assert!(matches!(
            mgr.unload("gate").await,
            Err(PluginError::NotActive { .. })
        ));

        // Already released, so shutdown leaves it alone.
        mgr.shutdown().await;
        drop(handle);
        assert!(GATE_CLOSES.load(Ordering::SeqCst) > before);
        assert!(mgr.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_init_is_an_init_failure() {
        let mgr = manager(TimeoutPolicy::Allow);
        let err = mgr
            .activate(Path::new("brittle.so"), b"panic")
            .await
            .expect_err("init panicked");
        assert!(
            matches!(&err, PluginError::InitFailed { name, reason }
                if name == "brittle" && reason == "init panicked: secrets file missing")
        );
        assert_eq!(err.kind(), mqplug_core::error::ErrorKind::Initialization);

        // The host survives and the name is free again.
        mgr.activate(Path::new("brittle.so"), b"").await.expect("retry");
        mgr.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_init_is_bounded_by_lifecycle_timeout() {
        let host = HostConfig {
            lifecycle_timeout_ms: 250,
            ..Default::default()
        };
        let mgr = PluginManager::new(loader(), &host);
        let err = mgr
            .activate(Path::new("brittle.so"), b"hang")
            .await
            .expect_err("init overran");
        assert!(
            matches!(&err, PluginError::InitFailed { reason, .. } if reason == "init timed out after 250ms")
        );
        assert!(mgr.get("brittle").await.is_none());
    }
}
