//! Plugin instances as the host holds them.
//!
//! A [`LoadedPlugin`] has been created and validated but not initialized.
//! A [`PluginHandle`] is an initialized plugin with its dispatcher; it is
//! cheap to clone and closes the instance exactly once.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinError;
use tracing::{info, warn};

use crate::error::PluginError;
use crate::hooks::dispatcher::HookDispatcher;
use crate::meta::PluginMeta;
use crate::traits::Plugin;

/// A validated instance awaiting `init`.
#[derive(Debug)]
pub struct LoadedPlugin {
    pub(crate) meta: PluginMeta,
    pub(crate) path: PathBuf,
    pub(crate) timeout: Duration,
    pub(crate) lifecycle_timeout: Duration,
    pub(crate) plugin: Arc<dyn Plugin>,
}

impl LoadedPlugin {
    /// Metadata returned by `describe()`.
    pub fn meta(&self) -> &PluginMeta {
        &self.meta
    }

    /// Artifact the instance was created from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Effective hook timeout.
    pub fn hook_timeout(&self) -> Duration {
        self.timeout
    }
}

#[derive(Debug)]
struct HandleInner {
    meta: PluginMeta,
    path: PathBuf,
    dispatcher: HookDispatcher,
    plugin: Arc<dyn Plugin>,
    lifecycle_timeout: Duration,
    closed: AtomicBool,
}

/// An initialized plugin ready for dispatch.
#[derive(Debug, Clone)]
pub struct PluginHandle {
    inner: Arc<HandleInner>,
}

impl PluginHandle {
    pub(crate) fn new(loaded: LoadedPlugin) -> Self {
        let dispatcher =
            HookDispatcher::new(loaded.plugin.clone(), loaded.meta.name.clone(), loaded.timeout);
        Self {
            inner: Arc::new(HandleInner {
                meta: loaded.meta,
                path: loaded.path,
                dispatcher,
                plugin: loaded.plugin,
                lifecycle_timeout: loaded.lifecycle_timeout,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Plugin name.
    pub fn name(&self) -> &str {
        &self.inner.meta.name
    }

    /// Metadata returned by `describe()`.
    pub fn meta(&self) -> &PluginMeta {
        &self.inner.meta
    }

    /// Artifact the instance was created from.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Hook dispatcher bound to this instance.
    pub fn dispatcher(&self) -> &HookDispatcher {
        &self.inner.dispatcher
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stop dispatch and call the plugin's `close`.
    ///
    /// Only the first call reaches the plugin; later calls return `Ok`.
    /// Running hooks finish (or time out) before `close` starts.
    pub async fn close(&self) -> Result<(), PluginError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.dispatcher.shut().await;

        let plugin = self.inner.plugin.clone();
        let outcome = run_step(
            LifecycleStep::Close,
            self.inner.lifecycle_timeout,
            async move { plugin.close().await },
        )
        .await;

        match outcome {
            Ok(()) => {
                info!(plugin = %self.name(), "Plugin closed");
                Ok(())
            }
            Err(reason) => {
                warn!(plugin = %self.name(), error = %reason, "Plugin close returned error");
                Err(PluginError::CloseFailed {
                    name: self.name().to_string(),
                    reason,
                })
            }
        }
    }
}

/// A plugin entry point outside hook dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleStep {
    Init,
    Close,
}

impl LifecycleStep {
    fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Close => "close",
        }
    }
}

/// Runs `init` or `close` on its own task, bounded by `timeout`.
///
/// The error is the reason reported to the caller: the plugin's own error,
/// a panic, or an overrun. On overrun the task is aborted.
pub(crate) async fn run_step<F>(
    step: LifecycleStep,
    timeout: Duration,
    call: F,
) -> Result<(), String>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut task = tokio::spawn(call);
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(format!("{e:#}")),
        Ok(Err(join_err)) => Err(format!("{} {}", step.as_str(), join_failure(join_err))),
        Err(_) => {
            task.abort();
            Err(format!(
                "{} timed out after {}ms",
                step.as_str(),
                timeout.as_millis()
            ))
        }
    }
}

fn join_failure(err: JoinError) -> String {
    if !err.is_panic() {
        return "was cancelled".to_string();
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());
    match message {
        Some(message) => format!("panicked: {message}"),
        None => "panicked".to_string(),
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let name = self.meta.name.clone();
        let plugin = self.plugin.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(plugin = %name, "Plugin handle dropped without close, closing in background");
                runtime.spawn(async move {
                    if let Err(e) = plugin.close().await {
                        warn!(plugin = %name, error = %format!("{e:#}"), "Plugin close returned error");
                    }
                });
            }
            Err(_) => {
                warn!(plugin = %name, "Plugin handle dropped outside a runtime, close skipped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;

    #[derive(Debug, Default)]
    struct Counting {
        closes: Arc<AtomicUsize>,
        fail_close: bool,
        hang_close: bool,
    }

    #[async_trait]
    impl Plugin for Counting {
        fn describe(&self) -> PluginMeta {
            PluginMeta::new("counting", "0.1.0")
        }

        async fn init(&self, _config: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }

        async fn close(&self) -> anyhow::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                anyhow::bail!("flush failed");
            }
            if self.hang_close {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    fn handle(plugin: Counting) -> PluginHandle {
        let plugin: Arc<dyn Plugin> = Arc::new(plugin);
        PluginHandle::new(LoadedPlugin {
            meta: plugin.describe(),
            path: PathBuf::from("counting.so"),
            timeout: Duration::from_millis(100),
            lifecycle_timeout: Duration::from_millis(200),
            plugin,
        })
    }

    #[tokio::test]
    async fn test_close_reaches_plugin_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let handle = handle(Counting {
            closes: closes.clone(),
            ..Default::default()
        });
        let other = handle.clone();

        handle.close().await.expect("close");
        other.close().await.expect("second close is a no-op");
        drop(handle);
        drop(other);

        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_error_is_reported() {
        let closes = Arc::new(AtomicUsize::new(0));
        let handle = handle(Counting {
            closes: closes.clone(),
            fail_close: true,
            ..Default::default()
        });

        let err = handle.close().await.expect_err("close fails");
        assert!(matches!(err, PluginError::CloseFailed { .. }));
        assert!(handle.is_closed());
        assert!(handle.dispatcher().is_shut());
    }

    #[tokio::test]
    async fn test_drop_without_close_still_closes() {
        let closes = Arc::new(AtomicUsize::new(0));
        drop(handle(Counting {
            closes: closes.clone(),
            ..Default::default()
        }));

        for _ in 0..10 {
            if closes.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_close_is_bounded() {
        let closes = Arc::new(AtomicUsize::new(0));
        let handle = handle(Counting {
            closes: closes.clone(),
            hang_close: true,
            ..Default::default()
        });

        let err = handle.close().await.expect_err("close overruns");
        assert!(
            matches!(&err, PluginError::CloseFailed { reason, .. } if reason == "close timed out after 200ms")
        );
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    async fn explode() -> anyhow::Result<()> {
        panic!("config store gone")
    }

    async fn refuse() -> anyhow::Result<()> {
        Err(anyhow::anyhow!("bad blob").context("parse config"))
    }

    #[tokio::test]
    async fn test_run_step_reports_panics_and_errors() {
        let reason = run_step(LifecycleStep::Init, Duration::from_secs(1), explode())
            .await
            .expect_err("panicked");
        assert_eq!(reason, "init panicked: config store gone");

        let reason = run_step(LifecycleStep::Init, Duration::from_secs(1), refuse())
            .await
            .expect_err("failed");
        assert_eq!(reason, "parse config: bad blob");
    }
}
