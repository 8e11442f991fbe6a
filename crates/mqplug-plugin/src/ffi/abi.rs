//! Binary interface between the host and a plugin artifact.
//!
//! A plugin `cdylib` exports one static, [`DECLARATION_SYMBOL`], holding a
//! [`PluginDeclaration`]. The host reads `abi_version` first; only when it
//! matches is the rest of the record trusted.
//!
//! Trait objects cross the boundary, so host and plugin must be built with
//! the same SDK release, toolchain and lockfile. Use
//! [`export_plugin!`](crate::export_plugin) rather than writing the static
//! by hand.
//!
//! A `cdylib` links its own copy of std, tokio and tracing. Three things
//! follow for plugin authors and for the host:
//!
//! - The plugin's tokio has no runtime. `tokio::sync` works, but timers,
//!   `spawn`, `tokio::fs` and sockets panic inside a plugin.
//! - A panic raised by the plugin's std can only be caught by that same
//!   std. The declaration carries `contain_hook` and `contain_call`, which
//!   run inside the plugin and hand the payload back to the host.
//! - The plugin's tracing has no subscriber until the host passes its own
//!   through `attach_logger`.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;

use futures::FutureExt;

use crate::meta::SDK_VERSION;
use crate::traits::Plugin;

/// Layout version of [`PluginDeclaration`].
pub const ABI_VERSION: u32 = 2;

/// Name of the exported declaration static.
pub const DECLARATION_SYMBOL: &str = "mqplug_plugin_declaration";

/// Version of this SDK crate.
pub const SDK_CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Payload of a caught panic.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

/// A hook invocation handed to the plugin for panic containment.
pub type HookFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// [`HookFuture`] with panics caught on the plugin's side.
pub type ContainedHook<'a> = Pin<Box<dyn Future<Output = Result<(), PanicPayload>> + Send + 'a>>;

/// Factory record exported by every plugin artifact.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PluginDeclaration {
    /// Must equal [`ABI_VERSION`]. Kept first so it can be read safely from
    /// an artifact built against a different layout.
    pub abi_version: u32,
    /// SDK crate version the artifact was compiled with.
    pub sdk_crate_version: &'static str,
    /// Contract version the artifact was compiled with.
    pub contract_version: &'static str,
    /// `MQPLUG_BUILD_TIME` as seen when the artifact was compiled.
    pub build_time: Option<&'static str>,
    /// Creates a fresh, uninitialized instance.
    pub create: fn() -> Box<dyn Plugin>,
    /// Installs the host's subscriber as the artifact's global default.
    pub attach_logger: fn(&tracing::Dispatch),
    /// Polls a hook future, catching panics in the artifact's std.
    pub contain_hook: for<'a> fn(HookFuture<'a>) -> ContainedHook<'a>,
    /// Runs a synchronous call, catching panics in the artifact's std.
    pub contain_call: fn(&mut dyn FnMut()) -> Result<(), PanicPayload>,
}

impl PluginDeclaration {
    /// Declaration for `create` built against this SDK.
    ///
    /// Evaluated in the plugin crate, so the function pointers below point
    /// at the artifact's own copy of this SDK.
    pub const fn new(create: fn() -> Box<dyn Plugin>) -> Self {
        Self {
            abi_version: ABI_VERSION,
            sdk_crate_version: SDK_CRATE_VERSION,
            contract_version: SDK_VERSION,
            build_time: None,
            create,
            attach_logger,
            contain_hook,
            contain_call,
        }
    }

    /// Records the build timestamp.
    pub const fn with_build_time(self, build_time: Option<&'static str>) -> Self {
        Self { build_time, ..self }
    }

    /// Why this declaration cannot be used by the host, if it cannot.
    ///
    /// The contract version is not checked here: that is the validator's
    /// job once the instance has described itself.
    pub fn incompatibility(&self) -> Option<String> {
        if self.abi_version != ABI_VERSION {
            return Some(format!(
                "abi version {} (host expects {ABI_VERSION})",
                self.abi_version
            ));
        }
        if self.sdk_crate_version != SDK_CRATE_VERSION {
            return Some(format!(
                "built with mqplug-plugin {} (host uses {SDK_CRATE_VERSION})",
                self.sdk_crate_version
            ));
        }
        None
    }
}

fn attach_logger(dispatch: &tracing::Dispatch) {
    // Fails only when this copy already has a default, e.g. a second load
    // of a module that never unmapped.
    let _ = tracing::dispatcher::set_global_default(dispatch.clone());
}

fn contain_hook(call: HookFuture<'_>) -> ContainedHook<'_> {
    Box::pin(AssertUnwindSafe(call).catch_unwind())
}

fn contain_call(call: &mut dyn FnMut()) -> Result<(), PanicPayload> {
    std::panic::catch_unwind(AssertUnwindSafe(call))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::meta::PluginMeta;

    #[derive(Debug)]
    struct Noop;

    #[async_trait]
    impl Plugin for Noop {
        fn describe(&self) -> PluginMeta {
            PluginMeta::new("noop", "0.0.0")
        }

        async fn init(&self, _config: &[u8]) -> anyhow::Result<()> {
            Ok(())
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn create() -> Box<dyn Plugin> {
        Box::new(Noop)
    }

    #[test]
    fn test_current_declaration_is_compatible() {
        let declaration = PluginDeclaration::new(create);
        assert!(declaration.incompatibility().is_none());
        assert!(declaration.build_time.is_none());

        let stamped = declaration.with_build_time(Some("2026-03-01T12:00:00Z"));
        assert_eq!(stamped.build_time, Some("2026-03-01T12:00:00Z"));
        assert!(stamped.incompatibility().is_none());
    }

    #[test]
    fn test_foreign_declarations_are_rejected() {
        let old_abi = PluginDeclaration {
            abi_version: 1,
            ..PluginDeclaration::new(create)
        };
        assert!(old_abi.incompatibility().expect("abi").contains("abi version 1"));

        let other_sdk = PluginDeclaration {
            sdk_crate_version: "0.0.0-other",
            ..PluginDeclaration::new(create)
        };
        assert!(other_sdk
            .incompatibility()
            .expect("sdk")
            .contains("0.0.0-other"));
    }

    #[test]
    fn test_contain_call_returns_the_payload() {
        let declaration = PluginDeclaration::new(create);
        let mut ran = false;
        assert!((declaration.contain_call)(&mut || ran = true).is_ok());
        assert!(ran);

        let payload = (declaration.contain_call)(&mut || panic!("describe blew up"))
            .expect_err("caught");
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"describe blew up"));
    }

    #[tokio::test]
    async fn test_contain_hook_returns_the_payload() {
        let declaration = PluginDeclaration::new(create);
        let mut out = 0;
        (declaration.contain_hook)(Box::pin(async { out = 7 }))
            .await
            .expect("no panic");
        assert_eq!(out, 7);

        let payload = (declaration.contain_hook)(Box::pin(async {
            panic!("hook blew up");
        }))
        .await
        .expect_err("caught");
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"hook blew up"));
    }
}
