//! Artifact loaders: turn an artifact path into a plugin factory.
//!
//! [`StaticLoader`] serves declarations registered at build time and is what
//! tests and embedded hosts use. [`DynamicLoader`] opens shared libraries with
//! `libloading` and is only functional with the `dynamic` feature.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::api::events::{AuthEvent, DisconnectEvent, PublishEvent, SubscribeEvent};
use crate::error::PluginError;
use crate::ffi::abi::{DECLARATION_SYMBOL, PanicPayload, PluginDeclaration};
use crate::meta::PluginMeta;
use crate::traits::{HookDecision, Plugin};

/// Keeps a loaded module mapped while anything created from it is alive.
pub type ModuleGuard = Arc<dyn Any + Send + Sync>;

/// Resolves artifact paths to factories.
pub trait Loader: Send + Sync + fmt::Debug {
    /// Locate the artifact and its exported factory.
    ///
    /// Fails with `ArtifactNotFound`, `ArtifactUnreadable`,
    /// `FactoryNotFound` or `FactoryTypeMismatch`.
    fn resolve(&mut self, path: &Path) -> Result<FactoryHandle, PluginError>;
}

/// A checked factory, ready to create instances.
#[derive(Clone)]
pub struct FactoryHandle {
    path: PathBuf,
    declaration: PluginDeclaration,
    module: Option<ModuleGuard>,
}

impl FactoryHandle {
    /// Wraps a declaration after checking it against this SDK.
    pub fn new(
        path: impl Into<PathBuf>,
        declaration: PluginDeclaration,
        module: Option<ModuleGuard>,
    ) -> Result<Self, PluginError> {
        let path = path.into();
        if let Some(reason) = declaration.incompatibility() {
            return Err(PluginError::FactoryTypeMismatch { path, reason });
        }
        Ok(Self {
            path,
            declaration,
            module,
        })
    }

    /// Artifact this factory came from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build timestamp recorded in the artifact's declaration.
    pub fn build_time(&self) -> Option<&'static str> {
        self.declaration.build_time
    }

    /// Fills in what the declaration knows and `describe` left unset.
    pub fn stamp(&self, mut meta: PluginMeta) -> PluginMeta {
        if meta.build_time.is_none() {
            meta.build_time = self.build_time().map(str::to_string);
        }
        meta
    }

    /// Creates a fresh, uninitialized instance.
    ///
    /// Instances from a loaded module are wrapped so that every call runs
    /// under the module's own panic catcher.
    pub fn instantiate(&self) -> Box<dyn Plugin> {
        match &self.module {
            Some(module) => {
                let contained = Contained {
                    declaration: self.declaration,
                };
                let plugin = contained.call(self.declaration.create);
                Box::new(ModuleBound {
                    plugin,
                    contained,
                    _module: module.clone(),
                })
            }
            None => (self.declaration.create)(),
        }
    }
}

impl fmt::Debug for FactoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryHandle")
            .field("path", &self.path)
            .field("sdk_crate_version", &self.declaration.sdk_crate_version)
            .field("dynamic", &self.module.is_some())
            .finish()
    }
}

/// Runs plugin code under the catchers exported by its module.
///
/// A panic in a `cdylib` can only be caught by the std it was raised in.
/// The module catches it and the payload is re-raised here, in the host's
/// std, where the dispatcher's task boundary handles it like any other.
#[derive(Clone, Copy)]
struct Contained {
    declaration: PluginDeclaration,
}

impl Contained {
    fn call<T>(self, call: impl FnOnce() -> T) -> T {
        let mut call = Some(call);
        let mut out = None;
        let caught = (self.declaration.contain_call)(&mut || {
            if let Some(call) = call.take() {
                out = Some(call());
            }
        });
        Self::settle(caught, out)
    }

    async fn hook<T: Send>(self, call: impl Future<Output = T> + Send) -> T {
        let mut out = None;
        let caught = (self.declaration.contain_hook)(Box::pin(async {
            out = Some(call.await);
        }))
        .await;
        Self::settle(caught, out)
    }

    fn settle<T>(caught: Result<(), PanicPayload>, out: Option<T>) -> T {
        match (caught, out) {
            (Ok(()), Some(value)) => value,
            (Err(payload), _) => std::panic::resume_unwind(payload),
            (Ok(()), None) => unreachable!("contained call returned without a value"),
        }
    }
}

/// A plugin instance that pins the module its code lives in.
///
/// Field order matters: the instance drops before the module guard.
struct ModuleBound {
    plugin: Box<dyn Plugin>,
    contained: Contained,
    _module: ModuleGuard,
}

impl fmt::Debug for ModuleBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.plugin, f)
    }
}

#[async_trait]
impl Plugin for ModuleBound {
    fn describe(&self) -> PluginMeta {
        self.contained.call(|| self.plugin.describe())
    }

    async fn init(&self, config: &[u8]) -> anyhow::Result<()> {
        self.contained.hook(self.plugin.init(config)).await
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.contained.hook(self.plugin.close()).await
    }

    async fn on_auth(&self, event: &mut AuthEvent) -> HookDecision {
        self.contained.hook(self.plugin.on_auth(event)).await
    }

    async fn on_subscribe(&self, event: &mut SubscribeEvent) -> HookDecision {
        self.contained.hook(self.plugin.on_subscribe(event)).await
    }

    async fn on_publish(&self, event: &PublishEvent) {
        self.contained.hook(self.plugin.on_publish(event)).await
    }

    async fn on_disconnect(&self, event: &DisconnectEvent) {
        self.contained.hook(self.plugin.on_disconnect(event)).await
    }
}

/// Loader over declarations registered in-process.
///
/// Each artifact path maps to the symbols it "exports", so a missing or
/// foreign factory can be modelled exactly like a real module.
#[derive(Debug, Default)]
pub struct StaticLoader {
    artifacts: HashMap<PathBuf, HashMap<String, PluginDeclaration>>,
}

impl StaticLoader {
    /// Creates an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an artifact exporting `declaration` under the standard symbol.
    pub fn with_plugin(self, path: impl Into<PathBuf>, declaration: PluginDeclaration) -> Self {
        self.with_export(path, DECLARATION_SYMBOL, declaration)
    }

    /// Registers an artifact exporting `declaration` under `symbol`.
    pub fn with_export(
        mut self,
        path: impl Into<PathBuf>,
        symbol: &str,
        declaration: PluginDeclaration,
    ) -> Self {
        self.artifacts
            .entry(path.into())
            .or_default()
            .insert(symbol.to_string(), declaration);
        self
    }

    /// Registers an artifact that exports nothing.
    pub fn with_empty_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifacts.entry(path.into()).or_default();
        self
    }
}

impl Loader for StaticLoader {
    fn resolve(&mut self, path: &Path) -> Result<FactoryHandle, PluginError> {
        let exports = self
            .artifacts
            .get(path)
            .ok_or_else(|| PluginError::ArtifactNotFound {
                path: path.to_path_buf(),
            })?;

        let declaration =
            exports
                .get(DECLARATION_SYMBOL)
                .ok_or_else(|| PluginError::FactoryNotFound {
                    path: path.to_path_buf(),
                    symbol: DECLARATION_SYMBOL.to_string(),
                })?;

        FactoryHandle::new(path, *declaration, None)
    }
}

#[cfg(feature = "dynamic")]
mod dynamic {
    use std::path::Path;
    use std::sync::Arc;

    use tracing::info;

    use super::{FactoryHandle, Loader};
    use crate::error::PluginError;
    use crate::ffi::abi::{ABI_VERSION, DECLARATION_SYMBOL, PluginDeclaration};

    /// Loads plugins from shared libraries (.so / .dll / .dylib).
    ///
    /// Loading runs arbitrary code from the artifact. Only load trusted
    /// plugins.
    #[derive(Debug, Default)]
    pub struct DynamicLoader;

    impl DynamicLoader {
        /// Creates a new dynamic loader.
        pub fn new() -> Self {
            Self
        }
    }

    impl Loader for DynamicLoader {
        fn resolve(&mut self, path: &Path) -> Result<FactoryHandle, PluginError> {
            if !path.exists() {
                return Err(PluginError::ArtifactNotFound {
                    path: path.to_path_buf(),
                });
            }

            // SAFETY: opening a library runs its initializers; the caller
            // vouches for the artifact.
            let library = unsafe { libloading::Library::new(path) }.map_err(|e| {
                PluginError::ArtifactUnreadable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                }
            })?;

            // SAFETY: only `abi_version`, the first field of a `repr(C)`
            // struct, is read before the layout is known to match.
            let declaration = unsafe {
                let symbol = library
                    .get::<*const PluginDeclaration>(DECLARATION_SYMBOL.as_bytes())
                    .map_err(|_| PluginError::FactoryNotFound {
                        path: path.to_path_buf(),
                        symbol: DECLARATION_SYMBOL.to_string(),
                    })?;
                let ptr: *const PluginDeclaration = *symbol;

                let abi_version = std::ptr::addr_of!((*ptr).abi_version).read();
                if abi_version != ABI_VERSION {
                    return Err(PluginError::FactoryTypeMismatch {
                        path: path.to_path_buf(),
                        reason: format!(
                            "abi version {abi_version} (host expects {ABI_VERSION})"
                        ),
                    });
                }
                ptr.read()
            };

            let handle = FactoryHandle::new(path, declaration, Some(Arc::new(library)))?;
            tracing::dispatcher::get_default(|dispatch| (declaration.attach_logger)(dispatch));
            info!(path = %path.display(), "Plugin artifact opened");
            Ok(handle)
        }
    }
}

#[cfg(not(feature = "dynamic"))]
mod dynamic {
    use std::path::Path;

    use super::{FactoryHandle, Loader};
    use crate::error::PluginError;

    /// Stand-in used when the crate is built without the `dynamic` feature.
    #[derive(Debug, Default)]
    pub struct DynamicLoader;

    impl DynamicLoader {
        /// Creates a stub loader.
        pub fn new() -> Self {
            Self
        }
    }

    impl Loader for DynamicLoader {
        fn resolve(&mut self, path: &Path) -> Result<FactoryHandle, PluginError> {
            if !path.exists() {
                return Err(PluginError::ArtifactNotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(PluginError::ArtifactUnreadable {
                path: path.to_path_buf(),
                reason: "host built without the `dynamic` feature".to_string(),
            })
        }
    }
}

pub use dynamic::DynamicLoader;
