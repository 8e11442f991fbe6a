//! # mqplug-plugin
//!
//! Plugin contract for MQTT brokers. Provides:
//!
//! - The [`Plugin`] trait and the event records its hooks receive
//! - Metadata validation and hook-timeout resolution
//! - A hook dispatcher with hard timeouts and per-client notification order
//! - Artifact loading, static or via `libloading` (`dynamic` feature)
//! - A manager that reserves names, initializes, fans out and closes plugins

pub mod api;
pub mod error;
pub mod ffi;
pub mod hooks;
pub mod instance;
pub mod lifecycle;
pub mod loader;
pub mod macros;
pub mod manager;
pub mod meta;
pub mod prelude;
pub mod registry;
pub mod traits;

pub use error::PluginError;
pub use hooks::{DecisionOutcome, DispatchError, HookDispatcher, HookPoint, NotificationHandle};
pub use instance::{LoadedPlugin, PluginHandle};
pub use lifecycle::{Lifecycle, SessionState};
pub use loader::{DynamicLoader, FactoryHandle, Loader, StaticLoader};
pub use manager::{PluginManager, Verdict};
pub use meta::{BuildMeta, HostRequirements, PluginMeta, SDK_VERSION};
pub use registry::PluginRegistry;
pub use traits::{HookDecision, Plugin};
