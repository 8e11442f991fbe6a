//! Prelude for plugin authors.

pub use async_trait::async_trait;

pub use crate::api::events::{
    AuthEvent, DisconnectEvent, DisconnectReason, PublishEvent, SubscribeEvent,
};
pub use crate::meta::PluginMeta;
pub use crate::traits::{HookDecision, Plugin};

pub use crate::export_plugin;
