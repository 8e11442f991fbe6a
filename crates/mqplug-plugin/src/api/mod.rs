//! Plugin API: event records handed to hooks.

pub mod events;

pub use events::{AuthEvent, DisconnectEvent, DisconnectReason, PublishEvent, SubscribeEvent};
