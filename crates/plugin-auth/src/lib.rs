//! # Plugin Auth
//!
//! Authenticates MQTT clients against a username/password table and keeps
//! non-admin users away from `$SYS` topics.
//!
//! Configuration is an optional JSON blob:
//!
//! ```json
//! { "users": { "alice": "wonderland" } }
//! ```
//!
//! A non-empty `users` map replaces the built-in table.

pub mod config;
pub mod error;
pub mod plugin;

pub use config::AuthConfig;
pub use error::AuthError;
pub use plugin::AuthPlugin;

mqplug_plugin::export_plugin!(AuthPlugin::new);
