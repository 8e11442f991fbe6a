//! # Plugin Audit Log
//!
//! Appends one JSON line per client connect, publish and disconnect to a
//! log file, and counts connections and messages for the lifetime of the
//! instance. Every connection is allowed; the plugin only observes.
//!
//! Configuration is an optional JSON blob:
//!
//! ```json
//! { "log_path": "/var/log/mqplug/audit.log" }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod plugin;
pub mod record;

pub use config::AuditLogConfig;
pub use error::AuditLogError;
pub use metrics::{AuditMetrics, MetricsSnapshot};
pub use plugin::AuditLogPlugin;

mqplug_plugin::export_plugin!(AuditLogPlugin::new);
