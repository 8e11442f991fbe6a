//! Audit log plugin implementation.
//!
//! The plugin may be loaded as a `cdylib`, where it carries its own copy of
//! tokio with no runtime behind it. File access therefore stays on `std::fs`;
//! each append is a single small write.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{info, warn};

use mqplug_plugin::prelude::*;

use crate::config::AuditLogConfig;
use crate::error::AuditLogError;
use crate::metrics::{AuditMetrics, MetricsSnapshot};
use crate::record::{AuditEntry, AuditLine};

/// Plugin name reported by `describe()`.
pub const PLUGIN_NAME: &str = "logger_plugin";

#[derive(Debug)]
struct AuditWriter {
    path: PathBuf,
    file: File,
}

/// JSON-lines audit log plugin.
#[derive(Debug, Default)]
pub struct AuditLogPlugin {
    /// Open log file; `None` before `init` and after `close`.
    writer: Mutex<Option<AuditWriter>>,
    /// Instance counters.
    metrics: AuditMetrics,
}

impl AuditLogPlugin {
    /// Creates an uninitialized plugin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counter values.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Path of the open log file, if any.
    pub fn log_path(&self) -> Option<PathBuf> {
        self.writer().as_ref().map(|w| w.path.clone())
    }

    fn writer(&self) -> MutexGuard<'_, Option<AuditWriter>> {
        // A panicking writer leaves the file usable; keep appending.
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, entry: AuditEntry<'_>) -> Result<(), AuditLogError> {
        let mut line = serde_json::to_vec(&AuditLine::now(entry))?;
        line.push(b'\n');

        let mut guard = self.writer();
        let writer = guard.as_mut().ok_or(AuditLogError::NotOpen)?;
        writer.file.write_all(&line)?;
        writer.file.flush()?;
        Ok(())
    }

    fn record(&self, entry: AuditEntry<'_>) {
        if let Err(e) = self.append(entry) {
            self.metrics.record_write_failure();
            warn!(plugin = PLUGIN_NAME, error = %e, "Failed to write audit line");
        }
    }
}

#[async_trait]
impl Plugin for AuditLogPlugin {
    fn describe(&self) -> PluginMeta {
        PluginMeta::new(PLUGIN_NAME, env!("CARGO_PKG_VERSION"))
    }

    async fn init(&self, config: &[u8]) -> anyhow::Result<()> {
        let config = AuditLogConfig::from_blob(config)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_path)
            .map_err(|source| AuditLogError::Open {
                path: config.log_path.clone(),
                source,
            })?;

        info!(plugin = PLUGIN_NAME, path = %config.log_path.display(), "Audit log opened");
        *self.writer() = Some(AuditWriter {
            path: config.log_path,
            file,
        });
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        let writer = self.writer().take();
        let snapshot = self.metrics.snapshot();
        info!(
            plugin = PLUGIN_NAME,
            messages = snapshot.messages,
            connections = snapshot.connections,
            write_failures = snapshot.write_failures,
            "Audit log closing"
        );

        if let Some(mut writer) = writer {
            writer.file.flush().map_err(AuditLogError::from)?;
            writer.file.sync_all().map_err(AuditLogError::from)?;
        }
        Ok(())
    }

    async fn on_auth(&self, event: &mut AuthEvent) -> HookDecision {
        self.metrics.record_connection();
        self.record(AuditEntry::Connect {
            client_id: &event.client_id,
            username: &event.username,
            ip: &event.ip,
        });
        HookDecision::allow()
    }

    async fn on_publish(&self, event: &PublishEvent) {
        let seq = self.metrics.record_message(event.payload.len());
        self.record(AuditEntry::Publish {
            seq,
            client_id: &event.client_id,
            username: &event.username,
            topic: &event.topic,
            qos: event.qos,
            retain: event.retain,
            size: event.payload.len(),
        });
    }

    async fn on_disconnect(&self, event: &DisconnectEvent) {
        self.metrics.record_disconnect();
        self.record(AuditEntry::Disconnect {
            client_id: &event.client_id,
            username: &event.username,
            reason: event.reason,
        });
    }
}
