//! Audit counters.
//!
//! Instance-scoped and lock-free: hooks run concurrently on one instance,
//! so every counter is an atomic.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters kept for the lifetime of one plugin instance.
#[derive(Debug, Default)]
pub struct AuditMetrics {
    /// Connection attempts observed.
    connections: AtomicU64,
    /// Published messages observed.
    messages: AtomicU64,
    /// Disconnects observed.
    disconnects: AtomicU64,
    /// Total payload bytes of observed messages.
    payload_bytes: AtomicU64,
    /// Audit lines that could not be written.
    write_failures: AtomicU64,
}

impl AuditMetrics {
    /// Create a new empty metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection attempt.
    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a published message; returns its 1-based sequence number.
    pub fn record_message(&self, payload_bytes: usize) -> u64 {
        self.payload_bytes
            .fetch_add(payload_bytes as u64, Ordering::Relaxed);
        self.messages.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a disconnect.
    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a line that could not be written.
    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current snapshot of metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            messages: self.messages.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            payload_bytes: self.payload_bytes.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of audit metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Connection attempts observed.
    pub connections: u64,
    /// Published messages observed.
    pub messages: u64,
    /// Disconnects observed.
    pub disconnects: u64,
    /// Total payload bytes of observed messages.
    pub payload_bytes: u64,
    /// Audit lines that could not be written.
    pub write_failures: u64,
}
