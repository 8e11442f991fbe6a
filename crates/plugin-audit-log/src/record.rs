//! One audit line.

use chrono::{DateTime, Utc};
use serde::Serialize;

use mqplug_plugin::prelude::DisconnectReason;

/// An audit log line: a timestamp plus the tagged event.
#[derive(Debug, Serialize)]
pub struct AuditLine<'a> {
    /// When the line was written.
    pub time: DateTime<Utc>,
    /// What happened.
    #[serde(flatten)]
    pub entry: AuditEntry<'a>,
}

impl<'a> AuditLine<'a> {
    /// Stamp `entry` with the current time.
    pub fn now(entry: AuditEntry<'a>) -> Self {
        Self {
            time: Utc::now(),
            entry,
        }
    }
}

/// The observed event, tagged by `event`.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEntry<'a> {
    /// A client tried to connect.
    Connect {
        /// Client identifier.
        client_id: &'a str,
        /// Username presented.
        username: &'a str,
        /// Source address.
        ip: &'a str,
    },
    /// A message was routed.
    Publish {
        /// Per-instance message sequence number.
        seq: u64,
        /// Publishing client.
        client_id: &'a str,
        /// Publishing user.
        username: &'a str,
        /// Topic.
        topic: &'a str,
        /// QoS level.
        qos: u8,
        /// Retain flag.
        retain: bool,
        /// Payload size in bytes.
        size: usize,
    },
    /// A client went away.
    Disconnect {
        /// Client identifier.
        client_id: &'a str,
        /// Username of the client.
        username: &'a str,
        /// Why it disconnected.
        reason: DisconnectReason,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_shape() {
        let line = AuditLine::now(AuditEntry::Disconnect {
            client_id: "c1",
            username: "guest",
            reason: DisconnectReason::Timeout,
        });
        let value = serde_json::to_value(&line).expect("serialize");
        assert_eq!(value["event"], "DISCONNECT");
        assert_eq!(value["client_id"], "c1");
        assert_eq!(value["reason"], "timeout");
        assert!(value["time"].is_string());
    }
}
