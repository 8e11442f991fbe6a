//! Event records handed to plugin hooks.
//!
//! Input fields are filled by the host. Decision events also carry a
//! plugin-writable `threat_score`; notification events are passed by shared
//! reference and cannot be modified.
//!
//! All records deserialize from JSON so the conformance runner can decode
//! scripted inputs. Credentials and payloads are given as UTF-8 strings.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};

/// A client connection attempt (CONNECT).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthEvent {
    /// Client identifier.
    #[serde(alias = "clientId", alias = "ClientID")]
    pub client_id: String,
    /// Username presented by the client.
    #[serde(alias = "Username")]
    pub username: String,
    /// Credential bytes presented by the client.
    #[serde(alias = "Password", deserialize_with = "bytes_from_text")]
    pub password: Bytes,
    /// Source address of the connection.
    #[serde(alias = "IP", alias = "source_addr")]
    pub ip: String,
    /// Per-event threat signal set by the plugin; 0 means none.
    pub threat_score: u32,
}

/// A subscription request (SUBSCRIBE).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscribeEvent {
    /// Client identifier.
    #[serde(alias = "clientId", alias = "ClientID")]
    pub client_id: String,
    /// Username of the subscriber.
    #[serde(alias = "Username")]
    pub username: String,
    /// Topic filter, possibly with wildcards.
    #[serde(alias = "Topic")]
    pub topic: String,
    /// Requested QoS level.
    #[serde(alias = "QoS")]
    pub qos: u8,
    /// Source address of the connection.
    #[serde(alias = "IP", alias = "source_addr")]
    pub ip: String,
    /// Per-event threat signal set by the plugin; 0 means none.
    pub threat_score: u32,
}

/// A message that has already been routed (PUBLISH).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishEvent {
    /// Publishing client identifier.
    #[serde(alias = "clientId", alias = "ClientID")]
    pub client_id: String,
    /// Username of the publisher.
    #[serde(alias = "Username")]
    pub username: String,
    /// Topic the message was published to.
    #[serde(alias = "Topic")]
    pub topic: String,
    /// Message payload (shared, read-only).
    #[serde(alias = "Payload", deserialize_with = "bytes_from_text")]
    pub payload: Bytes,
    /// QoS level.
    #[serde(alias = "QoS")]
    pub qos: u8,
    /// Retain flag.
    #[serde(alias = "Retain")]
    pub retain: bool,
}

/// Why a client went away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The client sent DISCONNECT.
    #[default]
    Graceful,
    /// Keep-alive expired.
    Timeout,
    /// The connection was dropped for a protocol violation.
    #[serde(alias = "error")]
    ProtocolError,
}

impl DisconnectReason {
    /// Wire name of the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Graceful => "graceful",
            Self::Timeout => "timeout",
            Self::ProtocolError => "protocol_error",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisconnectReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "graceful" => Ok(Self::Graceful),
            "timeout" => Ok(Self::Timeout),
            "protocol_error" | "protocol-error" | "error" => Ok(Self::ProtocolError),
            other => Err(format!(
                "unknown disconnect reason '{other}' (expected graceful, timeout or protocol_error)"
            )),
        }
    }
}

/// A client disconnect that already happened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisconnectEvent {
    /// Client identifier.
    #[serde(alias = "clientId", alias = "ClientID")]
    pub client_id: String,
    /// Username of the client.
    #[serde(alias = "Username")]
    pub username: String,
    /// Disconnect reason.
    #[serde(alias = "Reason")]
    pub reason: DisconnectReason,
}

fn bytes_from_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
    let text = String::deserialize(deserializer)?;
    Ok(Bytes::from(text))
}
