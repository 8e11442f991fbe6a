//! Hook point definitions and dispatch outcomes.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Enumeration of all hook points a broker fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPoint {
    /// CONNECT handling, after built-in authentication. Can reject.
    Auth,
    /// SUBSCRIBE handling, after built-in ACL checks. Can reject.
    Subscribe,
    /// After a PUBLISH was routed. Notification only.
    Publish,
    /// After a client disconnected. Notification only.
    Disconnect,
}

impl HookPoint {
    /// All hook points in protocol order.
    pub const ALL: [HookPoint; 4] = [Self::Auth, Self::Subscribe, Self::Publish, Self::Disconnect];

    /// Returns the string name of this hook point.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Subscribe => "subscribe",
            Self::Publish => "publish",
            Self::Disconnect => "disconnect",
        }
    }

    /// Name of the trait method serving this hook point.
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::Auth => "on_auth",
            Self::Subscribe => "on_subscribe",
            Self::Publish => "on_publish",
            Self::Disconnect => "on_disconnect",
        }
    }

    /// Returns whether this hook's answer can change the broker's handling.
    pub fn is_decision_hook(&self) -> bool {
        matches!(self, Self::Auth | Self::Subscribe)
    }
}

impl std::fmt::Display for HookPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HookPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|hook| hook.as_str() == s)
            .ok_or_else(|| format!("unknown hook: {s}"))
    }
}

/// What a decision hook returned, as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    /// Hook that produced the outcome.
    pub hook: HookPoint,
    /// Plugin that produced the outcome.
    pub plugin: String,
    /// The plugin's decision.
    pub allow: bool,
    /// Application error text, if the plugin attached one.
    pub error: Option<String>,
    /// Threat-score delta written by the plugin.
    pub threat_score: u32,
    /// Wall time spent in the hook.
    #[serde(with = "elapsed_us")]
    pub elapsed: Duration,
}

impl DecisionOutcome {
    /// Whether the plugin deliberately rejected the event.
    pub fn is_rejection(&self) -> bool {
        !self.allow
    }
}

mod elapsed_us {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_micros() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_micros(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_hooks() {
        for hook in HookPoint::ALL {
            assert_eq!(hook.as_str().parse::<HookPoint>(), Ok(hook));
        }
    }

    #[test]
    fn test_parse_unknown_hook() {
        assert_eq!(
            "frobnicate".parse::<HookPoint>(),
            Err("unknown hook: frobnicate".to_string())
        );
    }

    #[test]
    fn test_decision_hooks() {
        assert!(HookPoint::Auth.is_decision_hook());
        assert!(HookPoint::Subscribe.is_decision_hook());
        assert!(!HookPoint::Publish.is_decision_hook());
        assert!(!HookPoint::Disconnect.is_decision_hook());
    }
}
