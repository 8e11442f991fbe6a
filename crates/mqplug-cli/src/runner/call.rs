//! Hook invocations and what the runner observed from them.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use mqplug_plugin::api::events::{AuthEvent, DisconnectEvent, PublishEvent, SubscribeEvent};
use mqplug_plugin::hooks::{DecisionOutcome, DispatchError, HookPoint, NotificationStatus};

/// One hook invocation with its decoded input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookCall {
    /// `on_auth`.
    Auth(AuthEvent),
    /// `on_subscribe`.
    Subscribe(SubscribeEvent),
    /// `on_publish`.
    Publish(PublishEvent),
    /// `on_disconnect`.
    Disconnect(DisconnectEvent),
}

impl HookCall {
    /// Decode a JSON input for `hook`. A missing (`null`) input is treated
    /// as an empty object.
    pub fn decode(hook: HookPoint, input: &Value) -> Result<Self, serde_json::Error> {
        let input = if input.is_null() {
            Value::Object(Default::default())
        } else {
            input.clone()
        };

        Ok(match hook {
            HookPoint::Auth => Self::Auth(serde_json::from_value(input)?),
            HookPoint::Subscribe => Self::Subscribe(serde_json::from_value(input)?),
            HookPoint::Publish => Self::Publish(serde_json::from_value(input)?),
            HookPoint::Disconnect => Self::Disconnect(serde_json::from_value(input)?),
        })
    }

    /// Hook point this call targets.
    pub fn hook(&self) -> HookPoint {
        match self {
            Self::Auth(_) => HookPoint::Auth,
            Self::Subscribe(_) => HookPoint::Subscribe,
            Self::Publish(_) => HookPoint::Publish,
            Self::Disconnect(_) => HookPoint::Disconnect,
        }
    }
}

/// Raw result of one hook invocation.
///
/// Notification hooks have no answer; they are observed as `allow = true`
/// once delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Hook that was invoked.
    pub hook: HookPoint,
    /// Decision, or the timeout policy's substitute when there was none.
    pub allow: bool,
    /// Application error text, or why the hook gave no answer.
    pub error: Option<String>,
    /// Threat score written by the plugin.
    pub threat_score: u32,
    /// Time spent in the hook, zero when it gave no answer.
    pub elapsed: Duration,
    /// Whether the hook timed out.
    pub timed_out: bool,
}

impl Observation {
    /// From a decision hook's dispatch result.
    pub fn from_decision(
        hook: HookPoint,
        result: Result<DecisionOutcome, DispatchError>,
        timeout_allows: bool,
    ) -> Self {
        match result {
            Ok(outcome) => Self {
                hook,
                allow: outcome.allow,
                error: outcome.error,
                threat_score: outcome.threat_score,
                elapsed: outcome.elapsed,
                timed_out: false,
            },
            Err(e) => Self::unanswered(hook, e, timeout_allows),
        }
    }

    /// From a notification hook's completion status.
    pub fn from_notification(hook: HookPoint, status: NotificationStatus) -> Self {
        match status {
            NotificationStatus::Delivered { elapsed } => Self {
                hook,
                allow: true,
                error: None,
                threat_score: 0,
                elapsed,
                timed_out: false,
            },
            NotificationStatus::Failed(e) => Self::unanswered(hook, e, true),
        }
    }

    fn unanswered(hook: HookPoint, error: DispatchError, allow: bool) -> Self {
        Self {
            hook,
            allow,
            timed_out: error.is_timeout(),
            error: Some(error.to_string()),
            threat_score: 0,
            elapsed: Duration::ZERO,
        }
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hook.is_decision_hook() {
            write!(
                f,
                "{} -> allow={} threat_score={} elapsed={:?}",
                self.hook.method_name(),
                self.allow,
                self.threat_score,
                self.elapsed
            )?;
        } else {
            write!(
                f,
                "{} -> delivered elapsed={:?}",
                self.hook.method_name(),
                self.elapsed
            )?;
        }
        if let Some(error) = &self.error {
            write!(f, " error=\"{error}\"")?;
        }
        Ok(())
    }
}
