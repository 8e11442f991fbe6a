//! Plugin session lifecycle.
//!
//! ```text
//! Unloaded → Loaded → Validated → Initialized → Active → Closed
//! ```
//!
//! Any failure once the artifact resolved moves the session straight to
//! `Closed`. A session whose artifact never resolved stays `Unloaded`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PluginError;

/// Where a plugin session stands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No artifact resolved yet.
    #[default]
    Unloaded,
    /// Factory resolved and an instance created.
    Loaded,
    /// `describe()` passed compatibility validation.
    Validated,
    /// `init` succeeded.
    Initialized,
    /// Hooks are being dispatched.
    Active,
    /// Terminal. Resources released.
    Closed,
}

impl SessionState {
    /// Lowercase name used in logs and CLI output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
            Self::Validated => "validated",
            Self::Initialized => "initialized",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    /// The state a successful step leads to, if any.
    pub fn next(&self) -> Option<SessionState> {
        match self {
            Self::Unloaded => Some(Self::Loaded),
            Self::Loaded => Some(Self::Validated),
            Self::Validated => Some(Self::Initialized),
            Self::Initialized => Some(Self::Active),
            Self::Active => Some(Self::Closed),
            Self::Closed => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// State before the change.
    pub from: SessionState,
    /// State after the change.
    pub to: SessionState,
    /// When the change happened.
    pub at: DateTime<Utc>,
    /// Failure that forced the change, if any.
    pub error: Option<String>,
}

/// State machine for a single plugin session, with its history.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    state: SessionState,
    history: Vec<Transition>,
}

impl Lifecycle {
    /// A fresh session in `Unloaded`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every transition so far, oldest first.
    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    /// Whether hooks may be dispatched.
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Move one step forward to `to`.
    ///
    /// Only the next state in the chain is accepted.
    pub fn advance(&mut self, to: SessionState) -> Result<(), PluginError> {
        if self.state.next() != Some(to) {
            return Err(PluginError::InvalidState {
                operation: transition_name(to),
                state: self.state,
            });
        }
        self.record(to, None);
        Ok(())
    }

    /// Record a failure.
    ///
    /// Before the artifact resolved the session stays `Unloaded`; from any
    /// later state it closes. Returns the resulting state.
    pub fn fail(&mut self, error: &PluginError) -> SessionState {
        match self.state {
            SessionState::Unloaded => {
                warn!(state = %self.state, error = %error, "Plugin session failed before load");
            }
            SessionState::Closed => {}
            _ => {
                warn!(state = %self.state, error = %error, "Plugin session failed, closing");
                self.record(SessionState::Closed, Some(error.to_string()));
            }
        }
        self.state
    }

    /// Close the session from any state. Idempotent.
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            self.record(SessionState::Closed, None);
        }
    }

    fn record(&mut self, to: SessionState, error: Option<String>) {
        debug!(from = %self.state, to = %to, "Plugin session transition");
        self.history.push(Transition {
            from: self.state,
            to,
            at: Utc::now(),
            error,
        });
        self.state = to;
    }
}

fn transition_name(to: SessionState) -> &'static str {
    match to {
        SessionState::Unloaded => "unload",
        SessionState::Loaded => "load",
        SessionState::Validated => "validate",
        SessionState::Initialized => "initialize",
        SessionState::Active => "activate",
        SessionState::Closed => "close",
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_happy_path_records_history() {
        let mut lc = Lifecycle::new();
        for to in [
            SessionState::Loaded,
            SessionState::Validated,
            SessionState::Initialized,
            SessionState::Active,
        ] {
            lc.advance(to).expect("advance");
        }
        assert!(lc.is_active());
        lc.close();
        lc.close();

        let states: Vec<_> = lc.history().iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![
                SessionState::Loaded,
                SessionState::Validated,
                SessionState::Initialized,
                SessionState::Active,
                SessionState::Closed,
            ]
        );
    }

    #[test]
    fn test_skipping_a_state_is_rejected() {
        let mut lc = Lifecycle::new();
        let err = lc.advance(SessionState::Active).expect_err("skip");
        assert_eq!(err.to_string(), "cannot activate while session is unloaded");
        assert_eq!(lc.state(), SessionState::Unloaded);
    }

    #[test]
    fn test_resolve_failure_stays_unloaded() {
        let mut lc = Lifecycle::new();
        let state = lc.fail(&PluginError::FactoryNotFound {
            path: PathBuf::from("auth.so"),
            symbol: "mqplug_plugin_declaration".into(),
        });
        assert_eq!(state, SessionState::Unloaded);
        assert!(lc.history().is_empty());
    }

    #[test]
    fn test_failure_after_load_closes() {
        let mut lc = Lifecycle::new();
        lc.advance(SessionState::Loaded).expect("load");
        let state = lc.fail(&PluginError::InvalidName);
        assert_eq!(state, SessionState::Closed);

        let last = lc.history().last().expect("transition");
        assert_eq!(last.from, SessionState::Loaded);
        assert_eq!(last.error.as_deref(), Some("plugin name is empty"));
    }
}
