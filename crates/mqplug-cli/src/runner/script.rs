//! Scripted conformance mode.
//!
//! A script is a JSON array of cases:
//!
//! ```json
//! [
//!   { "name": "admin login", "hook": "auth",
//!     "input": { "username": "admin", "password": "secret" },
//!     "expect": { "allow": true } }
//! ]
//! ```
//!
//! Cases run one after another. Each case is decoded on its own, so a
//! malformed case fails alone and the rest still run.

use std::io::Write;
use std::path::Path;

use mqplug_core::AppResult;
use mqplug_core::error::{AppError, ErrorKind};
use mqplug_plugin::HookPoint;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::call::{HookCall, Observation};
use super::session::RunnerSession;

/// One scripted case.
#[derive(Debug, Clone, Deserialize)]
pub struct TestCase {
    /// Label printed next to the result.
    #[serde(default)]
    pub name: String,
    /// Hook name: `auth`, `subscribe`, `publish` or `disconnect`.
    pub hook: String,
    /// Event record for the hook; decoded when the case runs.
    #[serde(default)]
    pub input: Value,
    /// What the case expects. Empty means anything passes.
    #[serde(default)]
    pub expect: Expectation,
}

/// Expected result of a case.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Expectation {
    /// Required decision.
    pub allow: Option<bool>,
    /// Substring the hook's error must contain.
    pub error: Option<String>,
}

impl Expectation {
    fn is_met_by(&self, obs: &Observation) -> bool {
        if self.allow.is_some_and(|allow| allow != obs.allow) {
            return false;
        }
        match self.error.as_deref() {
            Some(wanted) if !wanted.is_empty() => obs
                .error
                .as_deref()
                .is_some_and(|got| got.contains(wanted)),
            _ => true,
        }
    }
}

/// How one case ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseOutcome {
    /// The observation matched the expectation.
    Passed,
    /// The observation did not match, or the case could not run.
    Failed(String),
    /// The case names a hook the contract does not have.
    Skipped(String),
}

/// Totals over a script run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptSummary {
    /// Cases that passed.
    pub passed: usize,
    /// Cases that failed.
    pub failed: usize,
    /// Cases naming an unknown hook.
    pub skipped: usize,
}

impl ScriptSummary {
    /// Whether every case that ran passed.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    fn count(&mut self, outcome: &CaseOutcome) {
        match outcome {
            CaseOutcome::Passed => self.passed += 1,
            CaseOutcome::Failed(_) => self.failed += 1,
            CaseOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

/// Parses a script file into raw case values.
///
/// Only the outer array is checked here.
pub fn load_script(path: &Path) -> AppResult<Vec<Value>> {
    let data = std::fs::read(path).map_err(|e| {
        AppError::with_source(
            ErrorKind::Io,
            format!("failed to read script file {}", path.display()),
            e,
        )
    })?;
    serde_json::from_slice(&data).map_err(|e| {
        AppError::with_source(
            ErrorKind::Serialization,
            format!("failed to parse script file {}", path.display()),
            e,
        )
    })
}

/// Runs every case against `session`, printing one line per case and a
/// summary to `out`.
pub async fn run_script<W: Write>(
    session: &RunnerSession,
    cases: &[Value],
    out: &mut W,
) -> AppResult<ScriptSummary> {
    let mut summary = ScriptSummary::default();

    for (i, raw) in cases.iter().enumerate() {
        let label = raw
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        write!(out, "[{}] {} ... ", i + 1, label)?;

        let outcome = run_case(session, raw).await;
        match &outcome {
            CaseOutcome::Passed => writeln!(out, "PASS")?,
            CaseOutcome::Failed(why) => writeln!(out, "FAIL ({why})")?,
            CaseOutcome::Skipped(why) => writeln!(out, "SKIP ({why})")?,
        }
        debug!(case = i + 1, name = %label, outcome = ?outcome, "Scripted case finished");
        summary.count(&outcome);
    }

    writeln!(
        out,
        "\nResults: {} passed, {} failed, {} skipped",
        summary.passed, summary.failed, summary.skipped
    )?;
    Ok(summary)
}

async fn run_case(session: &RunnerSession, raw: &Value) -> CaseOutcome {
    let case: TestCase = match serde_json::from_value(raw.clone()) {
        Ok(case) => case,
        Err(e) => return CaseOutcome::Failed(format!("malformed case: {e}")),
    };

    let hook: HookPoint = match case.hook.parse() {
        Ok(hook) => hook,
        Err(e) => return CaseOutcome::Skipped(e),
    };

    let call = match HookCall::decode(hook, &case.input) {
        Ok(call) => call,
        Err(e) => return CaseOutcome::Failed(format!("malformed {hook} input: {e}")),
    };

    match session.invoke(call).await {
        Ok(obs) if case.expect.is_met_by(&obs) => CaseOutcome::Passed,
        Ok(obs) => CaseOutcome::Failed(format!(
            "got allow={}, err={}",
            obs.allow,
            obs.error.as_deref().unwrap_or("none")
        )),
        Err(e) => CaseOutcome::Failed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn observed(allow: bool, error: Option<&str>) -> Observation {
        Observation {
            hook: HookPoint::Auth,
            allow,
            error: error.map(str::to_string),
            threat_score: 0,
            elapsed: Duration::ZERO,
            timed_out: false,
        }
    }

    #[test]
    fn test_expectation_matching() {
        let empty = Expectation::default();
        assert!(empty.is_met_by(&observed(false, Some("boom"))));

        let deny = Expectation {
            allow: Some(false),
            error: None,
        };
        assert!(deny.is_met_by(&observed(false, None)));
        assert!(!deny.is_met_by(&observed(true, None)));

        let err = Expectation {
            allow: None,
            error: Some("quota".into()),
        };
        assert!(err.is_met_by(&observed(true, Some("quota exceeded"))));
        assert!(!err.is_met_by(&observed(true, Some("other"))));
        assert!(!err.is_met_by(&observed(true, None)));
    }

    #[test]
    fn test_case_defaults() {
        let case: TestCase = serde_json::from_value(json!({"hook": "publish"})).expect("case");
        assert!(case.name.is_empty());
        assert!(case.input.is_null());
        assert!(case.expect.allow.is_none());
    }

    #[test]
    fn test_load_script_requires_array() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cases.json");
        std::fs::write(&path, br#"{"name": "not a list"}"#).expect("write");
        let err = load_script(&path).expect_err("object");
        assert_eq!(err.kind, ErrorKind::Serialization);

        std::fs::write(&path, br#"[{"hook": "auth"}, 42]"#).expect("write");
        assert_eq!(load_script(&path).expect("array").len(), 2);
    }

    #[test]
    fn test_summary() {
        let mut summary = ScriptSummary::default();
        summary.count(&CaseOutcome::Passed);
        summary.count(&CaseOutcome::Skipped("unknown hook: x".into()));
        assert!(summary.is_success());
        summary.count(&CaseOutcome::Failed("got allow=true".into()));
        assert!(!summary.is_success());
    }
}
