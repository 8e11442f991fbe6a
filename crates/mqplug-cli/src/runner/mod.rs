//! Conformance runner: exercises one plugin artifact through the host
//! contract and reports what it observed.

pub mod call;
pub mod interactive;
pub mod script;
pub mod session;

pub use call::{HookCall, Observation};
pub use interactive::run_interactive;
pub use script::{CaseOutcome, ScriptSummary, TestCase, run_script};
pub use session::RunnerSession;
