//! # mqplug-cli
//!
//! Library half of the `mqplug` binary:
//!
//! - [`runner`] drives a single plugin through its lifecycle, either from an
//!   interactive prompt or from a scripted JSON test file
//! - [`builder`] compiles a plugin crate and writes its build sidecar

pub mod builder;
pub mod runner;

pub use runner::{HookCall, Observation, RunnerSession, ScriptSummary};
