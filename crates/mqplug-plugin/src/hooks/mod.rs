//! Hook system: hook points, the per-plugin dispatcher, and client lanes.

pub mod definitions;
pub mod dispatcher;
mod lanes;

pub use definitions::{DecisionOutcome, HookPoint};
pub use dispatcher::{DispatchError, HookDispatcher, NotificationHandle, NotificationStatus};
