//! Threshold alerting with optional confirmation delay, reminders and recovery.
pub mod engine;
pub mod messages;
pub mod registry;
mod reminder;

pub use engine::{CheckOutcome, ThresholdEngine};
pub use registry::{AlertState, MonitoringRegistry, MonitoringStatus};
