//! Automation core
//!
//! The scheduler, orchestrator, executors, status tracking and event
//! plumbing that drive per-connection data-quality automation.

pub mod events;
pub mod executor;
pub mod lifecycle;
pub mod notifier;
pub mod orchestrator;
pub mod schedule;
pub mod status;
pub mod types;
