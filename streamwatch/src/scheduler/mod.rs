//! Scheduler module driving the reconciliation loop.
//!
//! The Scheduler is responsible for:
//! - Running one monitor tick per check interval
//! - Never overlapping ticks
//! - Letting an in-flight tick finish on shutdown

mod service;

pub use service::{Scheduler, SchedulerConfig};
