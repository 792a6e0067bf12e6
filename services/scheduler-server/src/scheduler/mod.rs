//! Scheduling: the default pass and its background worker.

mod pass;
pub mod worker;

pub use pass::{PassStats, QueueScheduler};
pub use worker::{SchedulerWorker, SchedulerWorkerConfig};
