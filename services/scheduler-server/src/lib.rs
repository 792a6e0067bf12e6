//! Job scheduler server.
//!
//! This crate ships the `scheduler-server` binary. The library surface holds
//! the scheduling domain on top of `sched-repository`: scopes and their job
//! server sessions, submitted entities and kill jobs, the per-scope runnable
//! queue and the dispatcher that answers job server polls.

pub mod access;
pub mod api;
pub mod compaction;
pub mod config;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod liveness;
pub mod loader;
pub mod model;
pub mod repository;
pub mod scheduler;
pub mod scopes;
pub mod session;
pub mod starter;
pub mod state;
