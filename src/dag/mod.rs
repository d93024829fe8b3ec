// src/dag/mod.rs

//! Job scheduling over a build order.
//!
//! - [`graph`] keeps the in-build dependency edges between jobs.
//! - [`scheduler`] contains the retry/cancel state machine that decides
//!   which jobs are ready to submit.
//! - [`job`] provides job metadata and scheduled job types.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] applies the individual state transitions.

pub mod graph;
pub mod job;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;

pub use graph::JobGraph;
pub use job::{Job, JobId, ScheduledJob};
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
