// src/engine/mod.rs

//! Orchestration engine for a build.
//!
//! This module ties together:
//! - the job scheduler
//! - the main runtime event loop that reacts to:
//!   - job start reports from the compute environment
//!   - job completion events
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::fmt;

use crate::dag::JobId;
use crate::errors::ReprodError;

/// How a failed attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network/storage trouble or a timeout talking to the environment.
    TransientIo,
    /// The job itself ran and failed.
    Execution,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::TransientIo,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Execution,
            message: message.into(),
        }
    }

    /// Classify an error raised while running a job.
    pub fn from_error(err: &ReprodError) -> Self {
        if err.is_transient() {
            Self::transient(err.to_string())
        } else {
            Self::execution(err.to_string())
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::TransientIo => write!(f, "transient IO failure: {}", self.message),
            FailureKind::Execution => write!(f, "{}", self.message),
        }
    }
}

/// Outcome of one job attempt for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(JobFailure),
}

/// Events flowing into the runtime from executors and signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// The environment accepted a submission and the job is running.
    JobStarted { uid: JobId },
    /// A job attempt finished with a concrete outcome.
    JobCompleted { uid: JobId, outcome: JobOutcome },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
