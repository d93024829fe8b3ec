// src/dag/job.rs

//! Job metadata and scheduled job types.

use std::sync::Arc;

use crate::graph::BuildNode;
use crate::types::JobStatus;

/// Canonical job key: the uid of the wrapped build node.
pub type JobId = String;

/// Scheduling unit wrapping one build-order node.
#[derive(Debug, Clone)]
pub struct Job {
    pub uid: JobId,
    pub label: String,
    pub node: Arc<BuildNode>,
    /// Direct dependencies that are themselves part of this build.
    pub deps: Vec<JobId>,
    pub status: JobStatus,
    /// Number of times the job has been submitted.
    pub attempts: u32,
    pub last_error: Option<String>,
    /// The exhausted job whose failure cancelled this one.
    pub cancelled_by: Option<JobId>,
}

impl Job {
    pub fn new(uid: JobId, node: Arc<BuildNode>, deps: Vec<JobId>) -> Self {
        Self {
            label: node.label().to_string(),
            uid,
            node,
            deps,
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
            cancelled_by: None,
        }
    }
}

/// A job the scheduler wants the executor to submit now.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub uid: JobId,
    pub label: String,
    pub node: Arc<BuildNode>,
    /// 1-based attempt number of this submission.
    pub attempt: u32,
}

impl ScheduledJob {
    pub fn from_job(job: &Job) -> Self {
        Self {
            uid: job.uid.clone(),
            label: job.label.clone(),
            node: Arc::clone(&job.node),
            attempt: job.attempts,
        }
    }
}
