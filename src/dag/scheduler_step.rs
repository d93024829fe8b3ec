// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::job::{JobId, ScheduledJob};

/// Structured result of a single scheduler "step".
///
/// Tests use this to step the scheduler by hand and assert on what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Jobs that became ready for submission (including resubmissions).
    pub newly_scheduled: Vec<ScheduledJob>,
    /// Jobs that ran out of attempts in this step.
    pub newly_exhausted: Vec<JobId>,
    /// Jobs cancelled in this step because an upstream job was exhausted.
    pub newly_cancelled: Vec<JobId>,
    /// Whether every job reached a terminal state in this step.
    pub run_just_finished: bool,
}
