// src/dag/scheduler.rs

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::graph::JobGraph;
use crate::dag::job::{Job, JobId, ScheduledJob};
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{ReadOnlyStateManager, StateManager};
use crate::engine::{FailureKind, JobOutcome};
use crate::errors::{ReprodError, Result};
use crate::graph::BuildNode;
use crate::types::JobStatus;

/// Retry/cancel state machine over the jobs of one build.
///
/// It is responsible for:
/// - submitting a job once all its in-build dependencies have succeeded
/// - sending failed jobs back to `Pending` while attempts remain
/// - exhausting jobs that ran out of attempts and cancelling their dependents
/// - noticing when every job is terminal
#[derive(Debug)]
pub struct Scheduler {
    graph: JobGraph,
    jobs: HashMap<JobId, Job>,
    max_attempts: u32,
    started: bool,
    finished: bool,
}

impl Scheduler {
    /// Construct a scheduler over a build order (dependencies first).
    pub fn new(order: &[Arc<BuildNode>], max_attempts: u32) -> Result<Self> {
        if max_attempts == 0 {
            return Err(ReprodError::ConfigError(
                "max_attempts must be >= 1 (got 0)".to_string(),
            ));
        }

        let graph = JobGraph::from_build_order(order)?;
        let mut jobs = HashMap::with_capacity(order.len());
        for (node, uid) in order.iter().zip(graph.jobs()) {
            let deps = graph.dependencies_of(uid).to_vec();
            jobs.insert(uid.clone(), Job::new(uid.clone(), Arc::clone(node), deps));
        }

        Ok(Self {
            graph,
            jobs,
            max_attempts,
            started: false,
            finished: false,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn job(&self, uid: &str) -> Option<&Job> {
        self.jobs.get(uid)
    }

    pub fn status_of(&self, uid: &str) -> Option<JobStatus> {
        self.jobs.get(uid).map(|j| j.status)
    }

    /// Jobs in build order.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.graph.jobs().iter().filter_map(|uid| self.jobs.get(uid))
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Whether the in-build dependencies of `uid` have all succeeded.
    ///
    /// Returns `None` if the job is unknown.
    pub fn deps_satisfied(&self, uid: &str) -> Option<bool> {
        let job = self.jobs.get(uid)?;
        Some(ReadOnlyStateManager::new(&self.jobs).deps_satisfied(job))
    }

    /// Submit the initial set of ready jobs (production API).
    pub fn start(&mut self) -> Vec<ScheduledJob> {
        self.start_step_internal().newly_scheduled
    }

    /// Record that a submitted job is running on the environment.
    pub fn handle_started(&mut self, uid: &str) {
        match self.jobs.get_mut(uid) {
            Some(job) if job.status == JobStatus::Submitted => {
                job.status = JobStatus::Running;
                debug!(uid = %uid, attempt = job.attempts, "job running");
            }
            Some(job) => {
                warn!(uid = %uid, status = %job.status, "start report for job that is not submitted; ignoring");
            }
            None => warn!(uid = %uid, "start report for unknown job; ignoring"),
        }
    }

    /// Handle a job outcome (production API).
    pub fn handle_completion(&mut self, uid: &str, outcome: JobOutcome) -> Vec<ScheduledJob> {
        self.completion_step_internal(uid, outcome).newly_scheduled
    }

    /// Manual-step variant of `start`.
    pub fn step_start(&mut self) -> SchedulerStep {
        self.start_step_internal()
    }

    /// Manual-step variant of `handle_completion`.
    pub fn step_completion(&mut self, uid: &str, outcome: JobOutcome) -> SchedulerStep {
        self.completion_step_internal(uid, outcome)
    }

    fn maybe_finish(&mut self) -> bool {
        if self.finished {
            return false;
        }

        let manager = StateManager::new(&self.graph, &mut self.jobs);
        if manager.all_jobs_terminal() {
            info!(jobs = self.jobs.len(), "scheduler: all jobs terminal");
            self.finished = true;
            true
        } else {
            false
        }
    }

    fn start_step_internal(&mut self) -> SchedulerStep {
        if self.started {
            warn!("scheduler already started; ignoring");
            return SchedulerStep::default();
        }
        self.started = true;

        let mut manager = StateManager::new(&self.graph, &mut self.jobs);
        let newly_scheduled = manager.collect_new_ready_jobs();
        let run_just_finished = self.maybe_finish();

        SchedulerStep {
            newly_scheduled,
            run_just_finished,
            ..SchedulerStep::default()
        }
    }

    fn completion_step_internal(&mut self, uid: &str, outcome: JobOutcome) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        let max_attempts = self.max_attempts;

        let Some(job) = self.jobs.get_mut(uid) else {
            warn!(uid = %uid, "completion for unknown job; ignoring");
            return step;
        };

        if !job.status.is_active() {
            warn!(uid = %uid, status = %job.status, "completion for job that is not active; ignoring");
            return step;
        }

        match outcome {
            JobOutcome::Succeeded => {
                job.status = JobStatus::Succeeded;
                info!(uid = %uid, label = %job.label, attempts = job.attempts, "job succeeded");
            }
            JobOutcome::Failed(failure) => {
                job.status = JobStatus::Failed;
                job.last_error = Some(failure.to_string());

                if job.attempts < max_attempts {
                    job.status = JobStatus::Pending;
                    warn!(
                        uid = %uid,
                        label = %job.label,
                        attempt = job.attempts,
                        max_attempts,
                        transient = failure.kind == FailureKind::TransientIo,
                        error = %failure.message,
                        "job failed; retrying"
                    );
                } else {
                    job.status = JobStatus::Exhausted;
                    warn!(
                        uid = %uid,
                        label = %job.label,
                        attempts = job.attempts,
                        error = %failure.message,
                        "job exhausted its attempts; cancelling dependents"
                    );
                    step.newly_exhausted.push(uid.to_string());
                    let mut manager = StateManager::new(&self.graph, &mut self.jobs);
                    step.newly_cancelled = manager.mark_dependents_cancelled(uid);
                }
            }
        }

        let mut manager = StateManager::new(&self.graph, &mut self.jobs);
        step.newly_scheduled = manager.collect_new_ready_jobs();
        step.run_just_finished = self.maybe_finish();
        step
    }
}
