// src/dag/state_manager.rs

//! Job state transitions for the scheduler.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::dag::job::{Job, JobId, ScheduledJob};
use crate::dag::JobGraph;
use crate::types::JobStatus;

/// Applies state transitions to the job table of one build.
pub struct StateManager<'a> {
    graph: &'a JobGraph,
    jobs: &'a mut HashMap<JobId, Job>,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a JobGraph, jobs: &'a mut HashMap<JobId, Job>) -> Self {
        Self { graph, jobs }
    }

    /// Mark every transitive dependent of `exhausted` as `Cancelled`.
    ///
    /// Returns the newly cancelled jobs. Dependents can never have been
    /// submitted, so only `Pending` jobs are affected.
    pub fn mark_dependents_cancelled(&mut self, exhausted: &str) -> Vec<JobId> {
        let mut stack: Vec<JobId> = self.graph.dependents_of(exhausted).to_vec();
        let mut newly_cancelled = Vec::new();

        while let Some(uid) = stack.pop() {
            let Some(job) = self.jobs.get_mut(&uid) else {
                warn!(uid = %uid, "dependent missing from job table");
                continue;
            };

            match job.status {
                JobStatus::Pending | JobStatus::Failed => {
                    job.status = JobStatus::Cancelled;
                    job.cancelled_by = Some(exhausted.to_string());
                    debug!(
                        uid = %uid,
                        label = %job.label,
                        cause = %exhausted,
                        "cancelling dependent of exhausted job"
                    );
                    newly_cancelled.push(uid.clone());
                    stack.extend(self.graph.dependents_of(&uid).iter().cloned());
                }
                JobStatus::Submitted | JobStatus::Running => {
                    warn!(
                        uid = %uid,
                        status = %job.status,
                        "dependent of exhausted job is active; leaving it alone"
                    );
                }
                JobStatus::Succeeded | JobStatus::Exhausted | JobStatus::Cancelled => {}
            }
        }

        newly_cancelled
    }

    /// Collect `Pending` jobs whose dependencies have all succeeded, in
    /// build order, mark them `Submitted` and count the attempt.
    pub fn collect_new_ready_jobs(&mut self) -> Vec<ScheduledJob> {
        let candidates: Vec<JobId> = {
            let ro = ReadOnlyStateManager::new(self.jobs);
            self.graph
                .jobs()
                .iter()
                .filter(|uid| {
                    self.jobs
                        .get(uid.as_str())
                        .is_some_and(|job| job.status == JobStatus::Pending && ro.deps_satisfied(job))
                })
                .cloned()
                .collect()
        };

        let mut ready = Vec::with_capacity(candidates.len());
        for uid in candidates {
            if let Some(job) = self.jobs.get_mut(&uid) {
                job.status = JobStatus::Submitted;
                job.attempts += 1;

                if job.attempts > 1 {
                    info!(uid = %uid, label = %job.label, attempt = job.attempts, "resubmitting job");
                } else {
                    info!(uid = %uid, label = %job.label, "submitting job");
                }

                ready.push(ScheduledJob::from_job(job));
            }
        }

        ready
    }

    pub fn all_jobs_terminal(&self) -> bool {
        ReadOnlyStateManager::new(self.jobs).all_jobs_terminal()
    }
}

/// Read-only checks over the job table.
pub struct ReadOnlyStateManager<'a> {
    jobs: &'a HashMap<JobId, Job>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(jobs: &'a HashMap<JobId, Job>) -> Self {
        Self { jobs }
    }

    /// All in-build dependencies of `job` have `Succeeded`.
    pub fn deps_satisfied(&self, job: &Job) -> bool {
        job.deps.iter().all(|dep| match self.jobs.get(dep) {
            Some(d) => d.status == JobStatus::Succeeded,
            None => {
                warn!(uid = %job.uid, dep = %dep, "dependency missing from job table");
                false
            }
        })
    }

    pub fn all_jobs_terminal(&self) -> bool {
        self.jobs.values().all(|job| job.status.is_terminal())
    }
}
