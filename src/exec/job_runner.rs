// src/exec/job_runner.rs

//! Drives a single job attempt against a compute environment.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info};

use crate::dag::ScheduledJob;
use crate::engine::{JobFailure, JobOutcome, RuntimeEvent};
use crate::errors::{ReprodError, Result};
use crate::exec::compute::{ComputeEnv, ExecTimeouts, RemoteStatus, TaskTemplate};
use crate::jobspec::JobDescriptor;

/// Run one attempt of `job`, reporting `JobStarted`, and return its outcome.
///
/// Jobs that need no submission (targets) complete immediately. Any error
/// talking to the environment becomes a failed outcome; timeouts and IO
/// errors are classified as transient. The caller reports completion with
/// [`report_completion`].
pub async fn run_job<C: ComputeEnv + ?Sized>(
    job: &ScheduledJob,
    env: &C,
    hooks: &[String],
    timeouts: ExecTimeouts,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) -> JobOutcome {
    if !TaskTemplate::needs_submission(&job.node) {
        debug!(uid = %job.uid, label = %job.label, "job needs no submission; completing locally");
        let _ = runtime_tx
            .send(RuntimeEvent::JobStarted {
                uid: job.uid.clone(),
            })
            .await;
        return JobOutcome::Succeeded;
    }

    match run_job_inner(job, env, hooks, timeouts, runtime_tx).await {
        Ok(()) => JobOutcome::Succeeded,
        Err(err) => {
            error!(uid = %job.uid, attempt = job.attempt, error = %err, "job attempt failed");
            JobOutcome::Failed(JobFailure::from_error(&err))
        }
    }
}

/// Send `JobCompleted` for `uid`.
pub async fn report_completion(
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    uid: String,
    outcome: JobOutcome,
) {
    if runtime_tx
        .send(RuntimeEvent::JobCompleted {
            uid: uid.clone(),
            outcome,
        })
        .await
        .is_err()
    {
        debug!(uid = %uid, "runtime gone before job completion could be reported");
    }
}

async fn run_job_inner<C: ComputeEnv + ?Sized>(
    job: &ScheduledJob,
    env: &C,
    hooks: &[String],
    timeouts: ExecTimeouts,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) -> Result<()> {
    let descriptor = JobDescriptor::from_node(&job.node, hooks)?;

    info!(
        uid = %job.uid,
        label = %job.label,
        attempt = job.attempt,
        env = env.name(),
        "submitting job to compute environment"
    );
    let handle = bounded(timeouts.submit, "submit", env.submit(descriptor)).await?;

    let _ = runtime_tx
        .send(RuntimeEvent::JobStarted {
            uid: job.uid.clone(),
        })
        .await;

    loop {
        match bounded(timeouts.poll, "poll", env.poll(&handle)).await? {
            RemoteStatus::Queued | RemoteStatus::Running => {
                sleep(timeouts.poll_interval).await;
            }
            RemoteStatus::Succeeded => break,
            RemoteStatus::Failed(message) => {
                return Err(ReprodError::JobExecutionFailed {
                    uid: job.uid.clone(),
                    message,
                });
            }
        }
    }

    let result = bounded(timeouts.poll, "result", env.result(&handle)).await?;
    info!(uid = %job.uid, output = %result.output, "job finished");
    Ok(())
}

/// Await `fut` for at most `limit`; running out of time is a transient failure.
pub async fn bounded<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(ReprodError::Timeout(limit, what.to_string())),
    }
}
