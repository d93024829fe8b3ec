// src/exec/executor_loop.rs

//! Background loop that hands scheduled jobs to job runners.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::dag::ScheduledJob;
use crate::engine::RuntimeEvent;
use crate::exec::compute::{ComputeEnv, ExecTimeouts};
use crate::exec::job_runner::{report_completion, run_job};

type InFlight = Arc<Mutex<HashSet<String>>>;

fn in_flight(set: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Spawn the background executor loop.
///
/// Each scheduled job runs in its own Tokio task, and per uid there is
/// never more than one attempt in flight: a job that arrives while an
/// earlier attempt is still running is dropped with a warning. A runner
/// releases its uid before it reports completion, so the retry the
/// scheduler sends in response always finds the uid free.
///
/// When the returned sender is dropped the loop aborts whatever is still in
/// flight.
pub fn spawn_executor<C: ComputeEnv>(
    env: Arc<C>,
    hooks: Vec<String>,
    timeouts: ExecTimeouts,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> mpsc::Sender<ScheduledJob> {
    let (tx, mut rx) = mpsc::channel::<ScheduledJob>(32);
    let hooks = Arc::new(hooks);

    tokio::spawn(async move {
        info!(env = env.name(), "executor loop started");

        let active: InFlight = Arc::default();
        let mut tasks = JoinSet::new();

        while let Some(job) = rx.recv().await {
            while tasks.try_join_next().is_some() {}

            let claimed = in_flight(&active).insert(job.uid.clone());
            if !claimed {
                warn!(
                    uid = %job.uid,
                    attempt = job.attempt,
                    "job already in flight; ignoring duplicate submission"
                );
                continue;
            }

            let env = Arc::clone(&env);
            let hooks = Arc::clone(&hooks);
            let active = Arc::clone(&active);
            let rt_tx = runtime_tx.clone();

            tasks.spawn(async move {
                let outcome = run_job(&job, env.as_ref(), &hooks, timeouts, &rt_tx).await;
                in_flight(&active).remove(&job.uid);
                report_completion(&rt_tx, job.uid.clone(), outcome).await;
                debug!(uid = %job.uid, "job runner finished");
            });
        }

        let remaining = in_flight(&active).len();
        if remaining > 0 {
            info!(in_flight = remaining, "executor channel closed; aborting in-flight jobs");
        }
        tasks.abort_all();
        info!("executor loop finished");
    });

    tx
}
