use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use reprod::dag::ScheduledJob;
use reprod::engine::{JobOutcome, RuntimeEvent};
use reprod::errors::{Error, Result};
use reprod::exec::{BoxFuture, ExecutorBackend};
use tokio::sync::mpsc;

/// A fake executor that:
/// - records which jobs were dispatched (uid, attempt)
/// - immediately reports `JobStarted` and then `JobCompleted` for each job,
///   using scripted outcomes per uid and `Succeeded` once the script runs out.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<(String, u32)>>>,
    outcomes: HashMap<String, VecDeque<JobOutcome>>,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: mpsc::Sender<RuntimeEvent>,
        executed: Arc<Mutex<Vec<(String, u32)>>>,
    ) -> Self {
        Self {
            runtime_tx,
            executed,
            outcomes: HashMap::new(),
        }
    }

    pub fn with_outcomes(mut self, uid: &str, outcomes: impl IntoIterator<Item = JobOutcome>) -> Self {
        self.outcomes
            .entry(uid.to_string())
            .or_default()
            .extend(outcomes);
        self
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_jobs(&mut self, jobs: Vec<ScheduledJob>) -> BoxFuture<'_, Result<()>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);

        let mut planned = Vec::with_capacity(jobs.len());
        for job in jobs {
            let outcome = self
                .outcomes
                .get_mut(&job.uid)
                .and_then(VecDeque::pop_front)
                .unwrap_or(JobOutcome::Succeeded);
            planned.push((job, outcome));
        }

        Box::pin(async move {
            for (job, outcome) in planned {
                executed.lock().unwrap().push((job.uid.clone(), job.attempt));

                tx.send(RuntimeEvent::JobStarted { uid: job.uid.clone() })
                    .await
                    .map_err(Error::from)?;
                tx.send(RuntimeEvent::JobCompleted {
                    uid: job.uid.clone(),
                    outcome,
                })
                .await
                .map_err(Error::from)?;
            }
            Ok(())
        })
    }
}
