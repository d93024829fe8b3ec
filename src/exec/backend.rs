// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender,
//! so tests can swap in a fake while production goes through
//! [`ComputeBackend`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::dag::ScheduledJob;
use crate::engine::RuntimeEvent;
use crate::errors::{Error, Result};

use super::compute::{ComputeEnv, ExecTimeouts};
use super::executor_loop::spawn_executor;

/// Boxed `Send` future, used at the async trait seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait abstracting how scheduled jobs are executed.
pub trait ExecutorBackend: Send {
    /// Dispatch the given jobs for execution.
    ///
    /// Implementations report back through `RuntimeEvent`s: `JobStarted`
    /// once the job runs and `JobCompleted` with its outcome.
    fn spawn_ready_jobs(&mut self, jobs: Vec<ScheduledJob>) -> BoxFuture<'_, Result<()>>;
}

/// Executor backend that submits jobs to a [`ComputeEnv`].
///
/// Wraps the background loop from [`spawn_executor`]; `spawn_ready_jobs`
/// just forwards jobs over an mpsc channel.
pub struct ComputeBackend {
    tx: mpsc::Sender<ScheduledJob>,
}

impl ComputeBackend {
    /// Spawn the executor loop immediately.
    pub fn new<C: ComputeEnv>(
        env: Arc<C>,
        hooks: Vec<String>,
        timeouts: ExecTimeouts,
        runtime_tx: mpsc::Sender<RuntimeEvent>,
    ) -> Self {
        let tx = spawn_executor(env, hooks, timeouts, runtime_tx);
        Self { tx }
    }
}

impl ExecutorBackend for ComputeBackend {
    fn spawn_ready_jobs(&mut self, jobs: Vec<ScheduledJob>) -> BoxFuture<'_, Result<()>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for job in jobs {
                tx.send(job).await.map_err(Error::from)?;
            }
            Ok(())
        })
    }
}
