// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::{ScheduledJob, Scheduler};
use crate::errors::Result;
use crate::exec::ExecutorBackend;

use super::core::CoreRuntime;
use super::{CoreCommand, RuntimeEvent};

/// Drives the scheduler in response to `RuntimeEvent`s and delegates job
/// submission to an `ExecutorBackend`.
///
/// All build semantics live in `CoreRuntime`; this struct only reads events
/// from the channel and dispatches jobs.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(core: CoreRuntime, event_rx: mpsc::Receiver<RuntimeEvent>, executor: E) -> Self {
        Self {
            core,
            event_rx,
            executor,
        }
    }

    /// Main event loop.
    ///
    /// Runs until every job is terminal, a shutdown is requested or the event
    /// channel closes, and hands back the scheduler for reporting.
    pub async fn run(mut self) -> Result<Scheduler> {
        info!(jobs = self.core.scheduler().len(), "build runtime started");

        let step = self.core.start();
        let mut keep_running = step.keep_running;
        for command in step.commands {
            self.execute_command(command).await?;
        }

        while keep_running {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    warn!("runtime event channel closed before the build finished");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            if matches!(event, RuntimeEvent::ShutdownRequested) {
                info!("shutdown requested; abandoning remaining jobs");
            }

            let step = self.core.step(event);
            for command in step.commands {
                self.execute_command(command).await?;
            }
            keep_running = step.keep_running;
        }

        info!(finished = self.core.is_finished(), "runtime exiting");
        Ok(self.core.into_scheduler())
    }

    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchJobs(jobs) => self.spawn_ready(jobs).await?,
            CoreCommand::RequestExit => debug!("core issued RequestExit command"),
        }
        Ok(())
    }

    async fn spawn_ready(&mut self, jobs: Vec<ScheduledJob>) -> Result<()> {
        if jobs.is_empty() {
            return Ok(());
        }

        let labels: Vec<_> = jobs.iter().map(|j| j.label.as_str()).collect();
        debug!(?labels, "dispatching ready jobs");

        self.executor.spawn_ready_jobs(jobs).await
    }
}
