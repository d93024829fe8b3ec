// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! The core consumes [`RuntimeEvent`]s and produces a list of commands
//! describing what the IO shell should do next. It has no channels, no Tokio
//! types and performs no IO, so it can be driven step by step in tests.

use crate::dag::Scheduler;
use crate::engine::event_handlers::{handle_job_completion, handle_job_started, handle_start, CoreStep};
use crate::engine::RuntimeEvent;

#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn into_scheduler(self) -> Scheduler {
        self.scheduler
    }

    /// Initial step: dispatch the jobs that have no pending dependencies.
    pub fn start(&mut self) -> CoreStep {
        handle_start(&mut self.scheduler)
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::JobStarted { uid } => handle_job_started(&mut self.scheduler, &uid),
            RuntimeEvent::JobCompleted { uid, outcome } => {
                handle_job_completion(&mut self.scheduler, &uid, outcome)
            }
            RuntimeEvent::ShutdownRequested => CoreStep {
                commands: Vec::new(),
                keep_running: false,
            },
        }
    }
}
