// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use crate::dag::{ScheduledJob, Scheduler};
use crate::engine::JobOutcome;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these jobs to the executor.
    DispatchJobs(Vec<ScheduledJob>),
    /// Every job is terminal; the shell can stop.
    RequestExit,
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Seed the build: dispatch every job that is ready from the start.
pub fn handle_start(scheduler: &mut Scheduler) -> CoreStep {
    let ready = scheduler.start();
    finish_step(scheduler, ready)
}

pub fn handle_job_started(scheduler: &mut Scheduler, uid: &str) -> CoreStep {
    scheduler.handle_started(uid);
    CoreStep {
        commands: Vec::new(),
        keep_running: true,
    }
}

pub fn handle_job_completion(scheduler: &mut Scheduler, uid: &str, outcome: JobOutcome) -> CoreStep {
    let ready = scheduler.handle_completion(uid, outcome);
    finish_step(scheduler, ready)
}

fn finish_step(scheduler: &Scheduler, ready: Vec<ScheduledJob>) -> CoreStep {
    let mut commands = Vec::new();
    if !ready.is_empty() {
        commands.push(CoreCommand::DispatchJobs(ready));
    }

    let keep_running = !scheduler.is_finished();
    if !keep_running {
        commands.push(CoreCommand::RequestExit);
    }

    CoreStep {
        commands,
        keep_running,
    }
}
