// src/build.rs

//! Build driver: build order → validation → provisioning → scheduling →
//! report.

use std::sync::Arc;

use anyhow::anyhow;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::dag::Scheduler;
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent};
use crate::errors::{ReprodError, Result};
use crate::exec::job_runner::bounded;
use crate::exec::{ComputeBackend, ComputeEnv, ExecTimeouts, TaskTemplate};
use crate::graph::{order, BuildGraph, BuildNode, Node};
use crate::types::JobStatus;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Tags provisioned resources so later runs can reuse them.
    pub run_name: String,
    pub max_attempts: u32,
    pub timeouts: ExecTimeouts,
}

impl BuildOptions {
    pub fn new(run_name: impl Into<String>) -> Self {
        Self {
            run_name: run_name.into(),
            max_attempts: 2,
            timeouts: ExecTimeouts::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub uid: String,
    pub label: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub cancelled_by: Option<String>,
}

/// Job counts among the part of the build one target waits on.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub label: String,
    pub uid: String,
    /// The target's output already existed; nothing was scheduled for it.
    pub up_to_date: bool,
    pub total: usize,
    pub succeeded: usize,
    pub exhausted: usize,
    pub cancelled: usize,
    /// Jobs that never reached a terminal state (interrupted build).
    pub incomplete: usize,
}

impl TargetReport {
    pub fn is_success(&self) -> bool {
        self.exhausted == 0 && self.cancelled == 0 && self.incomplete == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub run_name: String,
    pub targets: Vec<TargetReport>,
    pub jobs: Vec<JobReport>,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.targets.iter().all(TargetReport::is_success)
    }

    pub fn job(&self, uid: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.uid == uid)
    }

    /// Turn a failed build into the error that best explains it.
    pub fn ensure_success(&self) -> Result<()> {
        if let Some(job) = self.jobs.iter().find(|j| j.status == JobStatus::Exhausted) {
            return Err(ReprodError::Exhausted {
                uid: job.uid.clone(),
                attempts: job.attempts,
                last_error: job.last_error.clone().unwrap_or_default(),
            });
        }
        if let Some(job) = self.jobs.iter().find(|j| j.status == JobStatus::Cancelled) {
            return Err(ReprodError::Cancelled {
                uid: job.uid.clone(),
                cause: job.cancelled_by.clone().unwrap_or_default(),
            });
        }
        let incomplete = self.jobs.iter().filter(|j| !j.status.is_terminal()).count();
        if incomplete > 0 {
            return Err(ReprodError::Other(anyhow!(
                "build interrupted with {incomplete} job(s) unfinished"
            )));
        }
        Ok(())
    }
}

/// Check every build-order node before anything is provisioned.
///
/// An external file in the build order is one whose object does not exist.
pub fn validate_build_order<C: ComputeEnv + ?Sized>(order: &[Arc<BuildNode>], env: &C) -> Result<()> {
    for node in order {
        match node.data() {
            Node::External(file) => {
                return Err(ReprodError::MissingInput(file.location.clone()));
            }
            Node::Transform(_) => {
                let template = TaskTemplate::from_node(node)?;
                if let Err(reason) = env.is_compatible(&template) {
                    return Err(ReprodError::IncompatibleTask {
                        uid: template.uid,
                        env: env.name().to_string(),
                        reason,
                    });
                }
            }
            Node::Target(_) => {}
        }
    }
    Ok(())
}

/// Build every target of `graph` that is not already available.
pub async fn run_build<C: ComputeEnv>(
    graph: &BuildGraph,
    env: Arc<C>,
    options: &BuildOptions,
) -> Result<BuildReport> {
    let build_order = graph.build_order()?;
    validate_build_order(&build_order, env.as_ref())?;

    let scheduler = Scheduler::new(&build_order, options.max_attempts)?;

    if build_order.is_empty() {
        info!(run_name = %options.run_name, "all targets up to date; nothing to do");
        return report(graph, &scheduler, &options.run_name);
    }

    info!(
        run_name = %options.run_name,
        env = env.name(),
        jobs = build_order.len(),
        "provisioning compute environment"
    );
    bounded(options.timeouts.provision, "create", env.create(&options.run_name)).await?;
    bounded(options.timeouts.provision, "wait_ready", env.wait_ready()).await?;

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);
    let executor = ComputeBackend::new(
        Arc::clone(&env),
        graph.hooks().to_vec(),
        options.timeouts,
        rt_tx.clone(),
    );

    // Ctrl-C → graceful shutdown.
    let ctrl_c = {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        })
    };
    drop(rt_tx);

    let runtime = Runtime::new(CoreRuntime::new(scheduler), rt_rx, executor);
    let result = runtime.run().await;
    ctrl_c.abort();

    let scheduler = result?;
    let report = report(graph, &scheduler, &options.run_name)?;
    log_report(&report);
    Ok(report)
}

fn report(graph: &BuildGraph, scheduler: &Scheduler, run_name: &str) -> Result<BuildReport> {
    let jobs: Vec<JobReport> = scheduler
        .jobs()
        .map(|job| JobReport {
            uid: job.uid.clone(),
            label: job.label.clone(),
            status: job.status,
            attempts: job.attempts,
            last_error: job.last_error.clone(),
            cancelled_by: job.cancelled_by.clone(),
        })
        .collect();

    let mut targets = Vec::with_capacity(graph.targets().len());
    for target in graph.targets() {
        let uid = target.uid()?.to_string();

        // Everything this target waits on: walk down, stopping at nodes that
        // were never scheduled because their output already existed.
        let closure = order::postorder(std::slice::from_ref(target), |node| {
            Ok(scheduler.job(node.uid()?).is_none())
        })?;

        let mut entry = TargetReport {
            label: target.label().to_string(),
            up_to_date: closure.is_empty(),
            uid,
            total: closure.len(),
            succeeded: 0,
            exhausted: 0,
            cancelled: 0,
            incomplete: 0,
        };
        for node in &closure {
            match scheduler.status_of(node.uid()?) {
                Some(JobStatus::Succeeded) => entry.succeeded += 1,
                Some(JobStatus::Exhausted) => entry.exhausted += 1,
                Some(JobStatus::Cancelled) => entry.cancelled += 1,
                _ => entry.incomplete += 1,
            }
        }
        targets.push(entry);
    }

    Ok(BuildReport {
        run_name: run_name.to_string(),
        targets,
        jobs,
    })
}

fn log_report(report: &BuildReport) {
    for target in &report.targets {
        if target.is_success() {
            info!(
                target = %target.label,
                succeeded = target.succeeded,
                "target built"
            );
        } else {
            warn!(
                target = %target.label,
                succeeded = target.succeeded,
                exhausted = target.exhausted,
                cancelled = target.cancelled,
                incomplete = target.incomplete,
                "target failed"
            );
        }
    }
}
