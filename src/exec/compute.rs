// src/exec/compute.rs

//! Compute-environment collaborator.

use std::time::Duration;

use serde_json::Value;

use crate::errors::Result;
use crate::exec::BoxFuture;
use crate::graph::{BuildNode, Node};
use crate::jobspec::JobDescriptor;

/// What an environment needs to know to decide whether it can run a job.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskTemplate {
    pub uid: String,
    pub label: String,
    pub kind: &'static str,
    pub op: Option<String>,
    pub version: Option<String>,
    pub params: Value,
}

impl TaskTemplate {
    pub fn from_node(node: &BuildNode) -> Result<Self> {
        let transform = node.data().as_transform();
        Ok(Self {
            uid: node.uid()?.to_string(),
            label: node.label().to_string(),
            kind: node.data().kind(),
            op: transform.map(|t| t.op.clone()),
            version: transform.map(|t| t.version.clone()),
            params: transform.map(|t| t.params.clone()).unwrap_or(Value::Null),
        })
    }

    /// Whether the job needs the environment at all.
    ///
    /// Targets complete as soon as their wrapped node has; external files
    /// are only ever checked, never produced.
    pub fn needs_submission(node: &BuildNode) -> bool {
        matches!(node.data(), Node::Transform(_))
    }
}

/// Opaque handle for one submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub id: String,
    pub uid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Queued,
    Running,
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobResult {
    pub manifest: Value,
    pub output: String,
}

/// A remote (or local) place where jobs run.
///
/// Provisioning is scoped to a run name: calling `create` again with the
/// same name reuses what an earlier invocation set up.
pub trait ComputeEnv: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// `Err(reason)` if this environment cannot run the task.
    fn is_compatible(&self, template: &TaskTemplate) -> std::result::Result<(), String>;

    fn create<'a>(&'a self, run_name: &'a str) -> BoxFuture<'a, Result<()>>;

    fn wait_ready(&self) -> BoxFuture<'_, Result<()>>;

    fn submit(&self, descriptor: JobDescriptor) -> BoxFuture<'_, Result<JobHandle>>;

    fn poll<'a>(&'a self, handle: &'a JobHandle) -> BoxFuture<'a, Result<RemoteStatus>>;

    fn result<'a>(&'a self, handle: &'a JobHandle) -> BoxFuture<'a, Result<JobResult>>;
}

/// Bounds on every network-facing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecTimeouts {
    pub submit: Duration,
    pub poll: Duration,
    pub poll_interval: Duration,
    pub provision: Duration,
}

impl Default for ExecTimeouts {
    fn default() -> Self {
        Self {
            submit: Duration::from_secs(30),
            poll: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            provision: Duration::from_secs(5 * 60),
        }
    }
}
