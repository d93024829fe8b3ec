// src/exec/mod.rs

//! Job execution layer.
//!
//! - [`compute`] defines the compute-environment collaborator
//!   ([`ComputeEnv`]) and the timeouts used when talking to it.
//! - [`backend`] provides the `ExecutorBackend` trait the runtime talks to,
//!   and [`ComputeBackend`], which forwards jobs to a compute environment.
//! - [`executor_loop`] owns the background loop that enforces single flight
//!   per job uid.
//! - [`job_runner`] drives one attempt: submit, poll, report.
//! - [`local`] and [`shell`] implement a compute environment on the local
//!   machine that runs shell transforms.

pub mod backend;
pub mod compute;
pub mod executor_loop;
pub mod job_runner;
pub mod local;
pub mod shell;

pub use backend::{BoxFuture, ComputeBackend, ExecutorBackend};
pub use compute::{ComputeEnv, ExecTimeouts, JobHandle, JobResult, RemoteStatus, TaskTemplate};
pub use executor_loop::spawn_executor;
pub use local::LocalComputeEnv;
pub use shell::ShellRunner;
