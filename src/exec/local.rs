// src/exec/local.rs

//! Compute environment that runs shell transforms on the local machine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::errors::{ReprodError, Result};
use crate::exec::compute::{ComputeEnv, JobHandle, JobResult, RemoteStatus, TaskTemplate};
use crate::exec::shell::{ShellRunner, SHELL_OP};
use crate::exec::BoxFuture;
use crate::jobspec::{self, JobDescriptor};
use crate::storage::FsStorage;

/// Directory under the storage root holding per-run scratch space.
pub const RUNS_DIR: &str = ".runs";

/// Local compute environment.
///
/// `create(run_name)` provisions `<storage_root>/.runs/<run_name>`, which
/// later invocations with the same run name reuse. Submitted jobs run as
/// Tokio tasks through [`jobspec::execute`] with a [`ShellRunner`], using
/// the run directory as working directory.
#[derive(Debug)]
pub struct LocalComputeEnv {
    storage: FsStorage,
    run_dir: Mutex<Option<PathBuf>>,
    jobs: Mutex<HashMap<String, Arc<Mutex<RemoteStatus>>>>,
    counter: AtomicU64,
}

impl LocalComputeEnv {
    /// The storage root is made absolute so jobs can change directory.
    pub fn new(storage: &FsStorage) -> Result<Self> {
        let root = std::path::absolute(storage.root())?;
        Ok(Self {
            storage: FsStorage::new(root),
            run_dir: Mutex::new(None),
            jobs: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
        })
    }

    pub fn storage(&self) -> &FsStorage {
        &self.storage
    }

    /// Scratch directory of the provisioned run, if any.
    pub fn run_dir(&self) -> Option<PathBuf> {
        self.run_dir.lock().ok().and_then(|guard| guard.clone())
    }

    fn provisioned_dir(&self) -> Result<PathBuf> {
        self.run_dir().ok_or_else(|| {
            ReprodError::ConfigError("local compute environment has not been created".to_string())
        })
    }

    fn status_cell(&self, handle: &JobHandle) -> Result<Arc<Mutex<RemoteStatus>>> {
        let jobs = self
            .jobs
            .lock()
            .map_err(|_| ReprodError::TransientIo("local job table poisoned".to_string()))?;
        jobs.get(&handle.id)
            .cloned()
            .ok_or_else(|| ReprodError::JobExecutionFailed {
                uid: handle.uid.clone(),
                message: format!("unknown job handle {}", handle.id),
            })
    }

    fn create_run_dir(&self, run_name: &str) -> Result<()> {
        let dir = self.storage.root().join(RUNS_DIR).join(run_name);
        if dir.is_dir() {
            info!(run_name, dir = %dir.display(), "reusing existing run directory");
        } else {
            std::fs::create_dir_all(&dir)?;
            info!(run_name, dir = %dir.display(), "created run directory");
        }
        if let Ok(mut guard) = self.run_dir.lock() {
            *guard = Some(dir);
        }
        Ok(())
    }

    fn submit_inner(&self, descriptor: JobDescriptor) -> Result<JobHandle> {
        let workdir = self.provisioned_dir()?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = JobHandle {
            id: format!("local-{n}"),
            uid: descriptor.uid.clone(),
        };

        let status = Arc::new(Mutex::new(RemoteStatus::Queued));
        self.jobs
            .lock()
            .map_err(|_| ReprodError::TransientIo("local job table poisoned".to_string()))?
            .insert(handle.id.clone(), Arc::clone(&status));

        let storage = self.storage.clone();
        let runner = ShellRunner::new(self.storage.clone()).with_workdir(workdir);
        let id = handle.id.clone();

        tokio::spawn(async move {
            set_status(&status, RemoteStatus::Running);
            let outcome = jobspec::execute(&descriptor, &runner, &storage).await;
            match outcome {
                Ok(record) => {
                    debug!(id = %id, uid = %record.uid, "local job succeeded");
                    set_status(&status, RemoteStatus::Succeeded);
                }
                Err(err) => {
                    warn!(id = %id, uid = %descriptor.uid, error = %err, "local job failed");
                    set_status(&status, RemoteStatus::Failed(err.to_string()));
                }
            }
        });

        Ok(handle)
    }
}

fn set_status(cell: &Mutex<RemoteStatus>, status: RemoteStatus) {
    if let Ok(mut guard) = cell.lock() {
        *guard = status;
    }
}

impl ComputeEnv for LocalComputeEnv {
    fn name(&self) -> &str {
        "local"
    }

    fn is_compatible(&self, template: &TaskTemplate) -> std::result::Result<(), String> {
        match template.op.as_deref() {
            Some(SHELL_OP) => {}
            Some(other) => return Err(format!("unsupported op '{other}' (only '{SHELL_OP}')")),
            None => return Err(format!("{} nodes cannot be executed", template.kind)),
        }
        if template.params.get("cmd").and_then(|v| v.as_str()).is_none() {
            return Err("shell transforms need a string `cmd` parameter".to_string());
        }
        Ok(())
    }

    fn create<'a>(&'a self, run_name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.create_run_dir(run_name) })
    }

    fn wait_ready(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let dir = self.provisioned_dir()?;
            if Path::new(&dir).is_dir() {
                Ok(())
            } else {
                Err(ReprodError::TransientIo(format!(
                    "run directory {} disappeared",
                    dir.display()
                )))
            }
        })
    }

    fn submit(&self, descriptor: JobDescriptor) -> BoxFuture<'_, Result<JobHandle>> {
        Box::pin(async move { self.submit_inner(descriptor) })
    }

    fn poll<'a>(&'a self, handle: &'a JobHandle) -> BoxFuture<'a, Result<RemoteStatus>> {
        Box::pin(async move {
            let cell = self.status_cell(handle)?;
            let status = cell
                .lock()
                .map(|s| s.clone())
                .map_err(|_| ReprodError::TransientIo("job status poisoned".to_string()))?;
            Ok(status)
        })
    }

    fn result<'a>(&'a self, handle: &'a JobHandle) -> BoxFuture<'a, Result<JobResult>> {
        Box::pin(async move {
            let record = jobspec::read_result(&self.storage, &handle.uid)?.ok_or_else(|| {
                ReprodError::NoSuchObject(jobspec::result_location(&handle.uid))
            })?;
            Ok(JobResult {
                manifest: record.manifest,
                output: record.output,
            })
        })
    }
}
