use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use reprod::errors::{ReprodError, Result};
use reprod::exec::{BoxFuture, ComputeEnv, JobHandle, JobResult, RemoteStatus, TaskTemplate};
use reprod::jobspec::{self, JobDescriptor, ResultRecord};
use reprod::storage::MemoryStorage;

/// Scripted failure for one attempt of a job.
#[derive(Debug, Clone)]
pub enum FakeFailure {
    /// `submit` fails with a transient IO error.
    Transient(String),
    /// The job runs and reports failure.
    Execution(String),
}

struct FakeJob {
    descriptor: JobDescriptor,
    polls: u32,
    failure: Option<String>,
    finished: bool,
}

/// A fake compute environment that:
/// - records every submitted descriptor and provisioned run name
/// - fails attempts as scripted per uid, succeeding otherwise
/// - writes result records into the shared `MemoryStorage` on success
/// - tracks how many jobs were in flight at once.
pub struct FakeComputeEnv {
    storage: MemoryStorage,
    script: Mutex<HashMap<String, VecDeque<FakeFailure>>>,
    incompatible_ops: HashSet<String>,
    submissions: Mutex<Vec<JobDescriptor>>,
    created: Mutex<Vec<String>>,
    jobs: Mutex<HashMap<String, FakeJob>>,
    counter: AtomicU64,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeComputeEnv {
    pub fn new(storage: MemoryStorage) -> Self {
        Self {
            storage,
            script: Mutex::new(HashMap::new()),
            incompatible_ops: HashSet::new(),
            submissions: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            jobs: Mutex::new(HashMap::new()),
            counter: AtomicU64::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    /// Queue failures for the next attempts of `uid`, in order.
    pub fn fail(self, uid: &str, failures: impl IntoIterator<Item = FakeFailure>) -> Self {
        self.script
            .lock()
            .unwrap()
            .entry(uid.to_string())
            .or_default()
            .extend(failures);
        self
    }

    /// Reject transforms with this op in `is_compatible`.
    pub fn reject_op(mut self, op: &str) -> Self {
        self.incompatible_ops.insert(op.to_string());
        self
    }

    /// Uids of all submissions, in submission order.
    pub fn submitted(&self) -> Vec<String> {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.uid.clone())
            .collect()
    }

    pub fn descriptors(&self) -> Vec<JobDescriptor> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn submissions_of(&self, uid: &str) -> usize {
        self.submitted().iter().filter(|u| u.as_str() == uid).count()
    }

    pub fn created_runs(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn next_failure(&self, uid: &str) -> Option<FakeFailure> {
        self.script
            .lock()
            .unwrap()
            .get_mut(uid)
            .and_then(VecDeque::pop_front)
    }

    fn finish(&self, job: &mut FakeJob) -> Result<RemoteStatus> {
        job.finished = true;
        self.running.fetch_sub(1, Ordering::SeqCst);
        if let Some(message) = &job.failure {
            return Ok(RemoteStatus::Failed(message.clone()));
        }
        let record = ResultRecord {
            uid: job.descriptor.uid.clone(),
            output: jobspec::output_prefix(&job.descriptor.uid),
            manifest: job.descriptor.manifest.clone(),
            canonical: job.descriptor.canonical.clone(),
        };
        jobspec::write_result(&self.storage, &record)?;
        Ok(RemoteStatus::Succeeded)
    }
}

impl ComputeEnv for FakeComputeEnv {
    fn name(&self) -> &str {
        "fake"
    }

    fn is_compatible(&self, template: &TaskTemplate) -> std::result::Result<(), String> {
        match template.op.as_deref() {
            Some(op) if self.incompatible_ops.contains(op) => {
                Err(format!("op '{op}' is not available"))
            }
            _ => Ok(()),
        }
    }

    fn create<'a>(&'a self, run_name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.created.lock().unwrap().push(run_name.to_string());
            Ok(())
        })
    }

    fn wait_ready(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn submit(&self, descriptor: JobDescriptor) -> BoxFuture<'_, Result<JobHandle>> {
        Box::pin(async move {
            self.submissions.lock().unwrap().push(descriptor.clone());

            let failure = match self.next_failure(&descriptor.uid) {
                Some(FakeFailure::Transient(message)) => {
                    return Err(ReprodError::TransientIo(message));
                }
                Some(FakeFailure::Execution(message)) => Some(message),
                None => None,
            };

            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);

            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let handle = JobHandle {
                id: format!("fake-{n}"),
                uid: descriptor.uid.clone(),
            };
            self.jobs.lock().unwrap().insert(
                handle.id.clone(),
                FakeJob {
                    descriptor,
                    polls: 0,
                    failure,
                    finished: false,
                },
            );
            Ok(handle)
        })
    }

    fn poll<'a>(&'a self, handle: &'a JobHandle) -> BoxFuture<'a, Result<RemoteStatus>> {
        Box::pin(async move {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .get_mut(&handle.id)
                .ok_or_else(|| ReprodError::NoSuchObject(handle.id.clone()))?;
            if job.finished {
                return Ok(match &job.failure {
                    Some(message) => RemoteStatus::Failed(message.clone()),
                    None => RemoteStatus::Succeeded,
                });
            }
            job.polls += 1;
            // Report one round of `Running` so concurrent jobs overlap.
            if job.polls < 2 {
                return Ok(RemoteStatus::Running);
            }
            self.finish(job)
        })
    }

    fn result<'a>(&'a self, handle: &'a JobHandle) -> BoxFuture<'a, Result<JobResult>> {
        Box::pin(async move {
            let record = jobspec::read_result(&self.storage, &handle.uid)?
                .ok_or_else(|| ReprodError::NoSuchObject(jobspec::result_location(&handle.uid)))?;
            Ok(JobResult {
                manifest: record.manifest,
                output: record.output,
            })
        })
    }
}
