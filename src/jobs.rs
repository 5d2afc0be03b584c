use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Lifecycle of a background computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed(String),
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed(_))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Complete => write!(f, "complete"),
            JobStatus::Failed(msg) => write!(f, "failed: {msg}"),
        }
    }
}

struct Slot<T> {
    status: JobStatus,
    output: Option<T>,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    done: Condvar,
}

/// Handle to a fit or forecast running on the rayon pool. The caller polls
/// `status()` or blocks on `wait()`; it never shares state with the job
/// beyond this slot.
pub struct Job<T> {
    name: String,
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Job<T> {
    /// Queue `work` on the global rayon pool. An `Err` return or a panic
    /// both end in `JobStatus::Failed`.
    pub fn spawn<F>(name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let name = name.into();
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot { status: JobStatus::Pending, output: None }),
            done: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        let job_name = name.clone();
        rayon::spawn(move || {
            worker.slot.lock().status = JobStatus::Running;
            debug!(job = %job_name, "job started");

            let outcome = panic::catch_unwind(AssertUnwindSafe(work));
            let mut slot = worker.slot.lock();
            match outcome {
                Ok(Ok(value)) => {
                    slot.output = Some(value);
                    slot.status = JobStatus::Complete;
                    debug!(job = %job_name, "job complete");
                }
                Ok(Err(e)) => {
                    warn!(job = %job_name, error = %e, "job failed");
                    slot.status = JobStatus::Failed(e.to_string());
                }
                Err(payload) => {
                    let msg = panic_message(payload.as_ref());
                    warn!(job = %job_name, panic = %msg, "job panicked");
                    slot.status = JobStatus::Failed(msg);
                }
            }
            drop(slot);
            worker.done.notify_all();
        });

        Job { name, shared }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> JobStatus {
        self.shared.slot.lock().status.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.slot.lock().status.is_finished()
    }

    /// The result, if the job has completed and nobody has taken it yet.
    pub fn try_take(&self) -> Option<T> {
        let mut slot = self.shared.slot.lock();
        if slot.status == JobStatus::Complete { slot.output.take() } else { None }
    }

    /// Block until the job finishes.
    pub fn wait(self) -> Result<T> {
        let mut slot = self.shared.slot.lock();
        while !slot.status.is_finished() {
            self.shared.done.wait(&mut slot);
        }
        if let JobStatus::Failed(msg) = &slot.status {
            return Err(Error::JobFailed { name: self.name.clone(), message: msg.clone() });
        }
        slot.output.take().ok_or_else(|| Error::JobFailed {
            name: self.name.clone(),
            message: "result already taken".to_string(),
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
