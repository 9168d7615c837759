//! The async job handle: every scenario run is submitted as a job and
//! polled to completion rather than awaited directly, per §4.5/§5.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// The job is still executing.
    Running,
    /// The job finished normally; `result` on the snapshot is populated.
    Succeeded,
    /// The job finished with an error, including cancellation; `error` on
    /// the snapshot is populated.
    Failed,
}

/// A point-in-time view of a job. Immutable once `status` is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Unique job identifier, assigned at submission.
    pub job_id: String,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Serialized report payload, present iff `status == Succeeded`.
    pub result: Option<serde_json::Value>,
    /// Human-readable failure reason, present iff `status == Failed`.
    pub error: Option<String>,
}

impl JobSnapshot {
    fn running(job_id: String) -> Self {
        Self {
            job_id,
            status: JobStatus::Running,
            result: None,
            error: None,
        }
    }
}

/// A handle to one in-flight or completed job. Cloning shares the same
/// underlying state: every clone observes the same terminal transition.
#[derive(Clone)]
pub struct JobHandle {
    job_id: String,
    snapshot: Arc<Mutex<JobSnapshot>>,
    cancelled: Arc<AtomicBool>,
}

impl JobHandle {
    /// Creates a fresh job in the `Running` state with a generated id.
    pub fn new() -> Self {
        let job_id = Uuid::new_v4().to_string();
        Self {
            snapshot: Arc::new(Mutex::new(JobSnapshot::running(job_id.clone()))),
            job_id,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// This job's id.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Returns the current snapshot. Safe to call from any thread at any time.
    pub fn snapshot(&self) -> JobSnapshot {
        self.snapshot.lock().clone()
    }

    /// Requests cancellation. Checked at suspension points by whatever is
    /// driving this job; does not itself transition the snapshot.
    pub fn cancel(&self) {
        log::info!("job {} cancellation requested", self.job_id);
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Transitions to `Succeeded` with `result`. A no-op if the job is
    /// already terminal — exactly one terminal transition is honored.
    pub fn succeed(&self, result: serde_json::Value) {
        let mut snap = self.snapshot.lock();
        if snap.status == JobStatus::Running {
            snap.status = JobStatus::Succeeded;
            snap.result = Some(result);
        }
    }

    /// Transitions to `Failed` with `error`. A no-op if the job is already
    /// terminal.
    pub fn fail(&self, error: impl Into<String>) {
        let mut snap = self.snapshot.lock();
        if snap.status == JobStatus::Running {
            snap.status = JobStatus::Failed;
            snap.error = Some(error.into());
        }
    }
}

impl Default for JobHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_running_with_a_stable_id() {
        let job = JobHandle::new();
        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Running);
        assert_eq!(snap.job_id, job.job_id());
    }

    #[test]
    fn only_first_terminal_transition_sticks() {
        let job = JobHandle::new();
        job.succeed(serde_json::json!({"ok": true}));
        job.fail("late failure, should be ignored");
        let snap = job.snapshot();
        assert_eq!(snap.status, JobStatus::Succeeded);
        assert!(snap.error.is_none());
    }

    #[test]
    fn cancellation_flag_is_independent_of_snapshot() {
        let job = JobHandle::new();
        assert!(!job.is_cancelled());
        job.cancel();
        assert!(job.is_cancelled());
        assert_eq!(job.snapshot().status, JobStatus::Running);
    }

    #[test]
    fn clones_observe_the_same_transition() {
        let job = JobHandle::new();
        let clone = job.clone();
        job.fail("boom");
        assert_eq!(clone.snapshot().status, JobStatus::Failed);
        assert_eq!(clone.snapshot().error.as_deref(), Some("boom"));
    }
}
