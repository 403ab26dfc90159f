//! Job records and their state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::policy::RetentionPolicy;

/// Lifecycle state of a job.
///
/// Transitions are monotone and one-directional:
/// `Pending -> Running -> {Completed, Failed, Cancelled}`. A terminal job
/// never re-enters `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether moving to `next` respects the one-directional state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Running, JobStatus::Completed) => true,
            (JobStatus::Running, JobStatus::Failed) => true,
            (JobStatus::Running, JobStatus::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Outcome recorded when a job reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub records_processed: u64,
    pub records_affected: u64,
    /// Megabytes freed (cleanup) or archived (archival).
    pub storage_mb: f64,
    pub duration: Duration,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobResult {
    pub fn failure(error: impl Into<String>, duration: Duration) -> Self {
        Self {
            records_processed: 0,
            records_affected: 0,
            storage_mb: 0.0,
            duration,
            success: false,
            error_message: Some(error.into()),
        }
    }
}

/// Kind-specific job state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobKind {
    /// In-place cleanup (delete/compress/sample/aggregate). Carries the
    /// bounded-retry bookkeeping.
    Cleanup { error_count: u32, max_retries: u32 },
    /// Copy-to-location archival. Records the target location and, once the
    /// worker has written it, the output artifact path.
    Archival {
        location: String,
        artifact_path: Option<String>,
    },
}

/// A single unit of retention enforcement work.
///
/// Owned exclusively by its engine until a worker claims it; after the
/// claim only that worker mutates it until it reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Policy snapshot captured at submission time.
    pub policy: RetentionPolicy,
    pub kind: JobKind,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
}

impl Job {
    pub fn new_cleanup(policy: RetentionPolicy, max_retries: u32) -> Self {
        Self::new_cleanup_retry(policy, 0, max_retries)
    }

    /// Resubmission constructor: the retry counter from the failed
    /// predecessor is carried forward so `max_retries` stays binding
    /// across resubmissions.
    pub fn new_cleanup_retry(policy: RetentionPolicy, error_count: u32, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            policy,
            kind: JobKind::Cleanup {
                error_count,
                max_retries,
            },
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
        }
    }

    pub fn new_archival(policy: RetentionPolicy, location: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            policy,
            kind: JobKind::Archival {
                location: location.into(),
                artifact_path: None,
            },
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
        }
    }

    /// Claim the job for execution. Returns false if the job is not
    /// `Pending` (the transition is rejected and nothing changes).
    pub fn claim(&mut self) -> bool {
        if !self.status.can_transition_to(JobStatus::Running) {
            return false;
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    /// Record a successful terminal result. Rejected unless `Running`.
    pub fn complete(&mut self, result: JobResult) -> bool {
        if !self.status.can_transition_to(JobStatus::Completed) {
            return false;
        }
        self.status = JobStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
        true
    }

    /// Record a failed terminal result. Rejected unless `Running`.
    pub fn fail(&mut self, result: JobResult) -> bool {
        if !self.status.can_transition_to(JobStatus::Failed) {
            return false;
        }
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
        true
    }

    /// Cancel a claimed job. Rejected unless `Running`: a still-queued job
    /// cannot be cancelled through this transition.
    pub fn cancel(&mut self) -> bool {
        if !self.status.can_transition_to(JobStatus::Cancelled) {
            return false;
        }
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        true
    }

    /// Retry bookkeeping for cleanup jobs, `None` for archival jobs.
    pub fn retry_state(&self) -> Option<(u32, u32)> {
        match self.kind {
            JobKind::Cleanup {
                error_count,
                max_retries,
            } => Some((error_count, max_retries)),
            JobKind::Archival { .. } => None,
        }
    }
}

/// Status report an engine sends back to the policy manager when a job
/// reaches a terminal state.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub policy_name: String,
    pub result: JobResult,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::policy::{ArchivalStrategyKind, DataType, RetentionPolicy};
    use std::time::Duration;

    fn policy() -> RetentionPolicy {
        RetentionPolicy::new(
            "p",
            DataType::Logs,
            Duration::from_secs(3600),
            ArchivalStrategyKind::Delete,
        )
    }

    fn ok_result() -> JobResult {
        JobResult {
            records_processed: 10,
            records_affected: 5,
            storage_mb: 1.0,
            duration: Duration::from_millis(1),
            success: true,
            error_message: None,
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = Job::new_cleanup(policy(), 3);
        assert_eq!(job.status, JobStatus::Pending);

        assert!(job.claim());
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());

        assert!(job.complete(ok_result()));
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
        assert!(job.result.as_ref().unwrap().success);
    }

    #[test]
    fn test_cannot_skip_running() {
        let mut job = Job::new_cleanup(policy(), 3);
        assert!(!job.complete(ok_result()));
        assert!(!job.fail(JobResult::failure("boom", Duration::ZERO)));
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.result.is_none());
    }

    #[test]
    fn test_terminal_is_final() {
        let mut job = Job::new_cleanup(policy(), 3);
        job.claim();
        job.fail(JobResult::failure("boom", Duration::ZERO));

        assert!(!job.claim());
        assert!(!job.complete(ok_result()));
        assert!(!job.cancel());
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_cancel_only_when_running() {
        let mut job = Job::new_archival(policy(), "default");
        assert!(!job.cancel(), "pending job must not be cancellable");
        assert_eq!(job.status, JobStatus::Pending);

        job.claim();
        assert!(job.cancel());
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[test]
    fn test_retry_state_carried_forward() {
        let job = Job::new_cleanup_retry(policy(), 2, 3);
        assert_eq!(job.retry_state(), Some((2, 3)));

        let job = Job::new_archival(policy(), "default");
        assert_eq!(job.retry_state(), None);
    }
}
