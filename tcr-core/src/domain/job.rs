//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of dispatchable work created from a CI trigger event
///
/// Jobs live in the controller's queue for the lifetime of the process.
/// `runner_id` is set while the job is assigned to a runner and kept after
/// completion for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub action: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub job_name: String,
    pub status: JobStatus,
    #[serde(default)]
    pub outcome: Option<JobOutcome>,
    #[serde(default)]
    pub runner_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub dispatched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dispatch_attempts: u32,
}

impl Job {
    /// Creates a queued job
    pub fn new(
        id: impl Into<String>,
        action: impl Into<String>,
        repo_owner: impl Into<String>,
        repo_name: impl Into<String>,
        job_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            repo_owner: repo_owner.into(),
            repo_name: repo_name.into(),
            job_name: job_name.into(),
            status: JobStatus::Queued,
            outcome: None,
            runner_id: None,
            created_at: Utc::now(),
            dispatched_at: None,
            completed_at: None,
            dispatch_attempts: 0,
        }
    }

    /// `owner/name` of the originating repository
    pub fn repository(&self) -> String {
        format!("{}/{}", self.repo_owner, self.repo_name)
    }

    /// Time between the last dispatch and completion
    pub fn run_time(&self) -> Option<chrono::Duration> {
        Some(self.completed_at? - self.dispatched_at?)
    }
}

/// Job lifecycle status
///
/// Ordered: `Queued < Dispatched < Running < Done`. Status only moves
/// forward, except for a failed or expired dispatch which returns the job
/// from `Dispatched` to `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for an idle runner
    Queued,

    /// Sent (or being sent) to a runner, not yet acknowledged
    Dispatched,

    /// The runner reported that it started executing the job
    Running,

    /// Terminal; see `Job::outcome` for the verdict
    Done,
}

impl JobStatus {
    /// Whether a runner is (or may be) working on the job
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Dispatched | JobStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        self == JobStatus::Done
    }

    /// Whether moving from `self` to `next` keeps the status monotonic
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        next > self
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Dispatched => write!(f, "dispatched"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
        }
    }
}

/// Verdict of a finished job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Success,
    Failed,
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Success => write!(f, "success"),
            JobOutcome::Failed => write!(f, "failed"),
        }
    }
}
