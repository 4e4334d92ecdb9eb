//! Job DTOs for inter-service communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::{Job, JobOutcome};

/// Request to enqueue a new job
///
/// Produced by the webhook intake (or posted manually). The id is generated
/// when the caller does not supply one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub action: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub job_name: String,
}

impl From<NewJob> for Job {
    fn from(req: NewJob) -> Self {
        let id = req
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Job::new(id, req.action, req.repo_owner, req.repo_name, req.job_name)
    }
}

/// Status a runner may report for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportedStatus {
    Running,
    Success,
    Failed,
}

impl ReportedStatus {
    /// The verdict carried by a terminal report
    pub fn outcome(self) -> Option<JobOutcome> {
        match self {
            ReportedStatus::Running => None,
            ReportedStatus::Success => Some(JobOutcome::Success),
            ReportedStatus::Failed => Some(JobOutcome::Failed),
        }
    }
}

/// Result callback sent by a runner to `/job/result`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResultReport {
    pub id: String,
    pub status: ReportedStatus,
    #[serde(default)]
    pub runner_id: String,
    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::JobStatus;

    #[test]
    fn test_new_job_generates_id() {
        let req = NewJob {
            id: None,
            action: "queued".to_string(),
            repo_owner: "octo".to_string(),
            repo_name: "repo".to_string(),
            job_name: "build".to_string(),
        };

        let job: Job = req.into();
        assert!(Uuid::parse_str(&job.id).is_ok());
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[test]
    fn test_new_job_keeps_caller_id() {
        let req: NewJob = serde_json::from_str(
            r#"{"id":"job-7","repo_owner":"octo","repo_name":"repo","job_name":"test"}"#,
        )
        .unwrap();

        let job: Job = req.into();
        assert_eq!(job.id, "job-7");
        assert_eq!(job.action, "");
    }

    #[test]
    fn test_result_report_ignores_unknown_fields() {
        let report: JobResultReport = serde_json::from_str(
            r#"{"id":"j1","status":"success","runner_id":"r1","exit_code":0}"#,
        )
        .unwrap();

        assert_eq!(report.status.outcome(), Some(JobOutcome::Success));
        assert_eq!(report.runner_id, "r1");
    }

    #[test]
    fn test_result_report_rejects_unknown_status() {
        let parsed = serde_json::from_str::<JobResultReport>(
            r#"{"id":"j1","status":"exploded","runner_id":"r1"}"#,
        );
        assert!(parsed.is_err());
    }
}
