//! Job Queue
//!
//! In-memory, append-only list of jobs; the single source of truth for
//! pending and active work. Every status transition goes through this
//! module's lock, so transitions on one job are totally ordered.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tcr_core::domain::job::{Job, JobOutcome, JobStatus};
use thiserror::Error;

/// Queue error type
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("job {0} is already queued")]
    DuplicateJob(String),
}

/// Result of [`JobQueue::complete`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The job moved to `done`; carries its run time when it was dispatched
    Completed(Option<std::time::Duration>),
    /// The job was already `done`; nothing changed
    AlreadyDone(Option<JobOutcome>),
    UnknownJob,
}

/// Result of [`JobQueue::requeue_dispatch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Back to `queued` for another attempt
    Requeued,
    /// Out of attempts; the job is now `done` with outcome `failed`
    Exhausted,
    /// The job is no longer dispatched to that runner
    Skipped,
}

/// Per-status job counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub dispatched: usize,
    pub running: usize,
    pub done: usize,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: Vec<Job>,
    index: HashMap<String, usize>,
}

impl Inner {
    fn get_mut(&mut self, id: &str) -> Option<&mut Job> {
        let idx = *self.index.get(id)?;
        self.jobs.get_mut(idx)
    }
}

/// Ordered job collection guarded by its own lock
#[derive(Debug, Default)]
pub struct JobQueue {
    inner: Mutex<Inner>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job in `queued` state
    ///
    /// Identifiers are unique for the lifetime of the process; a duplicate is
    /// rejected and the existing entry is left untouched.
    pub fn enqueue(&self, mut job: Job) -> Result<Job, QueueError> {
        let mut inner = self.inner.lock();

        if inner.index.contains_key(&job.id) {
            tracing::warn!("Rejecting duplicate job {}", job.id);
            return Err(QueueError::DuplicateJob(job.id));
        }

        job.status = JobStatus::Queued;
        job.outcome = None;
        job.runner_id = None;
        job.dispatched_at = None;
        job.completed_at = None;

        let idx = inner.jobs.len();
        inner.index.insert(job.id.clone(), idx);
        inner.jobs.push(job.clone());

        tracing::info!(
            "Job added to queue: {} ({}) [{}]",
            job.job_name,
            job.repository(),
            job.id
        );

        Ok(job)
    }

    /// Point-in-time copy of every job, in queue order
    pub fn list(&self) -> Vec<Job> {
        self.inner.lock().jobs.clone()
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        let inner = self.inner.lock();
        inner.index.get(id).map(|&idx| inner.jobs[idx].clone())
    }

    /// Overwrite a job's status
    ///
    /// Unknown ids and backward moves are logged and ignored; this never
    /// fails, since callbacks may race ahead of intake.
    pub fn set_status(&self, id: &str, status: JobStatus) -> bool {
        let mut inner = self.inner.lock();

        let Some(job) = inner.get_mut(id) else {
            tracing::warn!("Job {} not found for status update", id);
            return false;
        };

        if !job.status.can_advance_to(status) {
            tracing::warn!(
                "Ignoring status change of job {} from {} to {}",
                id,
                job.status,
                status
            );
            return false;
        }

        job.status = status;
        if status.is_terminal() {
            job.completed_at = Some(Utc::now());
        }
        tracing::debug!("Job {} status updated to {}", id, status);
        true
    }

    /// First job still waiting for a runner
    pub fn next_queued(&self) -> Option<Job> {
        self.inner
            .lock()
            .jobs
            .iter()
            .find(|job| job.status == JobStatus::Queued)
            .cloned()
    }

    /// Compare-and-set `queued -> dispatched`, assigning `runner_id`
    ///
    /// Returns the updated job, or `None` if it is unknown or no longer
    /// queued (another dispatch attempt won).
    pub fn mark_dispatched(&self, id: &str, runner_id: &str) -> Option<Job> {
        let mut inner = self.inner.lock();
        let job = inner.get_mut(id)?;

        if job.status != JobStatus::Queued {
            return None;
        }

        job.status = JobStatus::Dispatched;
        job.runner_id = Some(runner_id.to_string());
        job.dispatched_at = Some(Utc::now());
        job.dispatch_attempts += 1;

        Some(job.clone())
    }

    /// `dispatched -> running`, reported by the runner when it starts
    pub fn mark_running(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();

        let Some(job) = inner.get_mut(id) else {
            tracing::warn!("Job {} not found for running report", id);
            return false;
        };

        if job.status != JobStatus::Dispatched {
            tracing::debug!("Ignoring running report for job {} in state {}", id, job.status);
            return false;
        }

        job.status = JobStatus::Running;
        true
    }

    /// Move a job to `done` with its verdict; idempotent
    pub fn complete(&self, id: &str, outcome: JobOutcome) -> Completion {
        let mut inner = self.inner.lock();

        let Some(job) = inner.get_mut(id) else {
            return Completion::UnknownJob;
        };

        if job.status.is_terminal() {
            return Completion::AlreadyDone(job.outcome);
        }

        job.status = JobStatus::Done;
        job.outcome = Some(outcome);
        job.completed_at = Some(Utc::now());
        Completion::Completed(job.run_time().and_then(|elapsed| elapsed.to_std().ok()))
    }

    /// Undo a dispatch that failed or was never acknowledged
    ///
    /// Only applies while the job is still `dispatched` to `runner_id`; a job
    /// the runner already reported on is left alone. After `max_attempts`
    /// dispatches the job is failed instead of requeued.
    pub fn requeue_dispatch(&self, id: &str, runner_id: &str, max_attempts: u32) -> Requeue {
        let mut inner = self.inner.lock();

        let Some(job) = inner.get_mut(id) else {
            return Requeue::Skipped;
        };

        if job.status != JobStatus::Dispatched || job.runner_id.as_deref() != Some(runner_id) {
            return Requeue::Skipped;
        }

        if job.dispatch_attempts >= max_attempts {
            job.status = JobStatus::Done;
            job.outcome = Some(JobOutcome::Failed);
            job.completed_at = Some(Utc::now());
            return Requeue::Exhausted;
        }

        job.status = JobStatus::Queued;
        job.runner_id = None;
        job.dispatched_at = None;
        Requeue::Requeued
    }

    /// Jobs still `dispatched` whose dispatch is older than `timeout`
    pub fn expired_dispatches(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<Job> {
        self.inner
            .lock()
            .jobs
            .iter()
            .filter(|job| job.status == JobStatus::Dispatched)
            .filter(|job| job.dispatched_at.is_some_and(|at| now - at >= timeout))
            .cloned()
            .collect()
    }

    /// Whether the job exists and is `dispatched` or `running`
    pub fn is_active(&self, id: &str) -> bool {
        let inner = self.inner.lock();
        inner
            .index
            .get(id)
            .is_some_and(|&idx| inner.jobs[idx].status.is_active())
    }

    /// Whether any job in the queue is `dispatched` or `running`
    pub fn has_active(&self) -> bool {
        self.inner.lock().jobs.iter().any(|job| job.status.is_active())
    }

    pub fn counts(&self) -> QueueCounts {
        let inner = self.inner.lock();
        let mut counts = QueueCounts::default();
        for job in &inner.jobs {
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Dispatched => counts.dispatched += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Done => counts.done += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> Job {
        Job::new(id, "queued", "octo", "repo", format!("build-{}", id))
    }

    #[test]
    fn test_enqueue_lists_single_queued_entry() {
        let queue = JobQueue::new();
        queue.enqueue(job("j1")).unwrap();

        let jobs = queue.list();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "j1");
        assert_eq!(jobs[0].status, JobStatus::Queued);
    }

    #[test]
    fn test_enqueue_rejects_duplicate_id() {
        let queue = JobQueue::new();
        queue.enqueue(job("j1")).unwrap();
        queue.mark_dispatched("j1", "r1").unwrap();

        let err = queue.enqueue(job("j1")).unwrap_err();
        assert_eq!(err, QueueError::DuplicateJob("j1".to_string()));

        // The existing entry is not overwritten
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get("j1").unwrap().status, JobStatus::Dispatched);
    }

    #[test]
    fn test_enqueue_normalizes_status() {
        let queue = JobQueue::new();
        let mut incoming = job("j1");
        incoming.status = JobStatus::Done;

        let stored = queue.enqueue(incoming).unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
    }

    #[test]
    fn test_list_is_a_snapshot() {
        let queue = JobQueue::new();
        queue.enqueue(job("j1")).unwrap();

        let snapshot = queue.list();
        queue.mark_dispatched("j1", "r1");

        assert_eq!(snapshot[0].status, JobStatus::Queued);
        assert_eq!(queue.get("j1").unwrap().status, JobStatus::Dispatched);
    }

    #[test]
    fn test_set_status_unknown_id_is_noop() {
        let queue = JobQueue::new();
        assert!(!queue.set_status("missing", JobStatus::Done));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_set_status_never_regresses() {
        let queue = JobQueue::new();
        queue.enqueue(job("j1")).unwrap();

        assert!(queue.set_status("j1", JobStatus::Done));
        assert!(!queue.set_status("j1", JobStatus::Queued));
        assert!(!queue.set_status("j1", JobStatus::Running));
        assert_eq!(queue.get("j1").unwrap().status, JobStatus::Done);
    }

    #[test]
    fn test_mark_dispatched_is_compare_and_set() {
        let queue = JobQueue::new();
        queue.enqueue(job("j1")).unwrap();

        let first = queue.mark_dispatched("j1", "r1").unwrap();
        assert_eq!(first.status, JobStatus::Dispatched);
        assert_eq!(first.runner_id.as_deref(), Some("r1"));
        assert_eq!(first.dispatch_attempts, 1);

        assert!(queue.mark_dispatched("j1", "r2").is_none());
        assert!(queue.mark_dispatched("missing", "r2").is_none());
    }

    #[test]
    fn test_complete_is_idempotent() {
        let queue = JobQueue::new();
        queue.enqueue(job("j1")).unwrap();
        queue.mark_dispatched("j1", "r1");

        assert!(matches!(
            queue.complete("j1", JobOutcome::Failed),
            Completion::Completed(Some(_))
        ));
        assert_eq!(
            queue.complete("j1", JobOutcome::Success),
            Completion::AlreadyDone(Some(JobOutcome::Failed))
        );
        assert_eq!(queue.complete("nope", JobOutcome::Success), Completion::UnknownJob);

        let stored = queue.get("j1").unwrap();
        assert_eq!(stored.status, JobStatus::Done);
        assert_eq!(stored.outcome, Some(JobOutcome::Failed));
        assert!(stored.completed_at.is_some());
    }

    #[test]
    fn test_mark_running_only_from_dispatched() {
        let queue = JobQueue::new();
        queue.enqueue(job("j1")).unwrap();

        assert!(!queue.mark_running("j1"));
        queue.mark_dispatched("j1", "r1");
        assert!(queue.mark_running("j1"));
        assert!(!queue.mark_running("j1"));
        assert_eq!(queue.get("j1").unwrap().status, JobStatus::Running);
    }

    #[test]
    fn test_requeue_dispatch() {
        let queue = JobQueue::new();
        queue.enqueue(job("j1")).unwrap();
        queue.mark_dispatched("j1", "r1");

        // Wrong runner: untouched
        assert_eq!(queue.requeue_dispatch("j1", "r2", 3), Requeue::Skipped);

        assert_eq!(queue.requeue_dispatch("j1", "r1", 3), Requeue::Requeued);
        let stored = queue.get("j1").unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(stored.runner_id, None);
        assert_eq!(stored.dispatch_attempts, 1);
    }

    #[test]
    fn test_requeue_dispatch_skips_acknowledged_job() {
        let queue = JobQueue::new();
        queue.enqueue(job("j1")).unwrap();
        queue.mark_dispatched("j1", "r1");
        queue.mark_running("j1");

        assert_eq!(queue.requeue_dispatch("j1", "r1", 3), Requeue::Skipped);
        assert_eq!(queue.get("j1").unwrap().status, JobStatus::Running);
    }

    #[test]
    fn test_requeue_dispatch_exhausts_attempts() {
        let queue = JobQueue::new();
        queue.enqueue(job("j1")).unwrap();

        queue.mark_dispatched("j1", "r1");
        assert_eq!(queue.requeue_dispatch("j1", "r1", 2), Requeue::Requeued);

        // Second and last allowed attempt
        queue.mark_dispatched("j1", "r1");
        assert_eq!(queue.get("j1").unwrap().dispatch_attempts, 2);
        assert_eq!(queue.requeue_dispatch("j1", "r1", 2), Requeue::Exhausted);

        let stored = queue.get("j1").unwrap();
        assert_eq!(stored.status, JobStatus::Done);
        assert_eq!(stored.outcome, Some(JobOutcome::Failed));
    }

    #[test]
    fn test_expired_dispatches() {
        let queue = JobQueue::new();
        queue.enqueue(job("j1")).unwrap();
        queue.enqueue(job("j2")).unwrap();
        queue.mark_dispatched("j1", "r1");

        let now = Utc::now();
        assert!(queue.expired_dispatches(now, Duration::seconds(60)).is_empty());

        let later = now + Duration::seconds(61);
        let expired = queue.expired_dispatches(later, Duration::seconds(60));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "j1");
    }

    #[test]
    fn test_counts_and_activity() {
        let queue = JobQueue::new();
        for id in ["j1", "j2", "j3"] {
            queue.enqueue(job(id)).unwrap();
        }
        assert!(!queue.has_active());

        queue.mark_dispatched("j1", "r1");
        queue.mark_dispatched("j2", "r2");
        queue.complete("j2", JobOutcome::Success);

        assert!(queue.has_active());
        assert!(queue.is_active("j1"));
        assert!(!queue.is_active("j2"));
        assert!(!queue.is_active("missing"));
        assert_eq!(
            queue.counts(),
            QueueCounts {
                queued: 1,
                dispatched: 1,
                running: 0,
                done: 1,
            }
        );
    }
}
