//! Dispatcher
//!
//! Pairs queued jobs with idle runners and pushes them over HTTP. Two entry
//! points share one matching routine:
//! - [`Dispatcher::sweep`], run periodically over the whole queue
//! - [`Dispatcher::trigger_next`], the fast path run after a job completes
//!
//! Sends run as tasks on the dispatcher's tracker so a slow runner never
//! holds up the next sweep; [`Dispatcher::drain`] waits for them at shutdown.
//!
//! Correctness rests on two short critical sections taken one after the
//! other, never nested and never held across the network send:
//! 1. the registry reserves a runner (picks it and marks it busy at once)
//! 2. the queue moves the job `queued -> dispatched` by compare-and-set
//!
//! A losing attempt at step 2 releases its runner. A failed send requeues
//! the job and releases the runner.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tcr_client::{ClientError, RunnerClient};
use tcr_core::domain::job::{Job, JobOutcome, JobStatus};
use tcr_core::domain::runner::Runner;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::service::metrics::Metrics;
use crate::service::queue::{JobQueue, Requeue};
use crate::service::registry::RunnerRegistry;

/// Transport used to hand a job to a runner
#[async_trait]
pub trait JobSender: Send + Sync {
    async fn send(&self, runner: &Runner, job: &Job) -> tcr_client::Result<()>;
}

#[async_trait]
impl JobSender for RunnerClient {
    async fn send(&self, runner: &Runner, job: &Job) -> tcr_client::Result<()> {
        self.dispatch_job(&runner.endpoint(), job).await
    }
}

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound on a single send, on top of the transport's own timeout
    pub send_timeout: Duration,
    /// Dispatches per job before it is failed instead of requeued
    pub max_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_timeout: tcr_client::DEFAULT_DISPATCH_TIMEOUT,
            max_attempts: 3,
        }
    }
}

/// What happened to one dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Matched by a sweep; the send continues in the background
    Claimed { job_id: String, runner_id: String },
    /// The runner accepted the job
    Sent { job_id: String, runner_id: String },
    /// The send failed; the job was requeued (or failed when out of attempts)
    SendFailed { job_id: String, runner_id: String },
    /// Another attempt dispatched the job first
    Lost,
    /// No live, idle runner
    NoRunner,
}

/// A job and runner that were matched but not yet sent
#[derive(Debug)]
struct Claim {
    job: Job,
    runner: Runner,
}

pub struct Dispatcher {
    queue: Arc<JobQueue>,
    registry: Arc<RunnerRegistry>,
    sender: Arc<dyn JobSender>,
    metrics: Arc<Metrics>,
    config: DispatchConfig,
    sends: TaskTracker,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("in_flight", &self.sends.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        queue: Arc<JobQueue>,
        registry: Arc<RunnerRegistry>,
        sender: Arc<dyn JobSender>,
        metrics: Arc<Metrics>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            sender,
            metrics,
            config,
            sends: TaskTracker::new(),
        }
    }

    /// One periodic pass over the queue
    ///
    /// Jobs are considered in queue order; the pass stops at the first job
    /// for which no runner is free. Returns once every match is claimed,
    /// without waiting for the sends.
    pub fn sweep(self: &Arc<Self>) -> Vec<DispatchOutcome> {
        let snapshot = self.queue.list();
        let mut claimed: HashSet<String> = HashSet::new();
        let mut outcomes = Vec::new();

        for job in snapshot {
            if job.status != JobStatus::Queued || claimed.contains(&job.id) {
                continue;
            }

            match self.claim(&job.id) {
                Ok(claim) => {
                    claimed.insert(claim.job.id.clone());
                    outcomes.push(DispatchOutcome::Claimed {
                        job_id: claim.job.id.clone(),
                        runner_id: claim.runner.id.clone(),
                    });
                    let dispatcher = Arc::clone(self);
                    self.sends.spawn(async move { dispatcher.send(claim).await });
                }
                Err(DispatchOutcome::NoRunner) => {
                    tracing::debug!("No idle runner, ending sweep");
                    break;
                }
                Err(outcome) => outcomes.push(outcome),
            }
        }

        outcomes
    }

    /// Wait for every in-flight send and fast path to finish
    ///
    /// Closes the tracker; tasks spawned afterwards are still tracked, so
    /// calling this again waits for those too.
    pub async fn drain(&self) {
        self.sends.close();
        if !self.sends.is_empty() {
            tracing::info!("Waiting for {} in-flight dispatch(es)", self.sends.len());
        }
        self.sends.wait().await;
    }

    /// Fast path: dispatch the next queued job right away, if a runner is free
    ///
    /// Returns `None` when the queue has nothing waiting.
    pub async fn trigger_next(self: Arc<Self>) -> Option<DispatchOutcome> {
        self.metrics.fast_path_run();

        let Some(job) = self.queue.next_queued() else {
            tracing::debug!("Fast path: no queued job");
            return None;
        };

        let outcome = self.dispatch(&job.id).await;
        if let DispatchOutcome::Sent { job_id, runner_id } = &outcome {
            tracing::info!("Triggered next job {} on runner {}", job_id, runner_id);
        }
        Some(outcome)
    }

    /// Spawn the fast path without waiting for it
    pub fn spawn_trigger_next(self: &Arc<Self>) -> JoinHandle<Option<DispatchOutcome>> {
        let dispatcher = Arc::clone(self);
        self.sends.spawn(dispatcher.trigger_next())
    }

    /// Match one job with a runner and send it
    pub async fn dispatch(&self, job_id: &str) -> DispatchOutcome {
        match self.claim(job_id) {
            Ok(claim) => self.send(claim).await,
            Err(outcome) => outcome,
        }
    }

    /// Reserve a runner, then move the job to `dispatched`
    fn claim(&self, job_id: &str) -> Result<Claim, DispatchOutcome> {
        let Some(runner) = self.registry.reserve_idle(job_id) else {
            return Err(DispatchOutcome::NoRunner);
        };

        match self.queue.mark_dispatched(job_id, &runner.id) {
            Some(job) => Ok(Claim { job, runner }),
            None => {
                self.registry.release(&runner.id, job_id);
                tracing::debug!("Job {} already taken, released runner {}", job_id, runner.id);
                Err(DispatchOutcome::Lost)
            }
        }
    }

    /// Push a claimed job with no lock held
    async fn send(&self, claim: Claim) -> DispatchOutcome {
        let Claim { job, runner } = claim;

        let result = match tokio::time::timeout(
            self.config.send_timeout,
            self.sender.send(&runner, &job),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(self.config.send_timeout)),
        };

        match result {
            Ok(()) => {
                self.metrics.job_dispatched();
                tracing::info!(
                    "Dispatched job '{}' (ID: {}) to runner '{}'",
                    job.job_name, job.id, runner.id
                );
                DispatchOutcome::Sent {
                    job_id: job.id,
                    runner_id: runner.id,
                }
            }
            Err(err) => {
                self.metrics.dispatch_error();
                tracing::warn!(
                    "Failed to dispatch job {} to runner {}: {}",
                    job.job_name, runner.id, err
                );
                self.recover_failed_send(&job.id, &runner.id);
                DispatchOutcome::SendFailed {
                    job_id: job.id,
                    runner_id: runner.id,
                }
            }
        }
    }

    /// Undo a dispatch that never reached the runner
    ///
    /// If the runner already reported on the job the send only timed out on
    /// our side, and both records are left as they are.
    pub(crate) fn recover_failed_send(&self, job_id: &str, runner_id: &str) {
        match self
            .queue
            .requeue_dispatch(job_id, runner_id, self.config.max_attempts)
        {
            Requeue::Requeued => {
                self.metrics.job_requeued();
                self.registry.release(runner_id, job_id);
                tracing::info!("Job {} requeued after failed dispatch", job_id);
            }
            Requeue::Exhausted => {
                self.metrics.job_completed(JobOutcome::Failed, None);
                self.registry.release(runner_id, job_id);
                tracing::warn!(
                    "Job {} failed after {} dispatch attempt(s)",
                    job_id, self.config.max_attempts
                );
            }
            Requeue::Skipped => {
                tracing::debug!("Job {} moved on since dispatch, leaving it", job_id);
            }
        }
    }
}
