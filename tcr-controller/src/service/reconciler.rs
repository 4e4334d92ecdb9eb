//! Stuck-runner Reconciler
//!
//! Periodic repair pass. Frees runners left busy after their job ended
//! without a callback freeing them, and takes back dispatches the runner
//! never acknowledged.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::service::dispatcher::Dispatcher;
use crate::service::metrics::Metrics;
use crate::service::queue::JobQueue;
use crate::service::registry::RunnerRegistry;

/// Result of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub runners_reset: usize,
    pub dispatches_expired: usize,
}

#[derive(Debug)]
pub struct Reconciler {
    queue: Arc<JobQueue>,
    registry: Arc<RunnerRegistry>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<Metrics>,
    ack_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        queue: Arc<JobQueue>,
        registry: Arc<RunnerRegistry>,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<Metrics>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            registry,
            dispatcher,
            metrics,
            ack_timeout,
        }
    }

    /// One full pass: expire stale dispatches, then free stuck runners
    pub fn tick(&self) -> ReconcileReport {
        self.tick_at(Utc::now())
    }

    pub(crate) fn tick_at(&self, now: DateTime<Utc>) -> ReconcileReport {
        let report = ReconcileReport {
            dispatches_expired: self.requeue_expired_dispatches(now),
            runners_reset: self.reset_stuck_runners(),
        };

        if report != ReconcileReport::default() {
            tracing::info!(
                "Reconciliation: {} runner(s) reset, {} dispatch(es) expired",
                report.runners_reset, report.dispatches_expired
            );
        }
        report
    }

    /// Clear `busy` on runners whose job is no longer active
    ///
    /// A runner whose job is unknown, or whose job id was never recorded,
    /// is freed only when no job at all is dispatched or running. A runner
    /// on an active job is left alone even if its heartbeat went stale:
    /// runners stop heartbeating while they execute.
    pub fn reset_stuck_runners(&self) -> usize {
        let mut reset = 0;

        for runner in self.registry.busy_runners() {
            let stuck = match runner.current_job.as_deref() {
                Some(job_id) if self.queue.get(job_id).is_some() => !self.queue.is_active(job_id),
                _ => !self.queue.has_active(),
            };
            if !stuck {
                continue;
            }

            let freed = match runner.current_job.as_deref() {
                Some(job_id) => self.registry.release(&runner.id, job_id),
                None => self.registry.set_busy(&runner.id, false),
            };
            if freed {
                tracing::warn!(
                    "Runner {} was busy with no active job ({:?}), marked idle",
                    runner.id, runner.current_job
                );
                self.metrics.runner_reset();
                reset += 1;
            }
        }

        reset
    }

    /// Take back dispatches older than the acknowledgement timeout
    ///
    /// The job is requeued (or failed once out of attempts) and its runner
    /// released, exactly as for a failed send.
    pub fn requeue_expired_dispatches(&self, now: DateTime<Utc>) -> usize {
        let expired = self.queue.expired_dispatches(now, self.ack_timeout);

        for job in &expired {
            let runner_id = job.runner_id.as_deref().unwrap_or_default();
            tracing::warn!(
                "Job {} not acknowledged by runner {} within {}s",
                job.id,
                runner_id,
                self.ack_timeout.num_seconds()
            );
            self.dispatcher.recover_failed_send(&job.id, runner_id);
        }

        expired.len()
    }
}
