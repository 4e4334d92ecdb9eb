//! Result Ingestion
//!
//! Applies runner callbacks to the queue and registry, then kicks the
//! dispatcher's fast path so a freed runner is reused without waiting for
//! the next sweep.

use std::sync::Arc;

use tcr_core::domain::job::JobOutcome;
use tcr_core::dto::job::{JobResultReport, ReportedStatus};
use tokio::task::JoinHandle;

use crate::service::dispatcher::{DispatchOutcome, Dispatcher};
use crate::service::metrics::Metrics;
use crate::service::queue::{Completion, JobQueue};
use crate::service::registry::RunnerRegistry;

/// Effect of one callback on the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    /// The runner started the job
    Started,
    /// The job reached `done`
    Completed(JobOutcome),
    /// The job was already `done`; nothing changed
    Duplicate,
    /// A running report that did not apply (job not dispatched)
    Ignored,
    UnknownJob,
}

/// What the caller gets back from [`ResultIngestor::ingest`]
#[derive(Debug)]
pub struct IngestReport {
    pub effect: Ingested,
    /// The fast-path dispatch spawned for a terminal report
    pub fast_path: Option<JoinHandle<Option<DispatchOutcome>>>,
}

#[derive(Debug)]
pub struct ResultIngestor {
    queue: Arc<JobQueue>,
    registry: Arc<RunnerRegistry>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<Metrics>,
}

impl ResultIngestor {
    pub fn new(
        queue: Arc<JobQueue>,
        registry: Arc<RunnerRegistry>,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            queue,
            registry,
            dispatcher,
            metrics,
        }
    }

    /// Apply one result callback
    ///
    /// Safe to call repeatedly with the same report. Every terminal report
    /// spawns the fast path; a redundant one finds nothing new to do.
    pub fn ingest(&self, report: &JobResultReport) -> IngestReport {
        let Some(outcome) = report.status.outcome() else {
            return IngestReport {
                effect: self.ingest_running(report),
                fast_path: None,
            };
        };

        let effect = match self.queue.complete(&report.id, outcome) {
            Completion::Completed(run_time) => {
                self.metrics.job_completed(outcome, run_time);
                tracing::info!(
                    "Job {} completed with outcome {} on runner {}",
                    report.id, outcome, report.runner_id
                );
                Ingested::Completed(outcome)
            }
            Completion::AlreadyDone(previous) => {
                tracing::debug!(
                    "Job {} already done ({:?}), ignoring repeated {:?} report",
                    report.id, previous, report.status
                );
                Ingested::Duplicate
            }
            Completion::UnknownJob => {
                tracing::warn!(
                    "Result for unknown job {} from runner {}",
                    report.id, report.runner_id
                );
                Ingested::UnknownJob
            }
        };

        if !report.runner_id.is_empty() {
            self.registry.release(&report.runner_id, &report.id);
        }

        IngestReport {
            effect,
            fast_path: Some(self.dispatcher.spawn_trigger_next()),
        }
    }

    fn ingest_running(&self, report: &JobResultReport) -> Ingested {
        debug_assert_eq!(report.status, ReportedStatus::Running);

        if self.queue.get(&report.id).is_none() {
            tracing::warn!(
                "Running report for unknown job {} from runner {}",
                report.id, report.runner_id
            );
            return Ingested::UnknownJob;
        }

        if self.queue.mark_running(&report.id) {
            tracing::info!("Job {} running on runner {}", report.id, report.runner_id);
            Ingested::Started
        } else {
            Ingested::Ignored
        }
    }
}
