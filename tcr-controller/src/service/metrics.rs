//! Controller metrics
//!
//! Services record through the `metrics` macros into a Prometheus recorder
//! owned by this struct; `GET /metrics` renders it in the text exposition
//! format after refreshing the queue and registry gauges.

use std::time::Duration;

use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};
use tcr_core::domain::job::JobOutcome;
use tcr_core::dto::runner::RegistryCounts;

use crate::service::queue::QueueCounts;

pub const JOBS_TOTAL: &str = "tcr_jobs_total";
pub const JOBS_IN_QUEUE: &str = "tcr_jobs_in_queue";
pub const JOB_DURATION_SECONDS: &str = "tcr_job_duration_seconds";
pub const RUNNERS_TOTAL: &str = "tcr_runners_total";
pub const RUNNERS_IDLE: &str = "tcr_runners_idle";
pub const RUNNERS_BUSY: &str = "tcr_runners_busy";
pub const DISPATCH_ERRORS_TOTAL: &str = "tcr_dispatch_errors_total";
pub const FAST_PATH_RUNS_TOTAL: &str = "tcr_fast_path_runs_total";
pub const RUNNERS_RESET_TOTAL: &str = "tcr_runners_reset_total";
pub const SCALE_UP_TOTAL: &str = "tcr_scale_up_total";
pub const SCALE_DOWN_REQUESTS_TOTAL: &str = "tcr_scale_down_requests_total";
pub const POLL_ERRORS_TOTAL: &str = "tcr_poll_errors_total";

/// 0.5 s doubling ten times, up to 256 s
const JOB_DURATION_BUCKETS: [f64; 10] = [0.5, 1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0, 256.0];

#[derive(Debug)]
pub struct Metrics {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl Metrics {
    pub fn new() -> Result<Self, BuildError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(JOB_DURATION_SECONDS.to_string()),
                &JOB_DURATION_BUCKETS,
            )?
            .build_recorder();
        let handle = recorder.handle();

        let metrics = Self { recorder, handle };
        metrics.record(|| {
            metrics::describe_counter!(JOBS_TOTAL, "Total jobs by status");
            metrics::describe_gauge!(JOBS_IN_QUEUE, "Number of jobs currently in queue");
            metrics::describe_histogram!(JOB_DURATION_SECONDS, "Job duration in seconds");
            metrics::describe_gauge!(RUNNERS_TOTAL, "Number of registered runners");
            metrics::describe_gauge!(RUNNERS_IDLE, "Number of idle runners");
            metrics::describe_gauge!(RUNNERS_BUSY, "Number of busy runners");
            metrics::describe_counter!(DISPATCH_ERRORS_TOTAL, "Number of failed dispatch attempts");
            metrics::describe_counter!(FAST_PATH_RUNS_TOTAL, "Dispatches triggered by a result");
            metrics::describe_counter!(RUNNERS_RESET_TOTAL, "Busy runners freed by the reconciler");
            metrics::describe_counter!(SCALE_UP_TOTAL, "Runner units provisioned");
            metrics::describe_counter!(SCALE_DOWN_REQUESTS_TOTAL, "Scale-down requests sent");
            metrics::describe_counter!(POLL_ERRORS_TOTAL, "Failed demand polls");
        });
        Ok(metrics)
    }

    /// Run `f` with this instance's recorder installed for the current thread
    fn record(&self, f: impl FnOnce()) {
        metrics::with_local_recorder(&self.recorder, f);
    }

    fn job_status(&self, status: &'static str) {
        self.record(|| metrics::counter!(JOBS_TOTAL, "status" => status).increment(1));
    }

    pub fn job_enqueued(&self) {
        self.job_status("queued");
    }

    pub fn job_dispatched(&self) {
        self.job_status("dispatched");
    }

    pub fn job_requeued(&self) {
        self.job_status("requeued");
    }

    /// A job reached `done`; `run_time` is known when it was dispatched first
    pub fn job_completed(&self, outcome: JobOutcome, run_time: Option<Duration>) {
        self.job_status(match outcome {
            JobOutcome::Success => "success",
            JobOutcome::Failed => "failed",
        });
        if let Some(elapsed) = run_time {
            self.record(|| metrics::histogram!(JOB_DURATION_SECONDS).record(elapsed));
        }
    }

    pub fn dispatch_error(&self) {
        self.record(|| metrics::counter!(DISPATCH_ERRORS_TOTAL).increment(1));
    }

    pub fn fast_path_run(&self) {
        self.record(|| metrics::counter!(FAST_PATH_RUNS_TOTAL).increment(1));
    }

    pub fn runner_reset(&self) {
        self.record(|| metrics::counter!(RUNNERS_RESET_TOTAL).increment(1));
    }

    pub fn scale_up_unit(&self) {
        self.record(|| metrics::counter!(SCALE_UP_TOTAL).increment(1));
    }

    pub fn scale_down_request(&self) {
        self.record(|| metrics::counter!(SCALE_DOWN_REQUESTS_TOTAL).increment(1));
    }

    pub fn poll_error(&self) {
        self.record(|| metrics::counter!(POLL_ERRORS_TOTAL).increment(1));
    }

    /// Refresh the gauges and render the Prometheus text format
    pub fn render(&self, queue: QueueCounts, runners: RegistryCounts) -> String {
        self.record(|| {
            metrics::gauge!(JOBS_IN_QUEUE).set(queue.queued as f64);
            metrics::gauge!(RUNNERS_TOTAL).set(runners.total as f64);
            metrics::gauge!(RUNNERS_IDLE).set(runners.idle as f64);
            metrics::gauge!(RUNNERS_BUSY).set(runners.busy as f64);
        });
        self.handle.render()
    }

    /// Current value of one rendered series, e.g. `tcr_jobs_total{status="queued"}`
    ///
    /// Series that were never recorded read as zero.
    #[cfg(test)]
    pub(crate) fn value(&self, series: &str) -> f64 {
        sample(&self.handle.render(), series)
    }
}

#[cfg(test)]
pub(crate) fn sample(rendered: &str, series: &str) -> f64 {
    rendered
        .lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let (name, value) = line.rsplit_once(' ')?;
            (name == series).then(|| value.parse().ok()).flatten()
        })
        .unwrap_or(0.0)
}
