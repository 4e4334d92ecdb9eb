//! Runner Registry
//!
//! Tracks runners by the heartbeats they send. Entries are created on the
//! first heartbeat and never removed here; a runner that stops sending
//! heartbeats simply stops being eligible for dispatch.

use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tcr_core::domain::runner::Runner;
use tcr_core::dto::runner::RegistryCounts;

/// Default liveness threshold
pub const DEFAULT_HEARTBEAT_STALENESS: Duration = Duration::seconds(30);

/// Registry of runners guarded by its own lock
#[derive(Debug)]
pub struct RunnerRegistry {
    runners: Mutex<HashMap<String, Runner>>,
    staleness: Duration,
}

impl Default for RunnerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_STALENESS)
    }
}

impl RunnerRegistry {
    pub fn new(staleness: Duration) -> Self {
        Self {
            runners: Mutex::new(HashMap::new()),
            staleness,
        }
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Record a heartbeat; creates the runner on first sight
    ///
    /// `source` is the transport's peer address; runners never report their
    /// own.
    pub fn heartbeat(&self, id: &str, source: IpAddr, port: u16) -> Runner {
        self.heartbeat_at(id, source, port, Utc::now())
    }

    pub(crate) fn heartbeat_at(
        &self,
        id: &str,
        source: IpAddr,
        port: u16,
        now: DateTime<Utc>,
    ) -> Runner {
        let source = source.to_canonical();
        let mut runners = self.runners.lock();

        let runner = runners
            .entry(id.to_string())
            .and_modify(|runner| {
                runner.last_heartbeat_at = now;
                runner.port = port;
                runner.address = source;
            })
            .or_insert_with(|| {
                tracing::info!("Runner registered: {} ({}:{})", id, source, port);
                Runner::new(id, source, port, now)
            });

        runner.clone()
    }

    /// Any live runner that is not busy
    ///
    /// Among several candidates the one with the oldest heartbeat wins, ties
    /// broken by id.
    pub fn pick_idle(&self) -> Option<Runner> {
        let runners = self.runners.lock();
        Self::select_idle(&runners, Utc::now(), self.staleness).cloned()
    }

    /// Pick an idle runner and mark it busy with `job_id` atomically
    ///
    /// Two concurrent dispatchers can never reserve the same runner.
    pub fn reserve_idle(&self, job_id: &str) -> Option<Runner> {
        let mut runners = self.runners.lock();

        let id = Self::select_idle(&runners, Utc::now(), self.staleness)?
            .id
            .clone();
        let runner = runners.get_mut(&id)?;
        runner.busy = true;
        runner.current_job = Some(job_id.to_string());

        tracing::debug!("Runner {} reserved for job {}", id, job_id);
        Some(runner.clone())
    }

    /// Mark a runner busy or idle; no-op for unknown ids
    pub fn set_busy(&self, id: &str, busy: bool) -> bool {
        let mut runners = self.runners.lock();

        let Some(runner) = runners.get_mut(id) else {
            tracing::warn!("Runner {} not found for busy update", id);
            return false;
        };

        runner.busy = busy;
        if !busy {
            runner.current_job = None;
            tracing::info!("Runner {} is now idle", id);
        } else {
            tracing::info!("Runner {} marked busy", id);
        }
        true
    }

    /// Release a runner that finished (or never received) `job_id`
    ///
    /// A runner already reassigned to another job is left busy, so a late or
    /// duplicate report cannot free a runner that is working.
    pub fn release(&self, id: &str, job_id: &str) -> bool {
        let mut runners = self.runners.lock();

        let Some(runner) = runners.get_mut(id) else {
            tracing::warn!("Runner {} not found for release", id);
            return false;
        };

        match runner.current_job.as_deref() {
            Some(current) if current != job_id => {
                tracing::debug!(
                    "Runner {} is on job {}, ignoring release for job {}",
                    id,
                    current,
                    job_id
                );
                false
            }
            _ => {
                runner.busy = false;
                runner.current_job = None;
                tracing::info!("Runner {} is now idle", id);
                true
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Runner> {
        self.runners.lock().get(id).cloned()
    }

    /// Copy of every entry
    pub fn snapshot(&self) -> HashMap<String, Runner> {
        self.runners.lock().clone()
    }

    /// Copies of the runners currently marked busy
    pub fn busy_runners(&self) -> Vec<Runner> {
        self.runners
            .lock()
            .values()
            .filter(|runner| runner.busy)
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> RegistryCounts {
        let now = Utc::now();
        let runners = self.runners.lock();

        let mut counts = RegistryCounts {
            total: runners.len(),
            ..Default::default()
        };
        for runner in runners.values() {
            if runner.busy {
                counts.busy += 1;
            }
            if runner.is_live(now, self.staleness) {
                counts.live += 1;
                if !runner.busy {
                    counts.idle += 1;
                }
            }
        }
        counts
    }

    fn select_idle(
        runners: &HashMap<String, Runner>,
        now: DateTime<Utc>,
        staleness: Duration,
    ) -> Option<&Runner> {
        runners
            .values()
            .filter(|runner| runner.is_idle(now, staleness))
            .min_by(|a, b| {
                a.last_heartbeat_at
                    .cmp(&b.last_heartbeat_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
    }
}
