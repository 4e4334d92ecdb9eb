//! Autoscaling Poller
//!
//! Periodically compares upstream demand with the runner fleet and asks the
//! agent for more (or fewer) runners. Query failures back the polling delay
//! off exponentially; provisioning failures are only logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tcr_client::{AgentClient, ProviderClient};
use tcr_core::domain::fleet::DemandSignals;
use tcr_core::dto::fleet::AgentRegistration;
use tokio_util::sync::CancellationToken;

use crate::service::metrics::Metrics;
use crate::service::tasks::guarded;

/// Upper bound for the backed-off polling delay
pub const MAX_POLL_BACKOFF: Duration = Duration::from_secs(60);

/// Where demand and capacity come from
#[async_trait]
pub trait DemandSource: Send + Sync {
    async fn signals(&self) -> tcr_client::Result<DemandSignals>;
}

#[async_trait]
impl DemandSource for ProviderClient {
    async fn signals(&self) -> tcr_client::Result<DemandSignals> {
        let (queued, runners) = tokio::try_join!(self.count_queued_runs(), self.runner_counts())?;
        Ok(DemandSignals { queued, runners })
    }
}

/// Something that can grow or shrink the fleet
#[async_trait]
pub trait FleetProvisioner: Send + Sync {
    /// Add one runner to the fleet
    async fn scale_up_one(&self) -> tcr_client::Result<()>;

    /// Remove up to `count` idle runners; `Ok(false)` if not supported
    async fn scale_down(&self, count: u32) -> tcr_client::Result<bool>;
}

/// Provisions runners by handing registration tokens to the host agent
#[derive(Debug, Clone)]
pub struct AgentProvisioner {
    provider: ProviderClient,
    agent: AgentClient,
}

impl AgentProvisioner {
    pub fn new(provider: ProviderClient, agent: AgentClient) -> Self {
        Self { provider, agent }
    }
}

#[async_trait]
impl FleetProvisioner for AgentProvisioner {
    async fn scale_up_one(&self) -> tcr_client::Result<()> {
        let token = self.provider.registration_token().await?;
        let registration = AgentRegistration {
            token: token.token,
            url: self.provider.repository_url(),
        };

        self.agent.register(&registration).await?;
        tracing::info!(
            "Registration token sent to agent at {}",
            self.agent.registration_url()
        );
        Ok(())
    }

    async fn scale_down(&self, count: u32) -> tcr_client::Result<bool> {
        self.agent.scale_down(count).await
    }
}

/// Limits applied to every scaling decision
#[derive(Debug, Clone)]
pub struct ScalingPolicy {
    /// Base polling interval
    pub poll_interval: Duration,
    /// Most runners added or removed per tick
    pub max_scale_step: u32,
    /// Fleet size that scale-up never exceeds
    pub global_max_runners: u32,
    /// Pause between consecutive scale-up units
    pub spawn_spacing: Duration,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            max_scale_step: 3,
            global_max_runners: 20,
            spawn_spacing: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    Up(u32),
    Down(u32),
    Hold,
}

/// Pure scaling rule
///
/// `need = queued - idle`. A positive need is clamped by the remaining fleet
/// capacity and the step size; otherwise the idle surplus is trimmed, also
/// clamped by the step size.
pub fn decide(signals: DemandSignals, policy: &ScalingPolicy) -> ScaleDecision {
    let queued = i64::from(signals.queued);
    let idle = i64::from(signals.runners.idle);
    let total = i64::from(signals.runners.total);
    let step = i64::from(policy.max_scale_step);

    let need = queued - idle;
    if need > 0 {
        let capacity = i64::from(policy.global_max_runners) - total;
        if capacity <= 0 {
            return ScaleDecision::Hold;
        }
        let count = need.min(capacity).min(step);
        return u32::try_from(count).map_or(ScaleDecision::Hold, ScaleDecision::Up);
    }

    let trim = (idle - queued).min(step);
    if trim > 0 {
        return u32::try_from(trim).map_or(ScaleDecision::Hold, ScaleDecision::Down);
    }
    ScaleDecision::Hold
}

/// Polling delay with exponential backoff on failures
#[derive(Debug, Clone)]
pub struct PollBackoff {
    base: Duration,
    cap: Duration,
    failures: u32,
}

impl PollBackoff {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            cap: MAX_POLL_BACKOFF,
            failures: 0,
        }
    }

    /// Delay before the next poll
    ///
    /// Doubles with each consecutive failure, capped at 60s, and never drops
    /// below the base interval (a base above the cap wins).
    pub fn delay(&self) -> Duration {
        let factor = 1u32.checked_shl(self.failures).unwrap_or(u32::MAX);
        self.base
            .saturating_mul(factor)
            .min(self.cap.max(self.base))
    }

    /// Record a failed query; returns the new delay
    pub fn on_failure(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.delay()
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

pub struct Autoscaler {
    source: Arc<dyn DemandSource>,
    provisioner: Arc<dyn FleetProvisioner>,
    policy: ScalingPolicy,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for Autoscaler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Autoscaler")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Autoscaler {
    pub fn new(
        source: Arc<dyn DemandSource>,
        provisioner: Arc<dyn FleetProvisioner>,
        policy: ScalingPolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            source,
            provisioner,
            policy,
            metrics,
        }
    }

    /// Poll until `shutdown` is cancelled
    ///
    /// The first poll happens one interval after start. A panicking tick is
    /// logged and leaves the delay unchanged.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut backoff = PollBackoff::new(self.policy.poll_interval);
        tracing::info!(
            "Starting autoscaler (interval: {:?}, step: {}, max runners: {})",
            self.policy.poll_interval, self.policy.max_scale_step, self.policy.global_max_runners
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(backoff.delay()) => {}
            }

            let autoscaler = Arc::clone(&self);
            match guarded("autoscaler", async move { autoscaler.tick().await }).await {
                Some(Ok(_)) => backoff.reset(),
                Some(Err(err)) => {
                    let delay = backoff.on_failure();
                    tracing::warn!("Poll failed: {} (next poll in {:?})", err, delay);
                }
                None => {}
            }
        }

        tracing::info!("Autoscaler stopped");
    }

    /// One poll: query signals, decide, provision
    ///
    /// Only a failed query is returned as an error.
    pub async fn tick(&self) -> tcr_client::Result<ScaleDecision> {
        let signals = match self.source.signals().await {
            Ok(signals) => signals,
            Err(err) => {
                self.metrics.poll_error();
                return Err(err);
            }
        };

        tracing::info!(
            "Poll: queued={} total_runners={} idle={}",
            signals.queued, signals.runners.total, signals.runners.idle
        );

        let decision = decide(signals, &self.policy);
        match decision {
            ScaleDecision::Up(count) => self.scale_up(count).await,
            ScaleDecision::Down(count) => self.scale_down(count).await,
            ScaleDecision::Hold => {
                if signals.queued > signals.runners.idle {
                    tracing::warn!(
                        "Cannot scale up: reached global max of {} runners",
                        self.policy.global_max_runners
                    );
                } else {
                    tracing::debug!("Fleet matches demand");
                }
            }
        }

        Ok(decision)
    }

    /// Issue `count` scale-up units, spaced apart
    ///
    /// Stops at the first failure; the next tick recomputes the need.
    async fn scale_up(&self, count: u32) {
        tracing::info!("Scaling up by {}", count);

        for unit in 0..count {
            if unit > 0 {
                tokio::time::sleep(self.policy.spawn_spacing).await;
            }
            match self.provisioner.scale_up_one().await {
                Ok(()) => self.metrics.scale_up_unit(),
                Err(err) => {
                    tracing::error!("Scale-up unit {}/{} failed: {}", unit + 1, count, err);
                    return;
                }
            }
        }
    }

    async fn scale_down(&self, count: u32) {
        self.metrics.scale_down_request();
        match self.provisioner.scale_down(count).await {
            Ok(true) => tracing::info!("Requested removal of {} idle runner(s)", count),
            Ok(false) => tracing::info!("Scale-down requested: {} (no agent endpoint, ignoring)", count),
            Err(err) => tracing::error!("Scale-down of {} failed: {}", count, err),
        }
    }
}
