//! Fleet signals
//!
//! Demand and capacity as reported by the upstream provider, used by the
//! autoscaler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Runner counts reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunnerCounts {
    pub total: u32,
    pub idle: u32,
}

/// Everything the autoscaler observes in one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DemandSignals {
    /// Work items waiting upstream
    pub queued: u32,
    pub runners: RunnerCounts,
}

/// Short-lived credential that lets a new runner join the fleet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}
