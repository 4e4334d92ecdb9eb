//! Fleet DTOs
//!
//! Payloads for the per-host agent and the provider API responses the
//! controller reads.

use serde::{Deserialize, Serialize};

/// Registration credential forwarded to the agent so it can start a runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub token: String,
    /// Repository URL the runner registers against
    pub url: String,
}

/// Scale command sent to the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleCommand {
    pub action: ScaleAction,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleAction {
    Remove,
}

/// `GET /repos/{owner}/{repo}/actions/runs?status=queued`
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRunsPage {
    pub total_count: u32,
}

/// `GET /repos/{owner}/{repo}/actions/runners`
#[derive(Debug, Clone, Deserialize)]
pub struct RunnersPage {
    pub total_count: u32,
    #[serde(default)]
    pub runners: Vec<ProviderRunner>,
}

/// A runner as listed by the provider
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderRunner {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub busy: bool,
}

impl RunnersPage {
    /// Idle runners on this page only
    pub fn idle_count(&self) -> u32 {
        self.runners.iter().filter(|r| !r.busy).count() as u32
    }

    /// Whether another page follows, given `seen` runners read so far
    /// including this page
    pub fn has_more(&self, seen: u32) -> bool {
        !self.runners.is_empty() && seen < self.total_count
    }
}
