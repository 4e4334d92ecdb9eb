//! Runner DTOs
//!
//! Data transfer objects for runner-related operations.

use serde::{Deserialize, Serialize};

/// Query string of a runner heartbeat (`/heartbeat?id=..&port=..`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatQuery {
    /// Identifier chosen by the runner
    pub id: String,

    /// Port of the runner's job endpoint, defaults to 8081
    #[serde(default)]
    pub port: Option<u16>,
}

/// Summary of the registry, used by the metrics endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegistryCounts {
    pub total: usize,
    pub live: usize,
    pub idle: usize,
    pub busy: usize,
}
