//! Runner domain model
//!
//! Represents a worker process that executes one job at a time and reports
//! heartbeats and results back to the controller.

use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Port assumed when a heartbeat does not carry one
pub const DEFAULT_RUNNER_PORT: u16 = 8081;

/// A runner known to the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runner {
    /// Identifier chosen by the runner itself
    pub id: String,

    /// Source address of the last heartbeat, taken from the transport
    ///
    /// IPv4-mapped IPv6 addresses are stored as plain IPv4.
    pub address: IpAddr,

    /// Port the runner's job endpoint listens on
    pub port: u16,

    /// When the first heartbeat was received
    pub registered_at: DateTime<Utc>,

    /// When the last heartbeat was received
    pub last_heartbeat_at: DateTime<Utc>,

    /// Whether the runner is executing (or about to receive) a job
    pub busy: bool,

    /// Job the runner was last given, cleared when it is released
    #[serde(default)]
    pub current_job: Option<String>,
}

impl Runner {
    /// Creates an idle runner seen for the first time at `now`
    pub fn new(
        id: impl Into<String>,
        address: IpAddr,
        port: u16,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            address: address.to_canonical(),
            port,
            registered_at: now,
            last_heartbeat_at: now,
            busy: false,
            current_job: None,
        }
    }

    /// A runner is live while its last heartbeat is younger than `staleness`
    pub fn is_live(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        now - self.last_heartbeat_at < staleness
    }

    /// Live and not busy
    pub fn is_idle(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        !self.busy && self.is_live(now, staleness)
    }

    /// Socket the runner's job endpoint listens on
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Base URL of the runner's HTTP endpoint; IPv6 hosts are bracketed
    pub fn endpoint(&self) -> String {
        format!("http://{}", self.socket_addr())
    }
}
