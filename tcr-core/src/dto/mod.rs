//! Data Transfer Objects
//!
//! Payloads exchanged between the controller and its peers: runners
//! (heartbeats, results), the per-host agent (registration, scale commands)
//! and the upstream provider API.

pub mod fleet;
pub mod job;
pub mod runner;
