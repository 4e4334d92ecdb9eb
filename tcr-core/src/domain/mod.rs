//! Core domain types
//!
//! These types represent the state owned by the controller (jobs, runners)
//! and the signals it observes about the wider fleet. They are also the JSON
//! shapes exposed on the read endpoints.

pub mod fleet;
pub mod job;
pub mod runner;
