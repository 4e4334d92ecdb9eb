//! Service Module
//!
//! Control-plane logic. The queue and registry own all mutable state;
//! the dispatcher, result ingestion, reconciler and autoscaler act on them.

pub mod autoscaler;
pub mod dispatcher;
pub mod metrics;
pub mod queue;
pub mod reconciler;
pub mod registry;
pub mod results;
pub mod tasks;
