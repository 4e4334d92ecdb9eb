//! Shared application state
//!
//! Built once at startup and cloned into every handler and background loop.

use std::sync::Arc;

use crate::service::autoscaler::FleetProvisioner;
use crate::service::dispatcher::Dispatcher;
use crate::service::metrics::Metrics;
use crate::service::queue::JobQueue;
use crate::service::registry::RunnerRegistry;
use crate::service::results::ResultIngestor;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub registry: Arc<RunnerRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub results: Arc<ResultIngestor>,
    pub metrics: Arc<Metrics>,
    /// Used by the manual registration endpoint; `None` when unconfigured
    pub provisioner: Option<Arc<dyn FleetProvisioner>>,
}

impl AppState {
    /// Wire the services around one queue and one registry
    pub fn new(
        queue: Arc<JobQueue>,
        registry: Arc<RunnerRegistry>,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<Metrics>,
        provisioner: Option<Arc<dyn FleetProvisioner>>,
    ) -> Self {
        let results = Arc::new(ResultIngestor::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
            Arc::clone(&metrics),
        ));

        Self {
            queue,
            registry,
            dispatcher,
            results,
            metrics,
            provisioner,
        }
    }
}
