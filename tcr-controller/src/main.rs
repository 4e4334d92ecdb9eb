use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tcr_client::{AgentClient, ProviderClient, RunnerClient};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod service;
pub mod state;

use config::Config;
use service::autoscaler::{AgentProvisioner, Autoscaler, FleetProvisioner};
use service::dispatcher::Dispatcher;
use service::metrics::Metrics;
use service::queue::JobQueue;
use service::reconciler::Reconciler;
use service::registry::RunnerRegistry;
use service::tasks::run_every;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "towerd=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();
    config.validate()?;

    tracing::info!("Starting tower controller...");
    tracing::info!("Mode: '{}'", config.mode);

    let queue = Arc::new(JobQueue::new());
    let registry = Arc::new(RunnerRegistry::new(config.heartbeat_staleness()));
    let metrics = Arc::new(Metrics::new().context("Failed to build metrics recorder")?);

    let runner_client = RunnerClient::with_timeout(config.dispatch().send_timeout)?;
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&queue),
        Arc::clone(&registry),
        Arc::new(runner_client),
        Arc::clone(&metrics),
        config.dispatch(),
    ));

    let provider = ProviderClient::new(config.provider())?;
    let agent = AgentClient::new(
        config.agent_registration_endpoint.clone(),
        config.agent_scale_down_endpoint.clone(),
    )?;
    let provisioner: Arc<dyn FleetProvisioner> =
        Arc::new(AgentProvisioner::new(provider.clone(), agent));

    let state = AppState::new(
        Arc::clone(&queue),
        Arc::clone(&registry),
        Arc::clone(&dispatcher),
        Arc::clone(&metrics),
        Some(Arc::clone(&provisioner)),
    );

    let shutdown = CancellationToken::new();
    let mut loops = Vec::new();

    let sweeper = Arc::clone(&dispatcher);
    loops.push(tokio::spawn(run_every(
        "dispatcher",
        config.dispatch_interval(),
        shutdown.clone(),
        move || {
            let dispatcher = Arc::clone(&sweeper);
            async move {
                dispatcher.sweep();
            }
        },
    )));

    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&queue),
        Arc::clone(&registry),
        Arc::clone(&dispatcher),
        Arc::clone(&metrics),
        config.dispatch_ack_timeout(),
    ));
    loops.push(tokio::spawn(run_every(
        "reconciler",
        config.reconcile_interval(),
        shutdown.clone(),
        move || {
            let reconciler = Arc::clone(&reconciler);
            async move {
                reconciler.tick();
            }
        },
    )));

    if config.polling_enabled() {
        let autoscaler = Arc::new(Autoscaler::new(
            Arc::new(provider),
            provisioner,
            config.scaling_policy(),
            Arc::clone(&metrics),
        ));
        loops.push(tokio::spawn(autoscaler.run(shutdown.clone())));
    } else {
        tracing::info!("Autoscaler disabled (MODE={})", config.mode);
    }

    // Build router with all API endpoints
    let app = api::create_router(state);

    let addr = config.bind_addr()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        }
        signal.cancel();
    });

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned())
    .await
    .context("Server error")?;

    // The server only returns after shutdown; make sure the loops see it too
    shutdown.cancel();
    for handle in loops {
        if let Err(e) = handle.await {
            tracing::error!("Background loop failed: {}", e);
        }
    }
    dispatcher.drain().await;

    tracing::info!("Tower controller stopped");
    Ok(())
}
