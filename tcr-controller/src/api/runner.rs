//! Runner API Handlers
//!
//! Heartbeats and registry inspection.

use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, Query, State, rejection::QueryRejection},
};
use tcr_core::domain::runner::{DEFAULT_RUNNER_PORT, Runner};
use tcr_core::dto::runner::HeartbeatQuery;

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

/// GET|POST /heartbeat?id=..&port=..
/// Register or refresh a runner
///
/// The runner's address is the source of the connection.
pub async fn heartbeat(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    query: Result<Query<HeartbeatQuery>, QueryRejection>,
) -> ApiResult<Json<Runner>> {
    let Query(query) = query.map_err(ApiError::from)?;
    let id = query.id.trim();
    if id.is_empty() {
        return Err(ApiError::BadRequest("missing id".to_string()));
    }

    let port = query.port.unwrap_or(DEFAULT_RUNNER_PORT);
    tracing::debug!("Heartbeat from runner {} ({}:{})", id, peer.ip(), port);

    Ok(Json(state.registry.heartbeat(id, peer.ip(), port)))
}

/// GET /runners
/// Registry snapshot, sorted by id
pub async fn list_runners(State(state): State<AppState>) -> Json<Vec<Runner>> {
    let mut runners: Vec<Runner> = state.registry.snapshot().into_values().collect();
    runners.sort_by(|a, b| a.id.cmp(&b.id));
    Json(runners)
}
