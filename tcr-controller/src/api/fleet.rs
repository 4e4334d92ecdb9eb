//! Fleet API Handlers
//!
//! Manual runner provisioning and controller metrics.

use axum::{
    Json,
    extract::State,
    http::header,
    response::IntoResponse,
};
use serde::Serialize;

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Serialize)]
pub struct RegistrationTriggered {
    pub message: String,
}

/// POST /register-hybrid
/// Provision one runner now, outside the autoscaler
pub async fn register_hybrid(
    State(state): State<AppState>,
) -> ApiResult<Json<RegistrationTriggered>> {
    let Some(provisioner) = state.provisioner.as_ref() else {
        return Err(ApiError::Unavailable(
            "runner provisioning is not configured".to_string(),
        ));
    };

    provisioner.scale_up_one().await?;
    state.metrics.scale_up_unit();

    Ok(Json(RegistrationTriggered {
        message: "Hybrid runner registration triggered.".to_string(),
    }))
}

/// GET /metrics
/// Prometheus scrape endpoint; queue and registry gauges are taken fresh
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .render(state.queue.counts(), state.registry.counts());
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body)
}
