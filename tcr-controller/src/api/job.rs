//! Job API Handlers
//!
//! Job intake, listing, and the result callback runners post to.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Serialize;
use tcr_core::domain::job::Job;
use tcr_core::dto::job::{JobResultReport, NewJob};

use crate::api::error::{ApiError, ApiResult};
use crate::service::results::Ingested;
use crate::state::AppState;

/// Acknowledgement returned to a reporting runner
#[derive(Debug, Serialize)]
pub struct ResultAck {
    pub id: String,
    pub applied: bool,
}

/// GET /jobs
/// List every job in queue order
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<Job>> {
    Json(state.queue.list())
}

/// POST /jobs
/// Enqueue a job (manual intake)
pub async fn create_job(
    State(state): State<AppState>,
    payload: Result<Json<NewJob>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let Json(req) = payload.map_err(ApiError::from)?;
    if req.job_name.trim().is_empty() {
        return Err(ApiError::BadRequest("job_name cannot be empty".to_string()));
    }

    let job = state.queue.enqueue(req.into())?;
    state.metrics.job_enqueued();

    Ok((StatusCode::CREATED, Json(job)))
}

/// POST /job/result
/// Status callback from a runner
///
/// Always acknowledged once the body parses: repeated or unknown reports are
/// not an error for the runner.
pub async fn report_result(
    State(state): State<AppState>,
    payload: Result<Json<JobResultReport>, JsonRejection>,
) -> ApiResult<Json<ResultAck>> {
    let Json(report) = payload.map_err(ApiError::from)?;
    if report.id.trim().is_empty() {
        return Err(ApiError::BadRequest("id cannot be empty".to_string()));
    }

    tracing::debug!(
        "Result for job {} from runner {}: {:?}",
        report.id,
        report.runner_id,
        report.status
    );

    let ingested = state.results.ingest(&report);
    let applied = matches!(ingested.effect, Ingested::Started | Ingested::Completed(_));

    Ok(Json(ResultAck {
        id: report.id,
        applied,
    }))
}
