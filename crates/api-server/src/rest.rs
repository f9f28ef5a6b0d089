//! REST API handlers for cohort management and operational endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use convolens_cohorts::{
    Cohort, CohortRegistry, CreateCohort, CriteriaNode, PreviewResult, RefreshOutcome,
    RefreshRecord,
};
use convolens_core::ConvoError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};
use uuid::Uuid;

/// Maximum cohort name length.
const MAX_NAME_LEN: usize = 256;

/// Maximum explicit candidate list size per refresh request.
const MAX_CANDIDATES: usize = 10_000;

/// Preview sample size default and cap.
const DEFAULT_PREVIEW_SAMPLE: usize = 20;
const MAX_PREVIEW_SAMPLE: usize = 100;

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<CohortRegistry>,
    pub node_id: String,
    pub start_time: Instant,
}

#[derive(Debug, Deserialize, Default)]
pub struct RefreshRequest {
    /// Explicit candidate scope; the whole candidate universe when absent.
    #[serde(default)]
    pub candidate_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub criteria: CriteriaNode,
    #[serde(default)]
    pub sample_size: Option<usize>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(error: &str, message: impl Into<String>) -> ApiError {
    metrics::counter!("api.validation_errors").increment(1);
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

fn map_error(e: ConvoError) -> ApiError {
    match e {
        ConvoError::InvalidCriteria(_) => bad_request("invalid_criteria", e.to_string()),
        ConvoError::InvalidCohortType(_) => bad_request("invalid_cohort_type", e.to_string()),
        ConvoError::CohortNotFound(id) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "cohort_not_found".to_string(),
                message: format!("cohort {id} does not exist"),
            }),
        ),
        other => {
            error!(error = %other, "request failed");
            metrics::counter!("api.errors").increment(1);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "internal_error".to_string(),
                    message: "Internal processing error".to_string(),
                }),
            )
        }
    }
}

/// POST /v1/cohorts — create a cohort.
pub async fn create_cohort(
    State(state): State<AppState>,
    Json(req): Json<CreateCohort>,
) -> Result<(StatusCode, Json<Cohort>), ApiError> {
    // Validate input at API boundary
    if req.name.trim().is_empty() {
        warn!("Cohort creation rejected: empty name");
        return Err(bad_request("invalid_cohort", "cohort 'name' must not be empty"));
    }
    if req.name.len() > MAX_NAME_LEN {
        warn!(len = req.name.len(), "Cohort creation rejected: name too long");
        return Err(bad_request(
            "invalid_cohort",
            "cohort 'name' exceeds maximum length",
        ));
    }

    let cohort = state.registry.create(req).map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(cohort)))
}

/// GET /v1/cohorts — list all cohorts.
pub async fn list_cohorts(State(state): State<AppState>) -> Json<Vec<Cohort>> {
    Json(state.registry.list())
}

/// GET /v1/cohorts/{id} — fetch one cohort.
pub async fn get_cohort(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Cohort>, ApiError> {
    state
        .registry
        .get(id)
        .map(Json)
        .ok_or_else(|| map_error(ConvoError::CohortNotFound(id)))
}

/// DELETE /v1/cohorts/{id} — remove a cohort and its membership.
pub async fn delete_cohort(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.registry.remove(id).await.map_err(map_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/cohorts/{id}/refresh — recompute membership from criteria.
pub async fn refresh_cohort(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<RefreshRequest>>,
) -> Result<Json<RefreshOutcome>, ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    if let Some(ids) = &req.candidate_ids {
        if ids.len() > MAX_CANDIDATES {
            warn!(count = ids.len(), "Refresh rejected: candidate list too large");
            return Err(bad_request(
                "invalid_refresh",
                "candidate list exceeds maximum size",
            ));
        }
    }

    let outcome = state
        .registry
        .refresh_cohort(id, req.candidate_ids)
        .await
        .map_err(map_error)?;
    Ok(Json(outcome))
}

/// GET /v1/cohorts/{id}/members — current membership ids.
pub async fn cohort_members(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Uuid>>, ApiError> {
    let members = state.registry.members(id).await.map_err(map_error)?;
    Ok(Json(members.into_iter().collect()))
}

/// GET /v1/cohorts/{id}/refreshes — refresh run history.
pub async fn refresh_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<RefreshRecord>>, ApiError> {
    if state.registry.get(id).is_none() {
        return Err(map_error(ConvoError::CohortNotFound(id)));
    }
    Ok(Json(state.registry.refresh_history(id)))
}

/// POST /v1/cohorts/preview — evaluate criteria against the candidate
/// universe without persisting anything.
pub async fn preview_criteria(
    State(state): State<AppState>,
    Json(req): Json<PreviewRequest>,
) -> Result<Json<PreviewResult>, ApiError> {
    let sample_size = req
        .sample_size
        .unwrap_or(DEFAULT_PREVIEW_SAMPLE)
        .min(MAX_PREVIEW_SAMPLE);
    let result = state
        .registry
        .preview(&req.criteria, sample_size)
        .await
        .map_err(map_error)?;
    Ok(Json(result))
}

/// GET /health — Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        cohorts: state.registry.list().len(),
    })
}

/// GET /ready — Readiness probe for Kubernetes.
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.start_time.elapsed().as_secs() > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live — Liveness probe for Kubernetes.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub cohorts: usize,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}
