use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;

use super::error::ApiError;
use crate::app_state::AppState;
use crate::models::job::JobView;
use crate::models::submission::{SubmitJobRequest, SubmitJobResponse};

/// POST /api/v1/jobs: queue an image for detection.
pub async fn submit_job(
    State(state): State<AppState>,
    payload: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;
    request
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    let job = state.submitter.submit(&request.image_url).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id: job.job_id,
            status: "queued".to_string(),
        }),
    ))
}

/// GET /api/v1/jobs/{job_id}: current state of a job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let job_id = job_id.trim();
    if job_id.is_empty() {
        return Err(ApiError::Validation("job id is required".to_string()));
    }

    let view = state.status.get_status(job_id).await?;
    Ok(Json(view))
}
