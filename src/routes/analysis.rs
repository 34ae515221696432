use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::{AnalysisJob, QueueStatus};
use crate::services::queue::QueueError;

fn status_for(err: QueueError) -> StatusCode {
    match err {
        QueueError::ImageNotFound(_) => StatusCode::NOT_FOUND,
        QueueError::Store(e) => {
            tracing::error!(error = %e, "Job store error");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// POST /api/v1/analysis/images/{image_id}: queue an image for analysis.
pub async fn enqueue_image(
    State(state): State<AppState>,
    Path(image_id): Path<i64>,
) -> Result<(StatusCode, Json<AnalysisJob>), StatusCode> {
    let job = state.queue.enqueue(image_id).await.map_err(status_for)?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

/// GET /api/v1/analysis/images/{image_id}
pub async fn get_job_by_image(
    State(state): State<AppState>,
    Path(image_id): Path<i64>,
) -> Result<Json<AnalysisJob>, StatusCode> {
    state
        .queue
        .get_by_image(image_id)
        .await
        .map_err(status_for)?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// GET /api/v1/analysis/jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<AnalysisJob>, StatusCode> {
    state
        .queue
        .get_by_id(job_id)
        .await
        .map_err(status_for)?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// GET /api/v1/analysis/inspections/{inspection_id}
pub async fn get_jobs_by_inspection(
    State(state): State<AppState>,
    Path(inspection_id): Path<i64>,
) -> Result<Json<Vec<AnalysisJob>>, StatusCode> {
    let jobs = state
        .queue
        .get_by_inspection(inspection_id)
        .await
        .map_err(status_for)?;
    Ok(Json(jobs))
}

/// GET /api/v1/analysis/queue
pub async fn queue_status(State(state): State<AppState>) -> Result<Json<QueueStatus>, StatusCode> {
    let status = state.queue.queue_status().await.map_err(status_for)?;
    Ok(Json(status))
}
