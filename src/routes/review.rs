use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::verification::{
    EnqueueRequest, EnqueueResponse, ReverifyRequest, UserVerificationState,
};
use crate::services::sweep::SweepReport;

/// POST /api/v1/reviews — queue a profile for review.
pub async fn enqueue_review(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), StatusCode> {
    request
        .validate()
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    let job = state
        .store
        .enqueue(request.user_id, request.event)
        .await
        .map_err(|e| {
            tracing::error!(user_id = %request.user_id, error = %e, "Failed to enqueue review");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let response = match job {
        Some(job) => {
            metrics::counter!("review_jobs_enqueued_total", "event" => request.event.to_string())
                .increment(1);
            tracing::info!(
                job_id = %job.id,
                user_id = %request.user_id,
                event = %request.event,
                "Review job queued"
            );
            (
                StatusCode::ACCEPTED,
                Json(EnqueueResponse {
                    queued: true,
                    job: Some(job),
                    message: "Profile queued for review".to_string(),
                }),
            )
        }
        None => (
            StatusCode::OK,
            Json(EnqueueResponse {
                queued: false,
                job: None,
                message: "A review is already queued for this profile".to_string(),
            }),
        ),
    };
    Ok(response)
}

/// POST /api/v1/reverify — run the lenient reverification sweep.
pub async fn reverify(
    State(state): State<AppState>,
    Json(request): Json<ReverifyRequest>,
) -> Result<Json<SweepReport>, StatusCode> {
    request
        .validate()
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    let report = state
        .sweep()
        .run(request.limit, request.dry_run)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Reverification sweep failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    Ok(Json(report))
}

/// GET /api/v1/users/{user_id}/verification — current verification state.
pub async fn get_verification(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserVerificationState>, StatusCode> {
    state
        .store
        .verification(user_id)
        .await
        .map_err(|e| {
            tracing::error!(user_id = %user_id, error = %e, "Failed to load verification");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
