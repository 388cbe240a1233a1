use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::future::Future;
use std::time::Instant;

use crate::app_state::AppState;
use crate::db::queries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Ok,
    Error,
}

#[derive(Serialize)]
pub struct Probe {
    pub status: ProbeStatus,
    pub latency_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct Backlog {
    /// Review jobs waiting to be claimed
    pub review_jobs: Option<i64>,
    /// Photos waiting for the classifier
    pub classifier_tasks: Option<u64>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: Probe,
    pub redis: Probe,
    pub backlog: Backlog,
}

async fn probe<F, T, E>(check: F) -> Probe
where
    F: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    match check.await {
        Ok(_) => Probe {
            status: ProbeStatus::Ok,
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(_) => Probe {
            status: ProbeStatus::Error,
            latency_ms: None,
        },
    }
}

/// GET /health — PostgreSQL and Redis reachability plus queue backlogs.
/// Responds 503 when either store is unreachable.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (database, redis) = futures::join!(
        probe(sqlx::query("SELECT 1").execute(&state.db)),
        probe(state.queue.health_check()),
    );

    let review_jobs = queries::pending_job_count(&state.db).await.ok();
    if let Some(depth) = review_jobs {
        metrics::gauge!("review_queue_depth").set(depth as f64);
    }
    let backlog = Backlog {
        review_jobs,
        classifier_tasks: state.queue.queue_depth().await.ok(),
    };

    let healthy = database.status == ProbeStatus::Ok && redis.status == ProbeStatus::Ok;
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthResponse {
            status: if healthy { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            database,
            redis,
            backlog,
        }),
    )
}
