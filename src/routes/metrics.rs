use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::sync::Arc;

use crate::db::queries;

/// State for the scrape endpoint.
#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub db: PgPool,
}

/// GET /metrics — Prometheus text exposition. Refreshes the review queue
/// depth gauge before rendering.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    match queries::pending_job_count(&state.db).await {
        Ok(depth) => metrics::gauge!("review_queue_depth").set(depth as f64),
        Err(e) => tracing::debug!(error = %e, "Could not refresh queue depth"),
    }
    state.handle.render()
}
