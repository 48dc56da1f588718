use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::app_state::AppState;

/// Prometheus metrics scrape endpoint.
/// Refreshes the queue depth gauge before rendering.
pub async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    let Some(handle) = state.metrics.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match state.publisher.queue_depth().await {
        Ok(depth) => metrics::gauge!("queue_depth").set(depth as f64),
        Err(e) => tracing::warn!(error = %e, "Failed to read queue depth"),
    }

    handle.render().into_response()
}
