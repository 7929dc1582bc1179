use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

use crate::metrics::MetricsRegistry;

#[derive(Clone)]
pub struct HttpState {
    pub metrics: Arc<MetricsRegistry>,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_metrics(
    State(state): State<HttpState>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let body = state.metrics.encode_text().map_err(|err| {
        tracing::error!(error = %err, "failed to render metrics");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to render metrics".to_string(),
        )
    })?;
    Ok(([(header::CONTENT_TYPE, state.metrics.content_type())], body))
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}
