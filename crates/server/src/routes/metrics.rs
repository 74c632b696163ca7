//! `GET /metrics`: broker and connection metrics for Prometheus scrapes.

use std::sync::Arc;

use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use metrics::gauge;

use crate::error::{ApiError, ApiResult};
use crate::metrics::render_metrics;
use crate::state::AppState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(scrape))
}

/// Refresh the job gauges from the broker, then render the exposition text.
pub async fn scrape(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let stats = state.broker.stats();
    gauge!("live_jobs").set(stats.jobs as f64);
    gauge!("running_jobs").set(stats.running as f64);

    let body = render_metrics()
        .ok_or_else(|| ApiError::Unavailable("metrics recorder not installed".into()))?;
    Ok(([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body))
}
