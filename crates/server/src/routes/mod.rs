//! Route handlers for the seqrelay server.

pub mod config;
pub mod downloads;
pub mod health;
pub mod metrics;
pub mod ws;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router.
///
/// Routes:
/// - GET  /ws            - WebSocket job start/resume
/// - GET  /api/health    - Health check
/// - GET  /metrics       - Prometheus metrics
/// - GET  /getconfig     - Search config as an ordered list
/// - GET  /config        - Search config as an object
/// - POST /config        - Update search config
/// - GET  /download      - Result artifact as attachment
/// - GET  /preview       - Report PDF inline
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(ws::router())
        .nest("/api", health::router())
        .merge(metrics::router())
        .merge(config::router())
        .merge(downloads::router())
        .with_state(state)
}
