// crates/server/src/lib.rs
//! seqrelay server library.
//!
//! Axum application around the job event broker: the `/ws` job protocol,
//! search configuration, result downloads, health and metrics.

pub mod cli;
pub mod error;
pub mod intake;
pub mod metrics;
pub mod routes;
pub mod search_config;
pub mod state;

pub use cli::Cli;
pub use error::*;
pub use intake::FastaIntakeRunner;
pub use self::metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use search_config::{SearchConfig, SearchConfigStore};
pub use state::AppState;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// When `static_dir` is set, its files are served under `/static` and as the
/// fallback for every other path (so `/` serves its `index.html`).
///
/// The job socket lives at `/ws`, not at `/`. A front end that opens
/// `ws://<host>/` (as the stock `static/index.js` does) must be pointed at
/// `ws://<host>/ws`; a plain GET on `/` is answered by the static fallback.
pub fn create_app(state: Arc<AppState>, static_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = api_routes(state);
    if let Some(dir) = static_dir {
        app = app
            .nest_service("/static", ServeDir::new(&dir))
            .fallback_service(ServeDir::new(&dir).append_index_html_on_directories(true));
    }

    app.layer(cors).layer(TraceLayer::new_for_http())
}
