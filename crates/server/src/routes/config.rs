// crates/server/src/routes/config.rs
//! Search configuration endpoints.
//!
//! - GET  /getconfig - values as an ordered list (older clients)
//! - GET  /config    - values keyed by name
//! - POST /config    - replace all values

use std::sync::Arc;

use axum::{
    extract::State,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ApiError, ApiResult};
use crate::search_config::SearchConfig;
use crate::state::AppState;

/// Request body fields, in the order `update_config` destructures them.
const REQUIRED_FIELDS: [&str; 6] = [
    "database",
    "program",
    "outputQty",
    "filterSelect",
    "nonAnomaly",
    "speciesName",
];

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct UpdateConfigResponse {
    pub status: String,
    pub config: SearchConfig,
}

/// GET /getconfig
pub async fn get_config_list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<String>>> {
    let config = state.search_config.load().await?;
    Ok(Json(config.values().iter().map(|v| v.to_string()).collect()))
}

/// GET /config
pub async fn get_config(State(state): State<Arc<AppState>>) -> ApiResult<Json<SearchConfig>> {
    Ok(Json(state.search_config.load().await?))
}

/// POST /config
///
/// Every field must be present and non-blank; numbers are accepted and
/// stored as text.
pub async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Map<String, Value>>,
) -> ApiResult<Json<UpdateConfigResponse>> {
    let mut values = Vec::with_capacity(REQUIRED_FIELDS.len());
    let mut missing = Vec::new();
    for field in REQUIRED_FIELDS {
        match body.get(field).and_then(field_text) {
            Some(value) => values.push(value),
            None => missing.push(field),
        }
    }
    if !missing.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "Missing config fields: {}",
            missing.join(", ")
        )));
    }

    let [database, program, output_qty, filter, non_anomaly, species_name]: [String; 6] = values
        .try_into()
        .map_err(|_| ApiError::Internal("config field count mismatch".into()))?;
    let update = SearchConfig {
        filter,
        output_qty,
        program,
        database,
        non_anomaly,
        species_name,
    };

    let config = state.search_config.save(&update).await?;
    tracing::info!(program = %config.program, database = %config.database, "search config updated");
    Ok(Json(UpdateConfigResponse {
        status: "ok".to_string(),
        config,
    }))
}

fn field_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/getconfig", get(get_config_list))
        .route("/config", get(get_config).post(update_config))
}
