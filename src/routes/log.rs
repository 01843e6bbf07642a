use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// `POST /api/log` — appends an arbitrary UI log entry. Free-form payload,
/// per §9's note that only truly free-form bodies remain as keyed maps.
pub async fn log(
    State(_state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    tracing::info!(target: "ui_log", payload = %body, "client log entry");
    Json(json!({ "logged": true }))
}
