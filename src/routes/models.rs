use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::state::AppState;

/// Lists upstream models; marks the configured `embed` and `chat` models
/// installed/missing; `ready` true iff both present (§6).
pub async fn models(State(state): State<AppState>) -> Json<serde_json::Value> {
    let installed = state.upstream.list_models().await.unwrap_or_default();

    let embedding_installed = installed.iter().any(|m| m == &state.config.embedding_model);
    let chat_installed = installed.iter().any(|m| m == &state.config.chat_model);

    Json(json!({
        "installed": installed,
        "embeddingModel": {
            "name": state.config.embedding_model,
            "installed": embedding_installed,
        },
        "chatModel": {
            "name": state.config.chat_model,
            "installed": chat_installed,
        },
        "ready": embedding_installed && chat_installed,
    }))
}
