use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::state::AppState;
use crate::vector_store::StoreHealth;

/// `GET /api/index/metrics` — per-collection vector/dimension/model stats,
/// cached 5 s (§6).
pub async fn metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    if let Some(cached) = state.cache.get_metrics() {
        return Json(cached);
    }

    let collections: Vec<serde_json::Value> = state
        .stores
        .known_collection_names()
        .into_iter()
        .map(|name| {
            let handle = state.stores.get_or_create(&name);
            let h = handle.read();
            let health = match h.store.health() {
                StoreHealth::Ok => "OK",
                StoreHealth::Corrupt(reason) => {
                    tracing::error!(collection = %name, reason = %reason, "collection store is corrupt");
                    "CORRUPT"
                }
            };
            json!({
                "collection": name,
                "vectorCount": h.store.len(),
                "dimension": h.store.dims(),
                "embeddingModel": h.store.embedding_model(),
                "totalSizeBytes": h.store.total_size_bytes(),
                "health": health,
            })
        })
        .collect();

    let body = json!({ "collections": collections });
    state.cache.put_metrics(body.clone());
    Json(body)
}
