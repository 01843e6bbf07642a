use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::state::AppState;
use crate::vector_store::StoreHealth;

/// Bare liveness probe, no upstream check, no cache — distinct from the
/// richer `/api/health` below.
pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Upstream + local health snapshot, cached 15 s (§6).
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    if let Some(cached) = state.cache.get_health() {
        return Json(cached);
    }

    let upstream_ok = state.upstream.list_models().await.is_ok();

    let collections: Vec<serde_json::Value> = state
        .stores
        .known_collection_names()
        .into_iter()
        .map(|name| {
            let handle = state.stores.get_or_create(&name);
            let h = handle.read();
            let health = match h.store.health() {
                StoreHealth::Ok => "OK",
                StoreHealth::Corrupt(_) => "CORRUPT",
            };
            json!({ "collection": name, "health": health })
        })
        .collect();

    let body = json!({
        "status": if upstream_ok { "ok" } else { "degraded" },
        "upstreamReachable": upstream_ok,
        "collections": collections,
    });

    state.cache.put_health(body.clone());
    Json(body)
}

/// Graceful shutdown trigger for environments without signal delivery.
pub async fn shutdown(State(state): State<AppState>) -> Json<serde_json::Value> {
    tracing::info!("shutdown requested via HTTP endpoint");
    state.shutdown.notify_one();
    Json(json!({ "status": "shutting_down" }))
}
