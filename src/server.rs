use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::{compression::CompressionLayer, cors::{Any, CorsLayer}, trace::TraceLayer};

use crate::routes;
use crate::state::AppState;

/// Wires the full `/api/*` surface plus the bare `/healthz` and `/shutdown`
/// operational endpoints. No auth layer — this service has none (§1).
pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/shutdown", post(routes::health::shutdown))
        .route("/api/health", get(routes::health::health))
        .route("/api/models", get(routes::models::models))
        .route("/api/browse", get(routes::browse::browse))
        .route(
            "/api/queue",
            get(routes::queue::list).post(routes::queue::enqueue),
        )
        .route("/api/queue/stream", get(routes::queue::stream))
        .route("/api/queue/{id}", delete(routes::queue::cancel))
        .route("/api/index/metrics", get(routes::metrics::metrics))
        .route("/api/chat", post(routes::chat::chat))
        .route("/api/log", post(routes::log::log))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}
