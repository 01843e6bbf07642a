use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Error taxonomy per the design's propagation policy: the core surfaces
/// errors to the HTTP boundary or job status rather than swallowing them.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid collection name: {0}")]
    InvalidCollectionName(String),

    #[error("path not allowed: {0}")]
    PathNotAllowed(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream error: {0}")]
    UpstreamError(String),

    #[error("model mismatch: {0}")]
    ModelMismatch(String),

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("store corrupt: {0}")]
    StoreCorrupt(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Wrap a `NotReady` message with the `ollama pull` command the client
    /// should run, per §7's "actionable `pullCommand`" requirement.
    pub fn not_ready_with_pull(detail: impl Into<String>, model: &str) -> Self {
        AppError::NotReady(format!("{} (try: ollama pull {})", detail.into(), model))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, type_) = match &self {
            AppError::InvalidCollectionName(_) => (StatusCode::BAD_REQUEST, "input_validation"),
            AppError::PathNotAllowed(_) => (StatusCode::FORBIDDEN, "input_validation"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "input_validation"),
            AppError::NotReady(_) => (StatusCode::SERVICE_UNAVAILABLE, "not_ready"),
            AppError::UpstreamUnavailable(_) => (StatusCode::BAD_GATEWAY, "upstream_unavailable"),
            AppError::UpstreamError(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            AppError::ModelMismatch(_) => (StatusCode::INTERNAL_SERVER_ERROR, "model_mismatch"),
            AppError::DimensionMismatch(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "dimension_mismatch")
            }
            AppError::StoreCorrupt(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_corrupt"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            AppError::Serde(_) => (StatusCode::BAD_REQUEST, "input_validation"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        // `Internal` carries arbitrary context useful for logs only; the
        // client gets a generic message instead of leaking it.
        let detail = match &self {
            AppError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };

        let body = json!({
            "type": type_,
            "status": status.as_u16(),
            "detail": detail,
        });

        (status, Json(body)).into_response()
    }
}

/// An inline SSE error event, emitted once the stream has already started
/// and an HTTP status code can no longer be sent (§4.7, §7).
pub fn sse_error_payload(message: impl Into<String>) -> serde_json::Value {
    json!({ "type": "error", "message": message.into() })
}

pub type AppResult<T> = Result<T, AppError>;
