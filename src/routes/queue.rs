use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures_util::stream::Stream;
use serde::Deserialize;

use crate::error::AppResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub path: String,
    pub collection: String,
}

/// `POST /api/queue` — validates collection name and path deny-list,
/// returns 201 with the created job (§6).
pub async fn enqueue(
    State(state): State<AppState>,
    Json(body): Json<EnqueueRequest>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let job = state.queue.enqueue(body.path, body.collection)?;
    state.queue.notify_work();
    Ok((StatusCode::CREATED, Json(serde_json::to_value(job)?)))
}

/// `GET /api/queue` — current job list.
pub async fn list(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!(state.queue.snapshot()))
}

/// `DELETE /api/queue/:id` — cancels a pending job; 400 otherwise.
pub async fn cancel(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    state.queue.cancel(&job_id)?;
    Ok(Json(serde_json::json!({ "cancelled": job_id })))
}

/// `GET /api/queue/stream` — SSE: initial snapshot then an event on every
/// queue change.
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let initial = state.queue.snapshot();
    let mut updates = state.queue.subscribe();

    let events = async_stream::stream! {
        yield Ok(Event::default().data(serde_json::to_string(&initial).unwrap_or_default()));

        loop {
            match updates.recv().await {
                Ok(jobs) => {
                    yield Ok(Event::default().data(serde_json::to_string(&jobs).unwrap_or_default()));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(events)
}
