use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::Json;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;

use crate::error::AppResult;
use crate::query_pipeline::run_chat;
use crate::state::AppState;
use crate::upstream::ChatMessage as UpstreamChatMessage;

#[derive(Debug, Deserialize)]
pub struct ChatRequestMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatRequestMessage>,
    #[serde(default)]
    pub collection: Option<String>,
}

/// `POST /api/chat` — see the 8-step pipeline in `query_pipeline::run_chat`.
/// Errors before the SSE header is sent surface as a normal `AppError`
/// (HTTP 500/503/etc); once the stream starts, failures become inline
/// `{"type":"error",...}` events instead (§4.7).
pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>> {
    let collection = body.collection.unwrap_or_else(|| "default".to_string());
    let messages: Vec<UpstreamChatMessage> = body
        .messages
        .into_iter()
        .map(|m| UpstreamChatMessage {
            role: m.role,
            content: m.content,
        })
        .collect();

    let events = run_chat(
        messages,
        collection,
        state.config.clone(),
        state.upstream.clone(),
        state.stores.clone(),
        state.logger.clone(),
    )
    .await?;

    let sse_events = events.map(|value| Ok(Event::default().data(value.to_string())));
    Ok(Sse::new(sse_events))
}
