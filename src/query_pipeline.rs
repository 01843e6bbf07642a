use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;

use crate::config::AppConfig;
use crate::error::{sse_error_payload, AppError};
use crate::ingestion::CollectionRegistry;
use crate::query_logger::{QueryLogCitation, QueryLogEntry, QueryLogger};
use crate::upstream::{ChatMessage, UpstreamClient};

const SYSTEM_PREAMBLE: &str =
    "Use ONLY the provided context to answer. If you are unsure, say you don't know.";

/// `lowConfidence = (resultCount == 0) OR (topScore < minScore + 0.1)` (§3).
fn low_confidence(result_count: usize, top_score: Option<f32>, min_score: f32) -> bool {
    result_count == 0 || top_score.map(|s| s < min_score + 0.1).unwrap_or(true)
}

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(rename = "headerContext")]
    pub header_context: String,
    pub score: f32,
    pub preview: String,
}

/// One event in the ordered SSE stream `/api/chat` emits (§4.7 step 6).
pub enum SseEvent {
    Status { message: String },
    Metadata { citations: Vec<Citation> },
    Token { content: String },
    Error { message: String },
}

impl SseEvent {
    pub fn into_json(self) -> serde_json::Value {
        match self {
            SseEvent::Status { message } => json!({ "type": "status", "message": message }),
            SseEvent::Metadata { citations } => json!({ "type": "metadata", "citations": citations }),
            SseEvent::Token { content } => json!({ "message": { "content": content } }),
            SseEvent::Error { message } => sse_error_payload(message),
        }
    }
}

fn estimate_tokens(word_count: usize) -> usize {
    (1.3 * word_count as f64).ceil() as usize
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Runs the 8-step `/api/chat` pipeline and yields ordered SSE events. The
/// stream ends once the upstream chat stream is exhausted or the caller
/// drops it (client disconnect propagates as cancellation via drop).
pub async fn run_chat(
    messages: Vec<ChatMessage>,
    collection: String,
    config: Arc<AppConfig>,
    upstream: Arc<UpstreamClient>,
    stores: Arc<CollectionRegistry>,
    logger: QueryLogger,
) -> Result<impl Stream<Item = serde_json::Value>, AppError> {
    let last_user_message = messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .ok_or_else(|| AppError::BadRequest("no user message in request".to_string()))?;

    let handle = stores.get_or_create(&collection);
    {
        let h = handle.read();
        if h.store.is_empty() {
            return Err(AppError::not_ready_with_pull(
                "collection has no ingested documents",
                &config.embedding_model,
            ));
        }
    }

    // Step 2: embed the query.
    let query_vector = upstream.embed(&last_user_message, &config.embedding_model).await?;

    // Step 3: retrieve top-k.
    let hits = {
        let h = handle.read();
        h.store.find_nearest(
            &query_vector,
            config.top_k,
            config.min_score,
            Some(&config.embedding_model),
        )?
    };

    // Step 4: token-budget enforcement, iterating in descending score order
    // (find_nearest already returns results sorted that way). The top hit is
    // always accepted, even alone over budget, so a query never loses all
    // grounding just because its single best match is large (§8 scenario 6).
    let mut accepted = Vec::new();
    let mut budget_used = 0usize;
    for hit in &hits {
        let tokens = estimate_tokens(word_count(&hit.metadata.chunk_text));
        if !accepted.is_empty() && budget_used + tokens > config.max_context_tokens {
            break;
        }
        budget_used += tokens;
        accepted.push(hit);
    }

    // Step 5: compose the system prompt.
    let mut prompt = String::from(SYSTEM_PREAMBLE);
    for hit in &accepted {
        prompt.push_str("\n\n[Source: ");
        prompt.push_str(&hit.metadata.file_name);
        prompt.push_str("]\n");
        prompt.push_str(&hit.metadata.chunk_text);
    }

    let citations: Vec<Citation> = accepted
        .iter()
        .map(|hit| Citation {
            file_name: hit.metadata.file_name.clone(),
            header_context: hit.metadata.header_context.clone(),
            score: hit.score,
            preview: hit.metadata.text_preview.clone(),
        })
        .collect();

    let log_results: Vec<QueryLogCitation> = accepted
        .iter()
        .map(|hit| QueryLogCitation {
            score: hit.score,
            file_name: hit.metadata.file_name.clone(),
            chunk_index: hit.metadata.chunk_index,
            header_context: hit.metadata.header_context.clone(),
            preview: hit.metadata.text_preview.clone(),
        })
        .collect();

    let result_count = hits.len();
    let top_score = hits.first().map(|h| h.score);
    let low_confidence = low_confidence(result_count, top_score, config.min_score);

    let mut chat_messages = vec![ChatMessage {
        role: "system".to_string(),
        content: prompt,
    }];
    chat_messages.extend(messages);

    let chat_model = config.chat_model.clone();
    let embedding_model = config.embedding_model.clone();
    let top_k = config.top_k;
    let min_score = config.min_score;
    let query_for_log = QueryLogEntry::truncate_query(&last_user_message);

    let upstream_stream = upstream.chat_stream(chat_messages, &chat_model).await?;

    Ok(async_stream::stream! {
        yield SseEvent::Status { message: String::new() }.into_json();
        yield SseEvent::Metadata { citations }.into_json();

        futures_util::pin_mut!(upstream_stream);
        let mut saw_error = false;
        while let Some(item) = upstream_stream.next().await {
            match item {
                Ok(token) => {
                    if !token.content.is_empty() {
                        yield SseEvent::Token { content: token.content }.into_json();
                    }
                    if token.done {
                        break;
                    }
                }
                Err(e) => {
                    saw_error = true;
                    yield SseEvent::Error { message: e.to_string() }.into_json();
                    break;
                }
            }
        }

        // Step 8: log telemetry regardless of how the stream ended.
        let _ = saw_error;
        logger.log(QueryLogEntry {
            timestamp: chrono::Utc::now(),
            query: query_for_log,
            embedding_model,
            chat_model,
            top_k,
            min_score,
            result_count,
            low_confidence,
            results: log_results,
        });
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_confidence_true_when_no_results() {
        assert!(low_confidence(0, None, 0.5));
    }

    #[test]
    fn low_confidence_true_when_top_score_barely_above_threshold() {
        assert!(low_confidence(1, Some(0.55), 0.5));
    }

    #[test]
    fn low_confidence_false_when_top_score_comfortably_above_threshold() {
        assert!(!low_confidence(1, Some(0.9), 0.5));
    }

    #[test]
    fn estimate_tokens_matches_1_3x_word_count_ceiling() {
        assert_eq!(estimate_tokens(10), 13);
        assert_eq!(estimate_tokens(1), 2);
    }
}
