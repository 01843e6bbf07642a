use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;

use crate::error::AppError;

const DEFAULT_CHAT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct ChatToken {
    pub content: String,
    pub done: bool,
}

#[derive(Deserialize)]
struct OllamaChatLine {
    message: Option<OllamaChatMessageBody>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct OllamaChatMessageBody {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct OllamaModelsResponse {
    #[serde(default)]
    models: Vec<OllamaModelEntry>,
}

#[derive(Deserialize)]
struct OllamaModelEntry {
    name: String,
}

/// HTTP client to the upstream Ollama-compatible model runtime, shared by
/// embedding and chat calls (§4.5).
///
/// Embed calls are serialized through an internal mutex so overlapping
/// embed/chat requests never race on the upstream's model-swap path.
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
    embed_lock: Mutex<()>,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            embed_lock: Mutex::new(()),
        }
    }

    /// `embed(text, model) -> Vec<f32>` over `/api/embeddings`, serialized
    /// by `embed_lock`. Tries the newer `input` field first, falling back
    /// to the legacy `prompt` field on a non-2xx response.
    pub async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>, AppError> {
        let _guard = self.embed_lock.lock().await;

        let url = format!("{}/api/embeddings", self.base_url);

        let primary = self
            .client
            .post(&url)
            .json(&json!({ "model": model, "input": text }))
            .send()
            .await;

        let resp = match primary {
            Ok(r) if r.status().is_success() => r,
            _ => self
                .client
                .post(&url)
                .json(&json!({ "model": model, "prompt": text }))
                .send()
                .await
                .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?,
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::UpstreamError(format!(
                "embeddings request failed ({}): {}",
                status, body
            )));
        }

        #[derive(Deserialize)]
        struct EmbeddingsResponse {
            #[serde(default)]
            embedding: Vec<f32>,
            #[serde(default)]
            embeddings: Vec<Vec<f32>>,
        }

        let parsed: EmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| AppError::UpstreamError(format!("invalid embeddings response: {}", e)))?;

        if !parsed.embedding.is_empty() {
            Ok(parsed.embedding)
        } else if let Some(first) = parsed.embeddings.into_iter().next() {
            Ok(first)
        } else {
            Err(AppError::UpstreamError(
                "embeddings response contained no vector".to_string(),
            ))
        }
    }

    /// `chat(messages, model) -> stream of token events` over `/api/chat`
    /// with `"stream": true`, parsed from Ollama's NDJSON response.
    pub async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
        model: &str,
    ) -> Result<impl Stream<Item = Result<ChatToken, AppError>>, AppError> {
        let url = format!("{}/api/chat", self.base_url);

        let resp = self
            .client
            .post(&url)
            .timeout(DEFAULT_CHAT_TIMEOUT)
            .json(&json!({ "model": model, "messages": messages, "stream": true }))
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::UpstreamError(format!(
                "chat request failed ({}): {}",
                status, body
            )));
        }

        let byte_stream = resp.bytes_stream();
        Ok(ndjson_to_tokens(byte_stream))
    }

    pub async fn list_models(&self) -> Result<Vec<String>, AppError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(AppError::UpstreamError(format!(
                "models request failed ({})",
                status
            )));
        }

        let parsed: OllamaModelsResponse = resp
            .json()
            .await
            .map_err(|e| AppError::UpstreamError(format!("invalid models response: {}", e)))?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

/// Re-chunk a byte stream of newline-delimited JSON objects into parsed
/// `ChatToken`s, buffering partial lines across network reads.
fn ndjson_to_tokens(
    byte_stream: impl Stream<Item = reqwest::Result<bytes::Bytes>>,
) -> impl Stream<Item = Result<ChatToken, AppError>> {
    async_stream::stream! {
        futures_util::pin_mut!(byte_stream);
        let mut buffer = String::new();

        loop {
            if let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim().to_string();
                buffer.drain(..=pos);
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<OllamaChatLine>(&line) {
                    Ok(parsed) => {
                        let done = parsed.done;
                        let content = parsed.message.map(|m| m.content).unwrap_or_default();
                        yield Ok(ChatToken { content, done });
                    }
                    Err(e) => yield Err(AppError::UpstreamError(format!("invalid chat line: {}", e))),
                }
                continue;
            }

            match byte_stream.next().await {
                Some(Ok(bytes)) => buffer.push_str(&String::from_utf8_lossy(&bytes)),
                Some(Err(e)) => {
                    yield Err(AppError::UpstreamUnavailable(e.to_string()));
                    break;
                }
                None => {
                    let remainder = buffer.trim().to_string();
                    if !remainder.is_empty() {
                        if let Ok(parsed) = serde_json::from_str::<OllamaChatLine>(&remainder) {
                            let content = parsed.message.map(|m| m.content).unwrap_or_default();
                            yield Ok(ChatToken { content, done: parsed.done });
                        }
                    }
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_serializes_role_and_content() {
        let msg = ChatMessage {
            role: "user".to_string(),
            content: "hi".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hi");
    }
}
