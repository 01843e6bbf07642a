use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryLogCitation {
    pub score: f32,
    pub file_name: String,
    pub chunk_index: usize,
    pub header_context: String,
    pub preview: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryLogEntry {
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub top_k: usize,
    pub min_score: f32,
    pub result_count: usize,
    pub low_confidence: bool,
    pub results: Vec<QueryLogCitation>,
}

const MAX_QUERY_CHARS: usize = 500;

impl QueryLogEntry {
    pub fn truncate_query(query: &str) -> String {
        query.chars().take(MAX_QUERY_CHARS).collect()
    }
}

enum Command {
    Log(Box<QueryLogEntry>),
    Flush(oneshot::Sender<()>),
}

/// Fire-and-forget JSONL sink. `Log` is non-blocking on the request path; a
/// single background task owns the file handle and serializes writes
/// (§4.8).
#[derive(Clone)]
pub struct QueryLogger {
    tx: mpsc::UnboundedSender<Command>,
}

impl QueryLogger {
    pub fn spawn(path: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();

        tokio::spawn(async move {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .unwrap_or_else(|e| {
                    tracing::error!(path = %path.display(), error = %e, "failed to open query log");
                    std::fs::File::create("/dev/null").expect("fallback sink must open")
                });

            while let Some(cmd) = rx.recv().await {
                match cmd {
                    Command::Log(entry) => {
                        if let Ok(mut line) = serde_json::to_vec(&entry) {
                            line.push(b'\n');
                            if let Err(e) = file.write_all(&line) {
                                tracing::error!(error = %e, "failed to append query log entry");
                            }
                        }
                    }
                    Command::Flush(done) => {
                        let _ = file.flush();
                        let _ = file.sync_all();
                        let _ = done.send(());
                    }
                }
            }
        });

        Self { tx }
    }

    /// Enqueue an entry without waiting for the write to land on disk.
    pub fn log(&self, entry: QueryLogEntry) {
        if self.tx.send(Command::Log(Box::new(entry))).is_err() {
            tracing::error!("query logger channel closed, dropping entry");
        }
    }

    /// Drain the channel and fsync; called on SIGINT/SIGTERM.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}
