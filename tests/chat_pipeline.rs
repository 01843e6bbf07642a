#[path = "common/mod.rs"]
mod common;

use std::sync::Arc;

use futures_util::StreamExt;
use localragd::error::AppError;
use localragd::ingestion::{CollectionRegistry, IngestionQueue, JobStatus};
use localragd::query_logger::QueryLogger;
use localragd::query_pipeline::run_chat;
use localragd::upstream::{ChatMessage, UpstreamClient};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_embeddings_mock(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/embeddings"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "embedding": common::STUB_EMBEDDING })),
        )
        .mount(server)
        .await;
}

async fn ingest_one_file(
    config: &Arc<localragd::config::AppConfig>,
    upstream: &Arc<UpstreamClient>,
    stores: &Arc<CollectionRegistry>,
    source_dir: &std::path::Path,
    collection: &str,
) {
    let queue = Arc::new(IngestionQueue::new(config.data_dir.clone()));
    queue.load().unwrap();
    queue.spawn_worker(Arc::clone(config), Arc::clone(upstream), Arc::clone(stores));
    let job = queue
        .enqueue(source_dir.to_string_lossy().to_string(), collection.to_string())
        .unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            let snapshot = queue.snapshot();
            if let Some(found) = snapshot.iter().find(|j| j.id == job.id) {
                if matches!(found.status, JobStatus::Completed | JobStatus::Failed) {
                    return;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("ingestion should finish");
}

#[tokio::test]
async fn empty_collection_is_rejected_before_any_upstream_call() {
    let mock_server = MockServer::start().await;
    mount_embeddings_mock(&mock_server).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(common::ndjson_chat_body(&["x"])))
        .mount(&mock_server)
        .await;

    let workdir = tempfile::tempdir().unwrap();
    let config = Arc::new(common::test_config(workdir.path(), mock_server.uri()));
    let upstream = Arc::new(UpstreamClient::new(config.ollama_url.clone()));
    let stores = Arc::new(CollectionRegistry::new(config.data_dir.clone()));
    let logger = QueryLogger::spawn(config.logs_dir.join("query_log.jsonl"));

    let messages = vec![ChatMessage {
        role: "user".to_string(),
        content: "anything".to_string(),
    }];
    let result = run_chat(messages, "empty".to_string(), config, upstream, stores, logger).await;

    assert!(matches!(result, Err(AppError::NotReady(_))));
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn model_mismatch_fails_fast_without_a_chat_call() {
    let mock_server = MockServer::start().await;
    mount_embeddings_mock(&mock_server).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(common::ndjson_chat_body(&["x"])))
        .mount(&mock_server)
        .await;

    let workdir = tempfile::tempdir().unwrap();
    let source_dir = tempfile::tempdir().unwrap();
    common::write_file(source_dir.path(), "doc.md", "Some ingested content.");

    let ingest_config = Arc::new(common::test_config(workdir.path(), mock_server.uri()));
    let upstream = Arc::new(UpstreamClient::new(ingest_config.ollama_url.clone()));
    let stores = Arc::new(CollectionRegistry::new(ingest_config.data_dir.clone()));
    ingest_one_file(&ingest_config, &upstream, &stores, source_dir.path(), "docs").await;

    let mut query_config = (*ingest_config).clone();
    query_config.embedding_model = "a-different-model".to_string();
    let logger = QueryLogger::spawn(ingest_config.logs_dir.join("query_log.jsonl"));

    let messages = vec![ChatMessage {
        role: "user".to_string(),
        content: "anything".to_string(),
    }];
    let result = run_chat(
        messages,
        "docs".to_string(),
        Arc::new(query_config),
        Arc::clone(&upstream),
        stores,
        logger,
    )
    .await;

    assert!(matches!(result, Err(AppError::ModelMismatch(_))));
    let chat_calls = mock_server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/api/chat")
        .count();
    assert_eq!(chat_calls, 0, "a model mismatch must never reach the chat call");
}

#[tokio::test]
async fn unreachable_min_score_yields_a_low_confidence_log_entry() {
    let mock_server = MockServer::start().await;
    mount_embeddings_mock(&mock_server).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(common::ndjson_chat_body(&["ok"])))
        .mount(&mock_server)
        .await;

    let workdir = tempfile::tempdir().unwrap();
    let source_dir = tempfile::tempdir().unwrap();
    common::write_file(source_dir.path(), "doc.md", "Some ingested content.");

    let config = Arc::new(common::test_config(workdir.path(), mock_server.uri()));
    let upstream = Arc::new(UpstreamClient::new(config.ollama_url.clone()));
    let stores = Arc::new(CollectionRegistry::new(config.data_dir.clone()));
    ingest_one_file(&config, &upstream, &stores, source_dir.path(), "docs").await;

    let mut query_config = (*config).clone();
    query_config.min_score = 2.0; // unreachable by cosine similarity, so find_nearest returns nothing
    let log_path = config.logs_dir.join("query_log.jsonl");
    let logger = QueryLogger::spawn(log_path.clone());

    let messages = vec![ChatMessage {
        role: "user".to_string(),
        content: "anything".to_string(),
    }];
    let stream = run_chat(
        messages,
        "docs".to_string(),
        Arc::new(query_config),
        upstream,
        stores,
        logger.clone(),
    )
    .await
    .expect("pipeline should still run a chat turn with zero citations");

    futures_util::pin_mut!(stream);
    while stream.next().await.is_some() {}
    logger.flush().await;

    let contents = std::fs::read_to_string(&log_path).unwrap();
    let last_line = contents.lines().last().expect("a log entry should have been written");
    let entry: serde_json::Value = serde_json::from_str(last_line).unwrap();
    assert_eq!(entry["resultCount"], 0);
    assert_eq!(entry["lowConfidence"], true);
}

#[tokio::test]
async fn an_oversized_top_chunk_is_still_admitted_alone() {
    let mock_server = MockServer::start().await;
    mount_embeddings_mock(&mock_server).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(common::ndjson_chat_body(&["ok"])))
        .mount(&mock_server)
        .await;

    let workdir = tempfile::tempdir().unwrap();
    let source_dir = tempfile::tempdir().unwrap();
    let hundred_words = (0..100).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ");
    common::write_file(source_dir.path(), "big.md", &hundred_words);

    let config = Arc::new(common::test_config(workdir.path(), mock_server.uri()));
    let upstream = Arc::new(UpstreamClient::new(config.ollama_url.clone()));
    let stores = Arc::new(CollectionRegistry::new(config.data_dir.clone()));
    ingest_one_file(&config, &upstream, &stores, source_dir.path(), "docs").await;

    let mut query_config = (*config).clone();
    // ceil(1.3 * 100) = 130 tokens, comfortably over this budget on its own.
    query_config.max_context_tokens = 50;
    let logger = QueryLogger::spawn(config.logs_dir.join("query_log.jsonl"));

    let messages = vec![ChatMessage {
        role: "user".to_string(),
        content: "anything".to_string(),
    }];
    let stream = run_chat(
        messages,
        "docs".to_string(),
        Arc::new(query_config),
        upstream,
        stores,
        logger,
    )
    .await
    .expect("pipeline should still run with a single over-budget chunk");

    futures_util::pin_mut!(stream);
    let events: Vec<serde_json::Value> = stream.collect().await;
    let metadata_event = events
        .iter()
        .find(|e| e["type"] == "metadata")
        .expect("a metadata event should be emitted");
    let citations = metadata_event["citations"].as_array().unwrap();
    assert_eq!(
        citations.len(),
        1,
        "the single best-scoring chunk must reach the prompt even though it alone exceeds the token budget"
    );
}
