#[path = "common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use localragd::ingestion::{CollectionRegistry, IngestionQueue, JobStatus};
use localragd::upstream::UpstreamClient;
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

/// Enqueues a job and polls the queue until it leaves `pending`/`processing`,
/// bounded so a stuck worker fails the test instead of hanging it.
async fn enqueue_and_wait(
    queue: &Arc<IngestionQueue>,
    directory: String,
    collection: String,
) -> localragd::ingestion::IngestionJob {
    let job = queue.enqueue(directory, collection).expect("enqueue should succeed");
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = queue.snapshot();
            if let Some(found) = snapshot.iter().find(|j| j.id == job.id) {
                if matches!(found.status, JobStatus::Completed | JobStatus::Failed) {
                    return found.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("ingestion job did not finish in time")
}

#[tokio::test]
async fn ingest_then_query_returns_a_citation() {
    let mock_server = MockServer::start().await;
    mount_embeddings_mock(&mock_server).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(common::ndjson_chat_body(&["Hello", " there"])),
        )
        .mount(&mock_server)
        .await;

    let workdir = tempfile::tempdir().unwrap();
    let source_dir = tempfile::tempdir().unwrap();
    common::write_file(source_dir.path(), "doc.md", "# Title\n\nSome useful content about widgets.");

    let config = Arc::new(common::test_config(workdir.path(), mock_server.uri()));
    let upstream = Arc::new(UpstreamClient::new(config.ollama_url.clone()));
    let stores = Arc::new(CollectionRegistry::new(config.data_dir.clone()));
    let queue = Arc::new(IngestionQueue::new(config.data_dir.clone()));
    queue.load().unwrap();
    queue.spawn_worker(Arc::clone(&config), Arc::clone(&upstream), Arc::clone(&stores));

    let job = enqueue_and_wait(
        &queue,
        source_dir.path().to_string_lossy().to_string(),
        "docs".to_string(),
    )
    .await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.summary.file_count, 1);
    assert_eq!(job.summary.files_failed, 0);

    let logger = localragd::query_logger::QueryLogger::spawn(config.logs_dir.join("query_log.jsonl"));
    let messages = vec![localragd::upstream::ChatMessage {
        role: "user".to_string(),
        content: "What do widgets do?".to_string(),
    }];
    let stream = localragd::query_pipeline::run_chat(
        messages,
        "docs".to_string(),
        Arc::clone(&config),
        Arc::clone(&upstream),
        Arc::clone(&stores),
        logger,
    )
    .await
    .expect("chat pipeline should start");

    use futures_util::StreamExt;
    futures_util::pin_mut!(stream);
    let events: Vec<serde_json::Value> = stream.collect().await;

    let metadata_event = events
        .iter()
        .find(|e| e["type"] == "metadata")
        .expect("a metadata event should be emitted");
    let citations = metadata_event["citations"].as_array().unwrap();
    assert_eq!(citations.len(), 1);
    assert_eq!(citations[0]["fileName"], "doc.md");

    let token_text: String = events
        .iter()
        .filter_map(|e| e["message"]["content"].as_str())
        .collect();
    assert_eq!(token_text, "Hello there");
}

#[tokio::test]
async fn unchanged_file_is_skipped_on_second_ingest() {
    let mock_server = MockServer::start().await;
    mount_embeddings_mock(&mock_server).await;

    let workdir = tempfile::tempdir().unwrap();
    let source_dir = tempfile::tempdir().unwrap();
    common::write_file(source_dir.path(), "doc.md", "Stable content that never changes.");

    let config = Arc::new(common::test_config(workdir.path(), mock_server.uri()));
    let upstream = Arc::new(UpstreamClient::new(config.ollama_url.clone()));
    let stores = Arc::new(CollectionRegistry::new(config.data_dir.clone()));
    let queue = Arc::new(IngestionQueue::new(config.data_dir.clone()));
    queue.load().unwrap();
    queue.spawn_worker(Arc::clone(&config), Arc::clone(&upstream), Arc::clone(&stores));

    let path_string = source_dir.path().to_string_lossy().to_string();
    let first = enqueue_and_wait(&queue, path_string.clone(), "docs".to_string()).await;
    assert_eq!(first.summary.files_skipped, 0);
    let requests_after_first = mock_server.received_requests().await.unwrap().len();

    let second = enqueue_and_wait(&queue, path_string, "docs".to_string()).await;
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.summary.files_skipped, 1);

    let requests_after_second = mock_server.received_requests().await.unwrap().len();
    assert_eq!(
        requests_after_second, requests_after_first,
        "an unchanged file must not trigger any new upstream embed calls"
    );
}

#[tokio::test]
async fn renamed_file_is_relinked_without_reembedding() {
    let mock_server = MockServer::start().await;
    mount_embeddings_mock(&mock_server).await;

    let workdir = tempfile::tempdir().unwrap();
    let source_dir = tempfile::tempdir().unwrap();
    let original = common::write_file(source_dir.path(), "doc.md", "Content that gets renamed.");

    let config = Arc::new(common::test_config(workdir.path(), mock_server.uri()));
    let upstream = Arc::new(UpstreamClient::new(config.ollama_url.clone()));
    let stores = Arc::new(CollectionRegistry::new(config.data_dir.clone()));
    let queue = Arc::new(IngestionQueue::new(config.data_dir.clone()));
    queue.load().unwrap();
    queue.spawn_worker(Arc::clone(&config), Arc::clone(&upstream), Arc::clone(&stores));

    let path_string = source_dir.path().to_string_lossy().to_string();
    enqueue_and_wait(&queue, path_string.clone(), "docs".to_string()).await;
    let requests_after_first = mock_server.received_requests().await.unwrap().len();

    std::fs::rename(&original, source_dir.path().join("renamed.md")).unwrap();
    let second = enqueue_and_wait(&queue, path_string, "docs".to_string()).await;
    assert_eq!(second.status, JobStatus::Completed);

    let requests_after_second = mock_server.received_requests().await.unwrap().len();
    assert_eq!(
        requests_after_second, requests_after_first,
        "a detected rename must reuse the existing vectors rather than re-embed"
    );

    let handle = stores.get_or_create("docs");
    let h = handle.read();
    assert_eq!(h.store.len(), 1);
    assert!(h.manifest.get("doc.md").is_none());
    assert!(h.manifest.get("renamed.md").is_some());
}

#[tokio::test]
async fn deleted_file_is_swept_as_an_orphan() {
    let mock_server = MockServer::start().await;
    mount_embeddings_mock(&mock_server).await;

    let workdir = tempfile::tempdir().unwrap();
    let source_dir = tempfile::tempdir().unwrap();
    let doomed = common::write_file(source_dir.path(), "a.md", "Will be deleted.");
    common::write_file(source_dir.path(), "b.md", "Stays around.");

    let config = Arc::new(common::test_config(workdir.path(), mock_server.uri()));
    let upstream = Arc::new(UpstreamClient::new(config.ollama_url.clone()));
    let stores = Arc::new(CollectionRegistry::new(config.data_dir.clone()));
    let queue = Arc::new(IngestionQueue::new(config.data_dir.clone()));
    queue.load().unwrap();
    queue.spawn_worker(Arc::clone(&config), Arc::clone(&upstream), Arc::clone(&stores));

    let path_string = source_dir.path().to_string_lossy().to_string();
    enqueue_and_wait(&queue, path_string.clone(), "docs".to_string()).await;

    std::fs::remove_file(&doomed).unwrap();
    let second = enqueue_and_wait(&queue, path_string, "docs".to_string()).await;
    assert_eq!(second.status, JobStatus::Completed);

    let handle = stores.get_or_create("docs");
    let h = handle.read();
    assert_eq!(h.store.len(), 1);
    assert!(h.manifest.get("a.md").is_none());
    assert!(h.manifest.get("b.md").is_some());
}
