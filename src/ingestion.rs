use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::chunker::{self, ChunkerConfig};
use crate::config::{is_valid_collection_name, validate_ingest_path, AppConfig};
use crate::error::{AppError, AppResult};
use crate::manifest::{ManifestEntry, SourceManifest};
use crate::upstream::UpstreamClient;
use crate::vector_store::{ChunkMetadata, VectorStore};

/// Progress-only saves are throttled to this interval; status-change saves
/// are always immediate (§4.6).
const SAVE_THROTTLE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFileSummary {
    pub file_count: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionJob {
    pub id: String,
    pub path: String,
    pub collection: String,
    pub status: JobStatus,
    pub progress: String,
    pub added_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub summary: JobFileSummary,
}

impl IngestionJob {
    fn new(path: String, collection: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            path,
            collection,
            status: JobStatus::Pending,
            progress: "queued".to_string(),
            added_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            summary: JobFileSummary::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct QueueFile {
    jobs: Vec<IngestionJob>,
}

/// Durable FIFO of ingestion jobs with a single worker (§4.6).
pub struct IngestionQueue {
    data_dir: PathBuf,
    jobs: RwLock<Vec<IngestionJob>>,
    last_save: RwLock<Instant>,
    updates_tx: tokio::sync::broadcast::Sender<Vec<IngestionJob>>,
    work_notify: Arc<Notify>,
    worker_running: AtomicBool,
}

impl IngestionQueue {
    pub fn new(data_dir: PathBuf) -> Self {
        let (updates_tx, _) = tokio::sync::broadcast::channel(64);
        Self {
            data_dir,
            jobs: RwLock::new(Vec::new()),
            last_save: RwLock::new(Instant::now()),
            updates_tx,
            work_notify: Arc::new(Notify::new()),
            worker_running: AtomicBool::new(false),
        }
    }

    fn queue_path(&self) -> PathBuf {
        self.data_dir.join("queue.json")
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Vec<IngestionJob>> {
        self.updates_tx.subscribe()
    }

    pub fn snapshot(&self) -> Vec<IngestionJob> {
        self.jobs.read().clone()
    }

    /// Load `queue.json`, applying the restart rule: any job still marked
    /// `processing` becomes `failed` with `"interrupted by restart"` (§4.6).
    pub fn load(&self) -> AppResult<()> {
        let path = self.queue_path();
        if !path.exists() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(&path)?;
        let file: QueueFile = serde_json::from_str(&raw)?;
        let mut jobs = file.jobs;
        for job in jobs.iter_mut() {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Failed;
                job.error_message = Some("interrupted by restart".to_string());
                job.completed_at = Some(Utc::now());
            }
        }
        *self.jobs.write() = jobs;
        Ok(())
    }

    fn persist(&self, immediate: bool) -> AppResult<()> {
        if !immediate {
            let mut last = self.last_save.write();
            if last.elapsed() < SAVE_THROTTLE {
                return Ok(());
            }
            *last = Instant::now();
        } else {
            *self.last_save.write() = Instant::now();
        }

        std::fs::create_dir_all(&self.data_dir)?;
        let jobs = self.jobs.read().clone();
        let file = QueueFile { jobs };
        let json = serde_json::to_vec_pretty(&file)?;
        let tmp = self.queue_path().with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, self.queue_path())?;
        Ok(())
    }

    fn emit_update(&self) {
        let snapshot = self.jobs.read().clone();
        let _ = self.updates_tx.send(snapshot);
    }

    pub fn enqueue(&self, path: String, collection: String) -> AppResult<IngestionJob> {
        if !is_valid_collection_name(&collection) {
            return Err(AppError::InvalidCollectionName(collection));
        }
        validate_ingest_path(&path).map_err(AppError::PathNotAllowed)?;

        let job = IngestionJob::new(path, collection);
        self.jobs.write().push(job.clone());
        self.persist(true)?;
        self.emit_update();
        self.work_notify.notify_one();
        Ok(job)
    }

    /// Cancel a job only while it is still `pending` (§4.6, §6).
    pub fn cancel(&self, job_id: &str) -> AppResult<()> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| AppError::NotFound(format!("job {} not found", job_id)))?;
        if job.status != JobStatus::Pending {
            return Err(AppError::BadRequest(format!(
                "job {} is not pending",
                job_id
            )));
        }
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        drop(jobs);
        self.persist(true)?;
        self.emit_update();
        Ok(())
    }

    fn next_pending(&self) -> Option<IngestionJob> {
        self.jobs
            .read()
            .iter()
            .find(|j| j.status == JobStatus::Pending)
            .cloned()
    }

    fn mark_processing(&self, job_id: &str) -> AppResult<()> {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = JobStatus::Processing;
            job.started_at = Some(Utc::now());
            job.progress = "starting".to_string();
        }
        drop(jobs);
        self.persist(true)?;
        self.emit_update();
        Ok(())
    }

    fn update_progress(&self, job_id: &str, progress: String) -> AppResult<()> {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.progress = progress;
        }
        drop(jobs);
        self.persist(false)?;
        self.emit_update();
        Ok(())
    }

    fn mark_terminal(
        &self,
        job_id: &str,
        status: JobStatus,
        progress: String,
        error: Option<String>,
        summary: JobFileSummary,
    ) -> AppResult<()> {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.status = status;
            job.progress = progress;
            job.error_message = error;
            job.summary = summary;
            job.completed_at = Some(Utc::now());
        }
        drop(jobs);
        self.persist(true)?;
        self.emit_update();
        Ok(())
    }

    /// Spawn the single dedicated worker task. Runs until the process exits.
    pub fn spawn_worker(
        self: &Arc<Self>,
        config: Arc<AppConfig>,
        upstream: Arc<UpstreamClient>,
        stores: Arc<CollectionRegistry>,
    ) {
        if self.worker_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let queue = Arc::clone(self);
        let notify = Arc::clone(&self.work_notify);
        tokio::spawn(async move {
            loop {
                while let Some(job) = queue.next_pending() {
                    if let Err(e) = run_job(&queue, &job, &config, &upstream, &stores).await {
                        tracing::error!(job_id = %job.id, error = %e, "ingestion job failed unexpectedly");
                    }
                }
                notify.notified().await;
            }
        });
    }

    pub fn notify_work(&self) {
        self.work_notify.notify_one();
    }

    /// Force an immediate save regardless of the progress-save throttle,
    /// called during graceful shutdown (§5).
    pub fn persist_now(&self) -> AppResult<()> {
        self.persist(true)
    }
}

/// Per-collection `(VectorStore, SourceManifest)` pair, shared by the
/// ingestion worker and the query path.
pub struct CollectionRegistry {
    data_dir: PathBuf,
    entries: dashmap::DashMap<String, Arc<RwLock<CollectionHandle>>>,
}

pub struct CollectionHandle {
    pub store: VectorStore,
    pub manifest: SourceManifest,
}

impl CollectionRegistry {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            entries: dashmap::DashMap::new(),
        }
    }

    pub fn get_or_create(&self, collection: &str) -> Arc<RwLock<CollectionHandle>> {
        if let Some(existing) = self.entries.get(collection) {
            return Arc::clone(&existing);
        }
        let dir = self.data_dir.join(collection);
        let mut store = VectorStore::new(dir.clone(), collection);
        let _ = store.load(None);
        let mut manifest = SourceManifest::new(dir, collection);
        let _ = manifest.load();
        let handle = Arc::new(RwLock::new(CollectionHandle { store, manifest }));
        self.entries.insert(collection.to_string(), Arc::clone(&handle));
        handle
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Every collection name, whether already materialized in memory or
    /// merely present on disk as `{data_dir}/{name}/{name}.vectors.bin`.
    /// After a restart nothing touches a collection until it's queried or
    /// re-ingested, so `/api/health` and `/api/index/metrics` need this
    /// instead of `collection_names()` to see collections from a prior run.
    pub fn known_collection_names(&self) -> Vec<String> {
        let mut names: std::collections::BTreeSet<String> = self.collection_names().into_iter().collect();

        if let Ok(read_dir) = std::fs::read_dir(&self.data_dir) {
            for entry in read_dir.filter_map(|e| e.ok()) {
                if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.path().join(format!("{}.vectors.bin", name)).exists() {
                    names.insert(name);
                }
            }
        }

        names.into_iter().collect()
    }
}

fn hash_file(path: &Path) -> AppResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn guess_extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
}

/// Run the smart-ingestion algorithm (§4.3 step list) for one job: scan the
/// directory, skip/rename/reingest each file, then sweep orphans.
async fn run_job(
    queue: &Arc<IngestionQueue>,
    job: &IngestionJob,
    config: &Arc<AppConfig>,
    upstream: &Arc<UpstreamClient>,
    stores: &Arc<CollectionRegistry>,
) -> AppResult<()> {
    queue.mark_processing(&job.id)?;

    let handle = stores.get_or_create(&job.collection);
    let root = PathBuf::from(&job.path);

    let files: Vec<PathBuf> = ignore::WalkBuilder::new(&root)
        .hidden(false)
        .build()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.into_path())
        .collect();

    let mut current_file_names = Vec::with_capacity(files.len());
    let mut summary = JobFileSummary::default();

    for path in &files {
        summary.file_count += 1;
        let file_name = match path.strip_prefix(&root) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => path.to_string_lossy().to_string(),
        };
        current_file_names.push(file_name.clone());

        queue.update_progress(
            &job.id,
            format!("processing {} of {}: {}", summary.file_count, files.len(), file_name),
        )?;

        match ingest_one_file(&handle, path, &file_name, config, upstream).await {
            Ok(IngestOutcome::Skipped) => summary.files_skipped += 1,
            Ok(IngestOutcome::Renamed) | Ok(IngestOutcome::Ingested) => {}
            Err(e) => {
                summary.files_failed += 1;
                tracing::warn!(file = %file_name, error = %e, "failed to ingest file");
            }
        }
    }

    {
        let mut h = handle.write();
        let orphans = h.manifest.get_orphans(&current_file_names);
        for orphan in orphans {
            h.store.delete(&orphan.file_name);
            h.manifest.remove(&orphan.file_name);
        }
        h.manifest.save()?;
        h.store.save()?;
    }

    let progress = format!(
        "{} files processed, {} skipped, {} failed",
        summary.file_count, summary.files_skipped, summary.files_failed
    );

    if summary.files_failed == 0 {
        queue.mark_terminal(&job.id, JobStatus::Completed, progress, None, summary)?;
    } else {
        queue.mark_terminal(
            &job.id,
            JobStatus::Failed,
            progress.clone(),
            Some(progress),
            summary,
        )?;
    }

    Ok(())
}

enum IngestOutcome {
    Skipped,
    Renamed,
    Ingested,
}

async fn ingest_one_file(
    handle: &Arc<RwLock<CollectionHandle>>,
    path: &Path,
    file_name: &str,
    config: &Arc<AppConfig>,
    upstream: &Arc<UpstreamClient>,
) -> AppResult<IngestOutcome> {
    let hash = hash_file(path)?;

    {
        let h = handle.read();
        if h.manifest.is_unchanged(file_name, &hash) {
            return Ok(IngestOutcome::Skipped);
        }
    }

    let rename_source = {
        let h = handle.read();
        h.manifest
            .find_by_hash(&hash)
            .filter(|e| e.file_name != file_name)
            .map(|e| e.file_name.clone())
    };

    if let Some(old_name) = rename_source {
        let mut h = handle.write();
        h.manifest.rename_key(&old_name, file_name, &path.to_string_lossy());
        for record in h.store.records_mut_by_file(&old_name) {
            record.metadata.file_name = file_name.to_string();
            record.metadata.source_path = path.to_string_lossy().to_string();
        }
        return Ok(IngestOutcome::Renamed);
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| AppError::BadRequest(format!("unreadable file {}: {}", file_name, e)))?;
    let file_size = std::fs::metadata(path)?.len();
    let extension = guess_extension(path);

    let chunks = chunker::dispatch(
        &content,
        &extension,
        ChunkerConfig {
            max_chunk_size: config.chunk_size,
            overlap: config.chunk_overlap,
        },
    );

    {
        let mut h = handle.write();
        h.store.delete(file_name);
    }

    for chunk in &chunks {
        let vector = upstream.embed(&chunk.text, &config.embedding_model).await?;
        let short_hash = &hash[..8.min(hash.len())];
        let id = format!("{}_{}_{}", file_name, chunk.index, short_hash);
        let metadata = ChunkMetadata {
            file_name: file_name.to_string(),
            source_path: path.to_string_lossy().to_string(),
            chunk_index: chunk.index,
            chunk_text: chunk.text.clone(),
            text_preview: chunker::text_preview(&chunk.text),
            header_context: chunk.header_context.clone(),
            ingested_at: Utc::now(),
            embedding_model: config.embedding_model.clone(),
            extension: extension.clone(),
        };

        let mut h = handle.write();
        h.store.add(id, vector, metadata)?;
    }

    let entry = ManifestEntry {
        file_name: file_name.to_string(),
        source_path: path.to_string_lossy().to_string(),
        content_hash: hash,
        chunk_count: chunks.len(),
        file_size,
        last_ingested: Utc::now(),
        embedding_model: config.embedding_model.clone(),
    };
    handle.write().manifest.add_or_update(entry);

    Ok(IngestOutcome::Ingested)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_rejects_invalid_collection_name() {
        let dir = tempfile::tempdir().unwrap();
        let queue = IngestionQueue::new(dir.path().to_path_buf());
        let err = queue.enqueue("/tmp/x".to_string(), "bad name".to_string());
        assert!(matches!(err, Err(AppError::InvalidCollectionName(_))));
    }

    #[test]
    fn enqueue_rejects_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let queue = IngestionQueue::new(dir.path().to_path_buf());
        let err = queue.enqueue("relative/path".to_string(), "docs".to_string());
        assert!(matches!(err, Err(AppError::PathNotAllowed(_))));
    }

    #[test]
    fn enqueue_then_cancel_pending_job() {
        let dir = tempfile::tempdir().unwrap();
        let queue = IngestionQueue::new(dir.path().to_path_buf());
        let job = queue.enqueue("/tmp/x".to_string(), "docs".to_string()).unwrap();
        queue.cancel(&job.id).unwrap();
        let snapshot = queue.snapshot();
        assert_eq!(snapshot[0].status, JobStatus::Cancelled);
    }

    #[test]
    fn restart_recovery_marks_processing_jobs_failed() {
        let dir = tempfile::tempdir().unwrap();
        let queue = IngestionQueue::new(dir.path().to_path_buf());
        let job = queue.enqueue("/tmp/x".to_string(), "docs".to_string()).unwrap();
        queue.mark_processing(&job.id).unwrap();

        let reloaded = IngestionQueue::new(dir.path().to_path_buf());
        reloaded.load().unwrap();
        let snapshot = reloaded.snapshot();
        assert_eq!(snapshot[0].status, JobStatus::Failed);
        assert_eq!(
            snapshot[0].error_message.as_deref(),
            Some("interrupted by restart")
        );
    }
}
