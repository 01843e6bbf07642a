use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::ingestion::{CollectionRegistry, IngestionQueue};
use crate::query_logger::QueryLogger;
use crate::upstream::UpstreamClient;

const HEALTH_CACHE_TTL: Duration = Duration::from_secs(15);
const METRICS_CACHE_TTL: Duration = Duration::from_secs(5);

struct Cached<T> {
    value: T,
    at: Instant,
}

/// Short-lived caches for `/api/health` and `/api/index/metrics`, shedding
/// load per §5's TTL rule.
pub struct ResponseCache {
    health: RwLock<Option<Cached<serde_json::Value>>>,
    metrics: RwLock<Option<Cached<serde_json::Value>>>,
}

impl ResponseCache {
    fn new() -> Self {
        Self {
            health: RwLock::new(None),
            metrics: RwLock::new(None),
        }
    }

    pub fn get_health(&self) -> Option<serde_json::Value> {
        let guard = self.health.read();
        guard
            .as_ref()
            .filter(|c| c.at.elapsed() < HEALTH_CACHE_TTL)
            .map(|c| c.value.clone())
    }

    pub fn put_health(&self, value: serde_json::Value) {
        *self.health.write() = Some(Cached { value, at: Instant::now() });
    }

    pub fn get_metrics(&self) -> Option<serde_json::Value> {
        let guard = self.metrics.read();
        guard
            .as_ref()
            .filter(|c| c.at.elapsed() < METRICS_CACHE_TTL)
            .map(|c| c.value.clone())
    }

    pub fn put_metrics(&self, value: serde_json::Value) {
        *self.metrics.write() = Some(Cached { value, at: Instant::now() });
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub stores: Arc<CollectionRegistry>,
    pub queue: Arc<IngestionQueue>,
    pub upstream: Arc<UpstreamClient>,
    pub logger: QueryLogger,
    pub cache: Arc<ResponseCache>,
    pub shutdown: Arc<tokio::sync::Notify>,
}

impl AppState {
    pub async fn new(config: AppConfig) -> AppResult<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        tokio::fs::create_dir_all(&config.logs_dir).await?;

        let config = Arc::new(config);
        let stores = Arc::new(CollectionRegistry::new(config.data_dir.clone()));
        let queue = Arc::new(IngestionQueue::new(config.data_dir.clone()));
        queue.load()?;

        let upstream = Arc::new(UpstreamClient::new(config.ollama_url.clone()));
        let logger = QueryLogger::spawn(config.logs_dir.join("query_log.jsonl"));

        Ok(Self {
            config,
            stores,
            queue,
            upstream,
            logger,
            cache: Arc::new(ResponseCache::new()),
            shutdown: Arc::new(tokio::sync::Notify::new()),
        })
    }

    pub fn start_worker(&self) {
        self.queue
            .spawn_worker(Arc::clone(&self.config), Arc::clone(&self.upstream), Arc::clone(&self.stores));
        self.queue.notify_work();
    }
}
