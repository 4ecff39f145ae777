//! Periodic flush of cached document content to the durable store.
//!
//! One loop per document, started by the first accepted edit and cancelled
//! when the document's room empties. Each tick is fire-and-forget: failures
//! are logged and recorded, and the next tick tries again with whatever the
//! cache holds then. Cancellation performs one last flush.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use super::content_cache::ContentCache;
use crate::ws::tasks::{RoomTasks, TaskTicket};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store answered with status {0}")]
    Status(u16),
}

/// Durable store the scheduler writes into.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn save(&self, doc_id: &str, content: &str) -> Result<(), SinkError>;
}

/// Outcome of the most recent flush for one document.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FlushStatus {
    pub at: DateTime<Utc>,
    pub ok: bool,
    pub error: Option<String>,
}

pub struct PersistenceScheduler {
    sink: Option<Arc<dyn DocumentSink>>,
    cache: Arc<ContentCache>,
    interval: Duration,
    tasks: Arc<RoomTasks>,
    statuses: Arc<RwLock<HashMap<String, FlushStatus>>>,
    tracker: TaskTracker,
}

impl PersistenceScheduler {
    /// `sink: None` disables persistence; edits are still cached.
    pub fn new(sink: Option<Arc<dyn DocumentSink>>, cache: Arc<ContentCache>, interval: Duration) -> Self {
        Self {
            sink,
            cache,
            interval,
            tasks: Arc::new(RoomTasks::new()),
            statuses: Arc::new(RwLock::new(HashMap::new())),
            tracker: TaskTracker::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Start the document's flush loop unless one is already running.
    /// Returns true if this call started it.
    pub fn ensure_started(&self, doc_id: &str) -> bool {
        let Some(sink) = self.sink.as_ref() else {
            return false;
        };
        let Some(ticket) = self.tasks.try_start(doc_id) else {
            return false;
        };
        info!("⏱️ Started autosave loop for doc {}", doc_id);
        let flusher = Flusher {
            sink: Arc::clone(sink),
            cache: Arc::clone(&self.cache),
            statuses: Arc::clone(&self.statuses),
        };
        self.tracker.spawn(flusher.run(ticket, self.interval));
        true
    }

    /// Cancel the document's flush loop; it flushes once more on the way out.
    pub fn stop(&self, doc_id: &str) -> bool {
        self.tasks.stop(doc_id)
    }

    pub fn stop_all(&self) {
        self.tasks.stop_all();
    }

    /// Stop every loop and wait, up to `grace`, for their final flushes.
    pub async fn drain(&self, grace: Duration) {
        self.tasks.stop_all();
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!("Autosave loops still flushing after {:?}", grace);
        }
    }

    pub fn is_active(&self, doc_id: &str) -> bool {
        self.tasks.is_active(doc_id)
    }

    pub fn active_count(&self) -> usize {
        self.tasks.active_count()
    }

    pub async fn last_flush(&self, doc_id: &str) -> Option<FlushStatus> {
        self.statuses.read().await.get(doc_id).cloned()
    }

    pub async fn flush_statuses(&self) -> HashMap<String, FlushStatus> {
        self.statuses.read().await.clone()
    }
}

struct Flusher {
    sink: Arc<dyn DocumentSink>,
    cache: Arc<ContentCache>,
    statuses: Arc<RwLock<HashMap<String, FlushStatus>>>,
}

impl Flusher {
    async fn run(self, ticket: TaskTicket, interval: Duration) {
        loop {
            tokio::select! {
                _ = ticket.cancel.cancelled() => {
                    self.flush(&ticket.doc_id).await;
                    debug!("Autosave loop for doc {} stopped", ticket.doc_id);
                    return;
                }
                _ = tokio::time::sleep(interval) => {
                    self.flush(&ticket.doc_id).await;
                }
            }
        }
    }

    async fn flush(&self, doc_id: &str) {
        // Read outside of the sink call; the cache lock is never held across I/O.
        let Some(content) = self.cache.get(doc_id).await else {
            debug!("Nothing cached for doc {}, skipping flush", doc_id);
            return;
        };

        let status = match self.sink.save(doc_id, &content).await {
            Ok(()) => {
                info!("✅ Autosaved doc {}", doc_id);
                FlushStatus { at: Utc::now(), ok: true, error: None }
            }
            Err(SinkError::Status(code)) => {
                warn!("🛑 Save failed for doc {}: {}", doc_id, code);
                FlushStatus { at: Utc::now(), ok: false, error: Some(format!("status {}", code)) }
            }
            Err(e) => {
                error!("❌ Save request error for doc {}: {}", doc_id, e);
                FlushStatus { at: Utc::now(), ok: false, error: Some(e.to_string()) }
            }
        };
        self.statuses.write().await.insert(doc_id.to_string(), status);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every save; fails with the configured status when set.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub saves: Mutex<Vec<(String, String)>>,
        pub fail_with: Mutex<Option<u16>>,
    }

    impl RecordingSink {
        pub fn saves(&self) -> Vec<(String, String)> {
            self.saves.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DocumentSink for RecordingSink {
        async fn save(&self, doc_id: &str, content: &str) -> Result<(), SinkError> {
            self.saves.lock().unwrap().push((doc_id.to_string(), content.to_string()));
            match *self.fail_with.lock().unwrap() {
                Some(code) => Err(SinkError::Status(code)),
                None => Ok(()),
            }
        }
    }

    fn scheduler(sink: Arc<RecordingSink>, cache: Arc<ContentCache>) -> PersistenceScheduler {
        PersistenceScheduler::new(Some(sink), cache, Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_latest_content_each_interval() {
        let sink = Arc::new(RecordingSink::default());
        let cache = Arc::new(ContentCache::new());
        let scheduler = scheduler(sink.clone(), cache.clone());

        cache.update("doc", "v1").await;
        assert!(scheduler.ensure_started("doc"));

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        cache.update("doc", "v2").await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        let saves = sink.saves();
        assert_eq!(saves, vec![("doc".to_string(), "v1".to_string()), ("doc".to_string(), "v2".to_string())]);
        assert!(scheduler.last_flush("doc").await.unwrap().ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_loop_despite_many_starts() {
        let sink = Arc::new(RecordingSink::default());
        let cache = Arc::new(ContentCache::new());
        let scheduler = Arc::new(scheduler(sink.clone(), cache.clone()));
        cache.update("doc", "x").await;

        let mut started = 0;
        for _ in 0..100 {
            if scheduler.ensure_started("doc") {
                started += 1;
            }
        }
        assert_eq!(started, 1);
        assert_eq!(scheduler.active_count(), 1);

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(sink.saves().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_recorded_and_loop_continues() {
        let sink = Arc::new(RecordingSink::default());
        *sink.fail_with.lock().unwrap() = Some(503);
        let cache = Arc::new(ContentCache::new());
        let scheduler = scheduler(sink.clone(), cache.clone());
        cache.update("doc", "x").await;
        scheduler.ensure_started("doc");

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        let status = scheduler.last_flush("doc").await.unwrap();
        assert!(!status.ok);
        assert_eq!(status.error.as_deref(), Some("status 503"));

        *sink.fail_with.lock().unwrap() = None;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sink.saves().len(), 2);
        assert!(scheduler.last_flush("doc").await.unwrap().ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_flushes_once_more_and_keeps_cache() {
        let sink = Arc::new(RecordingSink::default());
        let cache = Arc::new(ContentCache::new());
        let scheduler = scheduler(sink.clone(), cache.clone());
        cache.update("doc", "final").await;
        scheduler.ensure_started("doc");

        assert!(scheduler.stop("doc"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.saves(), vec![("doc".to_string(), "final".to_string())]);

        // No further ticks after cancellation.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sink.saves().len(), 1);
        assert_eq!(cache.get("doc").await.as_deref(), Some("final"));

        // Next edit after re-attach starts a fresh loop.
        assert!(scheduler.ensure_started("doc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_final_flushes() {
        let sink = Arc::new(RecordingSink::default());
        let cache = Arc::new(ContentCache::new());
        let scheduler = scheduler(sink.clone(), cache.clone());
        cache.update("a", "1").await;
        cache.update("b", "2").await;
        scheduler.ensure_started("a");
        scheduler.ensure_started("b");

        scheduler.drain(Duration::from_secs(5)).await;

        let mut saves = sink.saves();
        saves.sort();
        assert_eq!(saves, vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_without_sink() {
        let scheduler = PersistenceScheduler::new(None, Arc::new(ContentCache::new()), Duration::from_secs(10));
        assert!(!scheduler.is_enabled());
        assert!(!scheduler.ensure_started("doc"));
        assert_eq!(scheduler.active_count(), 0);
    }
}
