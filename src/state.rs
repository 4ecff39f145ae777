use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use uuid::Uuid;

use crate::bus::{channel_for, BusTransport};
use crate::config::RelaySettings;
use crate::services::content_cache::ContentCache;
use crate::services::persistence::{DocumentSink, PersistenceScheduler};
use crate::ws::bridge::FanoutBridge;
use crate::ws::rooms::{Outbound, RoomRegistry};
use tokio::sync::mpsc;

const SHUTDOWN_FLUSH_GRACE: Duration = Duration::from_secs(10);

/// Shared application state.
pub struct AppState {
    pub settings: RelaySettings,
    pub bus: Arc<dyn BusTransport>,
    pub rooms: Arc<RoomRegistry>,
    pub bridge: FanoutBridge,
    pub cache: Arc<ContentCache>,
    pub persistence: PersistenceScheduler,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(settings: RelaySettings, bus: Arc<dyn BusTransport>, sink: Option<Arc<dyn DocumentSink>>) -> Self {
        let rooms = Arc::new(RoomRegistry::new());
        let cache = Arc::new(ContentCache::new());
        let bridge = FanoutBridge::new(bus.clone(), rooms.clone());
        let persistence = PersistenceScheduler::new(sink, cache.clone(), settings.flush_interval);

        Self {
            settings,
            bus,
            rooms,
            bridge,
            cache,
            persistence,
            started_at: Instant::now(),
        }
    }

    /// Register a session in its room and make sure the room is fed from the bus.
    /// The attach happens first so a concurrent last-leave cannot cancel the
    /// subscription this session relies on.
    pub async fn join(&self, doc_id: &str, session_id: Uuid, queue: mpsc::Sender<Outbound>) -> usize {
        let size = self.rooms.attach(doc_id, session_id, queue).await;
        self.bridge.ensure(doc_id);
        size
    }

    /// Remove a session. The last one out stops the document's bus
    /// subscription and its autosave loop; cached content is kept.
    pub async fn leave(&self, doc_id: &str, session_id: Uuid) -> usize {
        self.rooms
            .detach(doc_id, session_id, || {
                self.bridge.stop(doc_id);
                self.persistence.stop(doc_id);
            })
            .await
    }

    /// Publish the original message text on the document's channel.
    pub async fn publish(&self, doc_id: &str, raw: &str) -> bool {
        match self.bus.publish(&channel_for(doc_id), raw).await {
            Ok(()) => true,
            Err(e) => {
                error!("❌ Failed to publish to doc {}: {}", doc_id, e);
                false
            }
        }
    }

    /// Stop every bridge loop, then every autosave loop after its final flush.
    pub async fn shutdown(&self) {
        info!("🛑 Stopping {} bridge loops and {} autosave loops", self.bridge.active_count(), self.persistence.active_count());
        self.bridge.stop_all();
        self.persistence.drain(SHUTDOWN_FLUSH_GRACE).await;
    }
}
