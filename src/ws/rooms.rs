//! Per-document set of locally attached sessions.
//!
//! Broadcast never blocks: a session whose outbound queue is full, or
//! mid-teardown, misses that message. One slow client must not stall the rest
//! of the room or the bus subscription feeding it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Payload shared by every queue it is fanned out to.
pub type Outbound = Arc<str>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomStats {
    pub rooms: usize,
    pub sessions: usize,
    pub delivered: u64,
    pub dropped: u64,
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, HashMap<Uuid, mpsc::Sender<Outbound>>>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session to the document's room, creating the room if absent.
    /// Returns the room size after the insert.
    pub async fn attach(&self, doc_id: &str, session_id: Uuid, queue: mpsc::Sender<Outbound>) -> usize {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(doc_id.to_string()).or_default();
        room.insert(session_id, queue);
        info!("👥 Client added to doc {} | total clients: {}", doc_id, room.len());
        room.len()
    }

    /// Remove a session. When the room becomes empty it is dropped and
    /// `on_empty` runs while the registry lock is still held, so no attach
    /// can interleave between the emptiness check and the cleanup.
    pub async fn detach<F: FnOnce()>(&self, doc_id: &str, session_id: Uuid, on_empty: F) -> usize {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(doc_id) else {
            debug!("Detach for doc {} with no room, ignoring", doc_id);
            return 0;
        };
        room.remove(&session_id);
        let remaining = room.len();
        info!("👤 Client removed. Remaining on doc {}: {}", doc_id, remaining);
        if remaining == 0 {
            rooms.remove(doc_id);
            on_empty();
        }
        remaining
    }

    /// Enqueue `payload` on every attached session. Returns how many queues
    /// accepted it.
    pub async fn broadcast(&self, doc_id: &str, payload: Outbound) -> usize {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(doc_id) else {
            debug!("No local clients for doc {}, nothing to broadcast", doc_id);
            return 0;
        };

        let mut accepted = 0;
        for (session_id, queue) in room {
            match queue.try_send(Arc::clone(&payload)) {
                Ok(()) => accepted += 1,
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!("⚠️ Client {} write queue full on doc {}, skipping", session_id, doc_id);
                }
                Err(TrySendError::Closed(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("Client {} on doc {} is closing, skipping", session_id, doc_id);
                }
            }
        }
        self.delivered.fetch_add(accepted as u64, Ordering::Relaxed);
        accepted
    }

    pub async fn session_count(&self, doc_id: &str) -> usize {
        self.rooms.read().await.get(doc_id).map_or(0, HashMap::len)
    }

    pub async fn contains(&self, doc_id: &str, session_id: &Uuid) -> bool {
        self.rooms
            .read()
            .await
            .get(doc_id)
            .is_some_and(|room| room.contains_key(session_id))
    }

    pub async fn stats(&self) -> RoomStats {
        let rooms = self.rooms.read().await;
        RoomStats {
            rooms: rooms.len(),
            sessions: rooms.values().map(HashMap::len).sum(),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
