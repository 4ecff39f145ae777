//! Bridge from the bus into local rooms.
//!
//! For every document with at least one local session there is exactly one
//! subscribe loop on `doc:<doc_id>`. Everything it receives is broadcast to
//! the room, including the sender's own events: same-process and
//! cross-process peers see one ordering, the bus's.

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::rooms::RoomRegistry;
use super::tasks::{RoomTasks, TaskTicket};
use crate::bus::{channel_for, BusSubscription, BusTransport};

const RESUBSCRIBE_INITIAL_DELAY: Duration = Duration::from_secs(1);
const RESUBSCRIBE_MAX_DELAY: Duration = Duration::from_secs(30);

pub struct FanoutBridge {
    bus: Arc<dyn BusTransport>,
    rooms: Arc<RoomRegistry>,
    tasks: Arc<RoomTasks>,
}

impl FanoutBridge {
    pub fn new(bus: Arc<dyn BusTransport>, rooms: Arc<RoomRegistry>) -> Self {
        Self {
            bus,
            rooms,
            tasks: Arc::new(RoomTasks::new()),
        }
    }

    /// Start the document's subscribe loop unless one is already running.
    /// Returns true if this call started it.
    pub fn ensure(&self, doc_id: &str) -> bool {
        let Some(ticket) = self.tasks.try_start(doc_id) else {
            return false;
        };
        info!("🔄 Starting bus subscriber for doc {}", doc_id);
        tokio::spawn(run(
            Arc::clone(&self.bus),
            Arc::clone(&self.rooms),
            Arc::clone(&self.tasks),
            ticket,
        ));
        true
    }

    /// Cancel the document's subscribe loop.
    pub fn stop(&self, doc_id: &str) -> bool {
        let stopped = self.tasks.stop(doc_id);
        if stopped {
            info!("📴 Stopping bus subscriber for doc {}", doc_id);
        }
        stopped
    }

    pub fn stop_all(&self) {
        self.tasks.stop_all();
    }

    pub fn is_active(&self, doc_id: &str) -> bool {
        self.tasks.is_active(doc_id)
    }

    pub fn active_count(&self) -> usize {
        self.tasks.active_count()
    }
}

async fn run(bus: Arc<dyn BusTransport>, rooms: Arc<RoomRegistry>, tasks: Arc<RoomTasks>, ticket: TaskTicket) {
    let doc_id = ticket.doc_id.as_str();
    let channel = channel_for(doc_id);

    let first = tokio::select! {
        _ = ticket.cancel.cancelled() => return,
        res = bus.subscribe(&channel) => res,
    };
    let mut stream = match first {
        Ok(stream) => stream,
        Err(e) => {
            // Free the slot so the next attach retries.
            error!("❌ Bus subscribe error for doc {}: {}", doc_id, e);
            tasks.release(&ticket);
            return;
        }
    };
    info!("📻 Subscribed to bus channel {}", channel);

    loop {
        let next = tokio::select! {
            _ = ticket.cancel.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(payload) => {
                debug!("🔁 Bus -> broadcast to doc {}: {}", doc_id, payload);
                rooms.broadcast(doc_id, Arc::from(payload)).await;
            }
            None => {
                warn!("⚠️ Bus subscription for doc {} ended, resubscribing", doc_id);
                match resubscribe(bus.as_ref(), &channel, &ticket).await {
                    Some(fresh) => stream = fresh,
                    None => break,
                }
            }
        }
    }
    debug!("Bus subscriber for doc {} exited", doc_id);
}

/// Retry `subscribe` with exponential backoff until it succeeds or the ticket
/// is cancelled.
async fn resubscribe(bus: &dyn BusTransport, channel: &str, ticket: &TaskTicket) -> Option<BusSubscription> {
    let mut delay = RESUBSCRIBE_INITIAL_DELAY;
    loop {
        tokio::select! {
            _ = ticket.cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
        match bus.subscribe(channel).await {
            Ok(stream) => {
                info!("📻 Resubscribed to bus channel {}", channel);
                return Some(stream);
            }
            Err(e) => {
                delay = (delay * 2).min(RESUBSCRIBE_MAX_DELAY);
                warn!("Resubscribe to {} failed, next attempt in {:?}: {}", channel, delay, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusError, LocalBus};
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use uuid::Uuid;

    async fn wait_for_subscriber(bus: &LocalBus, channel: &str) {
        timeout(Duration::from_secs(2), async {
            while bus.subscriber_count(channel) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subscriber never appeared");
    }

    #[tokio::test]
    async fn test_bus_payloads_reach_room() {
        let bus = Arc::new(LocalBus::new(64));
        let rooms = Arc::new(RoomRegistry::new());
        let bridge = FanoutBridge::new(bus.clone(), rooms.clone());

        let (tx, mut rx) = mpsc::channel(8);
        rooms.attach("doc", Uuid::new_v4(), tx).await;
        assert!(bridge.ensure("doc"));
        assert!(!bridge.ensure("doc"));
        wait_for_subscriber(&bus, "doc:doc").await;

        bus.publish("doc:doc", r#"{"type":"edit","userID":"u1","content":"a"}"#).await.unwrap();
        bus.publish("doc:doc", r#"{"type":"edit","userID":"u1","content":"b"}"#).await.unwrap();

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(first.contains(r#""content":"a""#));
        assert!(second.contains(r#""content":"b""#));
    }

    #[tokio::test]
    async fn test_stop_releases_subscription() {
        let bus = Arc::new(LocalBus::new(64));
        let rooms = Arc::new(RoomRegistry::new());
        let bridge = FanoutBridge::new(bus.clone(), rooms);

        bridge.ensure("doc");
        wait_for_subscriber(&bus, "doc:doc").await;
        assert!(bridge.stop("doc"));
        assert!(!bridge.is_active("doc"));

        timeout(Duration::from_secs(2), async {
            while bus.subscriber_count("doc:doc") > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subscription was not dropped");

        // A fresh attach starts a fresh loop.
        assert!(bridge.ensure("doc"));
    }

    /// Fails the first `failures` subscribe calls, then hands out a stream that
    /// yields `payloads` and ends.
    struct FlakyBus {
        failures: usize,
        calls: AtomicUsize,
        payloads: Vec<String>,
    }

    #[async_trait]
    impl BusTransport for FlakyBus {
        async fn publish(&self, _channel: &str, _payload: &str) -> Result<(), BusError> {
            Ok(())
        }

        async fn subscribe(&self, _channel: &str) -> Result<BusSubscription, BusError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(BusError::Timeout(Duration::from_millis(1)));
            }
            Ok(stream::iter(self.payloads.clone()).boxed())
        }

        async fn ping(&self) -> Result<(), BusError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_subscribe_clears_slot_for_retry() {
        let bus = Arc::new(FlakyBus {
            failures: 1,
            calls: AtomicUsize::new(0),
            payloads: vec![],
        });
        let bridge = FanoutBridge::new(bus.clone(), Arc::new(RoomRegistry::new()));

        assert!(bridge.ensure("doc"));
        timeout(Duration::from_secs(1), async {
            while bridge.is_active("doc") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("slot was not released after failure");

        assert!(bridge.ensure("doc"));
        bridge.stop("doc");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_subscription_is_reopened() {
        let bus = Arc::new(FlakyBus {
            failures: 0,
            calls: AtomicUsize::new(0),
            payloads: vec!["p".to_string()],
        });
        let rooms = Arc::new(RoomRegistry::new());
        let (tx, mut rx) = mpsc::channel(8);
        rooms.attach("doc", Uuid::new_v4(), tx).await;
        let bridge = FanoutBridge::new(bus.clone(), rooms);
        bridge.ensure("doc");

        // Each subscription yields one payload then ends; the loop keeps reopening.
        assert_eq!(&*rx.recv().await.unwrap(), "p");
        assert_eq!(&*rx.recv().await.unwrap(), "p");
        assert!(bus.calls.load(Ordering::SeqCst) >= 2);
        assert!(bridge.is_active("doc"));
        bridge.stop("doc");
    }
}
