use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use super::{BusError, BusSubscription, BusTransport};

/// In-process bus backed by one `tokio::sync::broadcast` channel per bus channel.
///
/// Same contract as [`super::RedisBus`] within a single process: ordered per
/// channel, no acknowledgement, nothing retained for late subscribers.
pub struct LocalBus {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Sender for `channel`, created on demand. Channels whose subscribers
    /// are all gone are pruned first.
    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels.retain(|_, tx| tx.receiver_count() > 0);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Number of channels currently tracked.
    pub fn channel_count(&self) -> usize {
        self.channels.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        channels.get(channel).map_or(0, |tx| tx.receiver_count())
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl BusTransport for LocalBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        // No subscribers is not an error, the message is simply gone.
        let mut channels = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        let live = channels.get(channel).is_some_and(|tx| tx.send(payload.to_string()).is_ok());
        if !live {
            channels.remove(channel);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BusSubscription, BusError> {
        let rx = self.sender(channel).subscribe();
        let channel = channel.to_string();
        let stream = stream::unfold((rx, channel), |(mut rx, channel)| async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => return Some((payload, (rx, channel))),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Local bus subscriber on {} lagged, skipped {} messages", channel, skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn ping(&self) -> Result<(), BusError> {
        Ok(())
    }
}
