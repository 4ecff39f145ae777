//! Distributed publish/subscribe transport.
//!
//! Every process publishes document events to `doc:<doc_id>` and keeps at most
//! one subscription per channel (see [`crate::ws::bridge`]). Delivery is
//! at-most-once; publishers never wait for an acknowledgement.

pub mod local;
pub mod redis_bus;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

pub use local::LocalBus;
pub use redis_bus::RedisBus;

/// Ordered payloads delivered on one channel. The stream ends when the
/// underlying connection goes away.
pub type BusSubscription = BoxStream<'static, String>;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("bus did not answer within {0:?}")]
    Timeout(std::time::Duration),
    #[error("unexpected liveness reply: {0}")]
    BadPong(String),
}

#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Fire-and-forget publish to every subscriber of `channel`, on any process.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError>;

    /// Open a subscription on `channel`.
    async fn subscribe(&self, channel: &str) -> Result<BusSubscription, BusError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), BusError>;
}

/// Bus channel carrying the events of one document.
pub fn channel_for(doc_id: &str) -> String {
    format!("doc:{}", doc_id)
}
