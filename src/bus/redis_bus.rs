//! Redis-backed bus and its connection supervisor.
//!
//! The supervisor owns the client and the publishing connection. A background
//! monitor pings on a fixed cadence and rebuilds both on failure. Rebuilding
//! does not touch subscriptions that are already open; those end with their
//! connection and are re-opened by their owners.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{BusError, BusSubscription, BusTransport};
use crate::config::BusSettings;

struct Connection {
    client: Client,
    publisher: ConnectionManager,
}

pub struct RedisBus {
    settings: BusSettings,
    conn: RwLock<Connection>,
}

impl RedisBus {
    /// Open the client, build the publishing connection and validate it with
    /// `PING`. Startup treats any error here as fatal.
    pub async fn connect(settings: BusSettings) -> Result<Self, BusError> {
        let conn = open(&settings).await?;
        info!("✅ Connected to Redis at {}", redacted(&settings));
        Ok(Self {
            settings,
            conn: RwLock::new(conn),
        })
    }

    /// Replace the client and publisher with freshly validated ones.
    pub async fn reconnect(&self) -> Result<(), BusError> {
        let fresh = open(&self.settings).await?;
        *self.conn.write().await = fresh;
        info!("🔄 Redis connection re-established");
        Ok(())
    }

    /// Ping on `settings.health_interval`; rebuild the connection when a ping fails.
    pub fn spawn_health_monitor(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(bus.settings.health_interval);
            // The first tick completes immediately; the connection was just validated.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("Redis health monitor stopping");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                if let Err(e) = bus.ping().await {
                    warn!("⚠️ Redis connection lost: {}", e);
                    if let Err(e) = bus.reconnect().await {
                        error!("❌ Redis reconnect failed, retrying on next check: {}", e);
                    }
                }
            }
        })
    }

    async fn publisher(&self) -> ConnectionManager {
        self.conn.read().await.publisher.clone()
    }
}

#[async_trait]
impl BusTransport for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BusError> {
        let mut publisher = self.publisher().await;
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<i64>(&mut publisher)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BusSubscription, BusError> {
        let client = self.conn.read().await.client.clone();
        let timeout = self.settings.connect_timeout;
        let mut pubsub = tokio::time::timeout(timeout, client.get_async_pubsub())
            .await
            .map_err(|_| BusError::Timeout(timeout))??;
        pubsub.subscribe(channel).await?;
        debug!("📻 Subscribed to Redis channel {}", channel);

        let channel = channel.to_string();
        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let payload = match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!("Dropping undecodable payload on {}: {}", channel, e);
                    None
                }
            };
            async move { payload }
        });
        Ok(stream.boxed())
    }

    async fn ping(&self) -> Result<(), BusError> {
        let mut publisher = self.publisher().await;
        ping_with(&mut publisher, self.settings.connect_timeout).await
    }
}

async fn open(settings: &BusSettings) -> Result<Connection, BusError> {
    let client = Client::open(settings.url.as_str())?;
    let publisher = tokio::time::timeout(settings.connect_timeout, ConnectionManager::new(client.clone()))
        .await
        .map_err(|_| BusError::Timeout(settings.connect_timeout))??;
    let mut probe = publisher.clone();
    ping_with(&mut probe, settings.connect_timeout).await?;
    Ok(Connection { client, publisher })
}

async fn ping_with(conn: &mut ConnectionManager, timeout: Duration) -> Result<(), BusError> {
    let reply = tokio::time::timeout(timeout, redis::cmd("PING").query_async::<String>(conn))
        .await
        .map_err(|_| BusError::Timeout(timeout))??;
    if reply.eq_ignore_ascii_case("PONG") {
        Ok(())
    } else {
        Err(BusError::BadPong(reply))
    }
}

/// Bus address without credentials, for logging.
fn redacted(settings: &BusSettings) -> String {
    let mut url = settings.url.clone();
    let _ = url.set_password(None);
    url.to_string()
}
