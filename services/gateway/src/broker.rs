//! Pub/sub broker adapter and cluster presence index.
//!
//! Four logical channels carry cluster events between gateway nodes; every
//! node subscribes to all of them and the publishing node receives its own
//! events back like any other subscriber.  Delivery is at-most-once per
//! node — a node that misses events while restarting relies on clients
//! recovering through reconnect-time sync.
//!
//! Presence is a broker-owned set of userIds with at least one live session
//! cluster-wide.  `mark_online`/`mark_offline` count devices per user, so
//! the set membership flips only on first-device-authenticated and
//! last-device-disconnected transitions.
//!
//! Two implementations: `RedisBroker` for clustered deployments and
//! `MemoryBroker`, an in-process loopback for single-node mode and tests.

use async_trait::async_trait;
use futures_util::StreamExt;
use im_protocol::channels;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::warn;

const EVENT_BUFFER: usize = 1024;
const ONLINE_SET_KEY: &str = "im:online_users";
const DEVICE_COUNT_KEY: &str = "im:online_devices";

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker: {0}")]
    Redis(#[from] redis::RedisError),
}

/// One event received from a subscribed channel.
#[derive(Debug, Clone)]
pub struct BrokerEvent {
    pub channel: String,
    pub payload: String,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish an opaque payload on one of the well-known channels.
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BrokerError>;

    /// Count one authenticated session for the user.
    async fn mark_online(&self, user_id: i64) -> Result<(), BrokerError>;

    /// Count one disconnected session for the user.
    async fn mark_offline(&self, user_id: i64) -> Result<(), BrokerError>;

    /// Whether the user has at least one live session cluster-wide.
    async fn is_online(&self, user_id: i64) -> Result<bool, BrokerError>;

    /// Subscribe to the inbound event stream.  Events arrive in channel
    /// order; a lagging consumer loses the oldest events (at-most-once).
    fn events(&self) -> broadcast::Receiver<BrokerEvent>;
}

// ---------------------------------------------------------------------------
// RedisBroker
// ---------------------------------------------------------------------------

pub struct RedisBroker {
    conn: ConnectionManager,
    events_tx: broadcast::Sender<BrokerEvent>,
}

impl RedisBroker {
    /// Connect, subscribe to all four channels, and start the inbound pump.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        let mut pubsub = client.get_async_pubsub().await?;
        for channel in channels::ALL {
            pubsub.subscribe(channel).await?;
        }
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        let tx = events_tx.clone();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_owned();
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        let _ = tx.send(BrokerEvent { channel, payload });
                    }
                    Err(e) => warn!(channel = %channel, error = %e, "undecodable broker payload"),
                }
            }
            warn!("broker subscription stream ended");
        });
        Ok(Self { conn, events_tx })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(channel, payload).await?;
        Ok(())
    }

    async fn mark_online(&self, user_id: i64) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let devices: i64 = conn.hincr(DEVICE_COUNT_KEY, user_id, 1).await?;
        if devices == 1 {
            let _: i64 = conn.sadd(ONLINE_SET_KEY, user_id).await?;
        }
        Ok(())
    }

    async fn mark_offline(&self, user_id: i64) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let devices: i64 = conn.hincr(DEVICE_COUNT_KEY, user_id, -1).await?;
        if devices <= 0 {
            let _: i64 = conn.hdel(DEVICE_COUNT_KEY, user_id).await?;
            let _: i64 = conn.srem(ONLINE_SET_KEY, user_id).await?;
        }
        Ok(())
    }

    async fn is_online(&self, user_id: i64) -> Result<bool, BrokerError> {
        let mut conn = self.conn.clone();
        Ok(conn.sismember(ONLINE_SET_KEY, user_id).await?)
    }

    fn events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events_tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// MemoryBroker
// ---------------------------------------------------------------------------

/// Loopback broker for single-node deployments: publish feeds the local
/// subscription directly, presence is a process-local map.
pub struct MemoryBroker {
    events_tx: broadcast::Sender<BrokerEvent>,
    online: RwLock<HashMap<i64, u32>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            events_tx,
            online: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BrokerError> {
        // Send only fails when nobody listens, which is fine.
        let _ = self.events_tx.send(BrokerEvent {
            channel: channel.to_owned(),
            payload,
        });
        Ok(())
    }

    async fn mark_online(&self, user_id: i64) -> Result<(), BrokerError> {
        *self.online.write().await.entry(user_id).or_insert(0) += 1;
        Ok(())
    }

    async fn mark_offline(&self, user_id: i64) -> Result<(), BrokerError> {
        let mut online = self.online.write().await;
        if let Some(devices) = online.get_mut(&user_id) {
            *devices = devices.saturating_sub(1);
            if *devices == 0 {
                online.remove(&user_id);
            }
        }
        Ok(())
    }

    async fn is_online(&self, user_id: i64) -> Result<bool, BrokerError> {
        Ok(self.online.read().await.contains_key(&user_id))
    }

    fn events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events_tx.subscribe()
    }
}
