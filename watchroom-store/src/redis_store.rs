use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use futures_util::StreamExt;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::{Result, StoreError, UpdateFn};

/// How many times `atomic_update` retries a WATCH/MULTI/EXEC round before
/// giving up and reporting contention to the caller.
const MAX_ATOMIC_ATTEMPTS: usize = 10;

/// Redis-backed [`Store`](crate::Store). Reads and writes go through a
/// multiplexed [`ConnectionManager`] that reconnects transparently; atomic
/// updates and pub/sub each open their own dedicated connection, since
/// WATCH state and subscriptions are connection-local.
pub struct RedisStore {
    client: Client,
    manager: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(internal)?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|_| StoreError::Unavailable)?;

        Ok(Self { client, manager })
    }
}

fn internal(e: redis::RedisError) -> StoreError {
    StoreError::Internal(Box::new(e))
}

#[async_trait]
impl crate::Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(internal)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set(key, value).await.map_err(internal)
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(internal)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.del(key).await.map_err(internal)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        conn.exists(key).await.map_err(internal)
    }

    async fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        // KEYS is fine for our cardinality (rooms and clients are not
        // expected to reach production key-scan territory); a SCAN-based
        // cursor would be a drop-in swap if that ever changes.
        conn.keys(format!("{prefix}*")).await.map_err(internal)
    }

    async fn hash_set(&self, key: &str, field: &str, value: String) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.hset(key, field, value).await.map_err(internal)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.manager.clone();
        conn.hgetall(key).await.map_err(internal)
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.hdel(key, field).await.map_err(internal)
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.publish(channel, payload).await.map_err(internal)
    }

    async fn subscribe(&self, channel: &str) -> Result<UnboundedReceiver<String>> {
        let client = self.client.clone();
        let channel = channel.to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut pubsub = match client.get_async_pubsub().await {
                Ok(pubsub) => pubsub,
                Err(e) => {
                    warn!("failed to open pubsub connection for {channel}: {e}");
                    return;
                }
            };

            if let Err(e) = pubsub.subscribe(&channel).await {
                warn!("failed to subscribe to {channel}: {e}");
                return;
            }

            let mut messages = pubsub.on_message();

            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("dropping malformed pubsub payload on {channel}: {e}");
                        continue;
                    }
                };

                if tx.send(payload).is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn atomic_update(&self, key: &str, mut f: UpdateFn) -> Result<String> {
        // WATCH is per-connection state in Redis; the multiplexed
        // `ConnectionManager` shares one logical connection across every
        // caller, so two concurrent transactions on it would stomp on each
        // other's watch set. Open a dedicated connection for the duration
        // of this transaction instead.
        let mut conn = self.client.get_async_connection().await.map_err(internal)?;

        for _ in 0..MAX_ATOMIC_ATTEMPTS {
            redis::cmd("WATCH")
                .arg(key)
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(internal)?;

            let current: Option<String> = conn.get(key).await.map_err(internal)?;

            let next = match f(current) {
                Ok(next) => next,
                Err(e) => {
                    redis::cmd("UNWATCH")
                        .query_async::<_, ()>(&mut conn)
                        .await
                        .map_err(internal)?;
                    return Err(e);
                }
            };

            let mut pipe = redis::pipe();
            pipe.atomic().set(key, &next);

            let result: Option<Vec<String>> = pipe.query_async(&mut conn).await.map_err(internal)?;

            if result.is_some() {
                return Ok(next);
            }

            // Another writer committed between our GET and EXEC; retry.
        }

        Err(StoreError::Conflict(key.to_string()))
    }
}
