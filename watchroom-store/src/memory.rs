use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, mpsc::UnboundedReceiver, Mutex as AsyncMutex};

use crate::{Result, Store, StoreError, UpdateFn};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// An in-process [`Store`] used by tests and by single-instance
/// deployments that don't want to run Redis. Satisfies the exact same
/// atomicity contract as [`RedisStore`](crate::RedisStore): a per-key
/// async lock serializes concurrent `atomic_update` calls instead of
/// WATCH/MULTI/EXEC.
#[derive(Default)]
pub struct MemoryStore {
    values: DashMap<String, Entry>,
    hashes: DashMap<String, HashMap<String, String>>,
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
    subscribers: DashMap<String, Vec<mpsc::UnboundedSender<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn read(&self, key: &str) -> Option<String> {
        let entry = self.values.get(key)?;

        if let Some(expires_at) = entry.expires_at {
            if Instant::now() >= expires_at {
                drop(entry);
                self.values.remove(key);
                return None;
            }
        }

        Some(entry.value.clone())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.values.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.values.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.remove(key);
        self.hashes.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read(key).is_some())
    }

    async fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let keys = self
            .values
            .iter()
            .map(|e| e.key().clone())
            .chain(self.hashes.iter().map(|e| e.key().clone()))
            .filter(|k| k.starts_with(prefix))
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect();

        Ok(keys)
    }

    async fn hash_set(&self, key: &str, field: &str, value: String) -> Result<()> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        Ok(self.hashes.get(key).map(|h| h.clone()).unwrap_or_default())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<()> {
        if let Some(mut hash) = self.hashes.get_mut(key) {
            hash.remove(field);
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        if let Some(mut subs) = self.subscribers.get_mut(channel) {
            subs.retain(|tx| tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<UnboundedReceiver<String>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn atomic_update(&self, key: &str, mut f: UpdateFn) -> Result<String> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let current = self.read(key);
        let next = f(current).map_err(|e| match e {
            StoreError::Rejected(msg) => StoreError::Rejected(msg),
            other => other,
        })?;

        self.values.insert(
            key.to_string(),
            Entry {
                value: next.clone(),
                expires_at: None,
            },
        );

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let store = MemoryStore::new();
        store.set("a", "1".into()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn atomic_update_serializes_concurrent_writers() {
        let store = Arc::new(MemoryStore::new());
        store.set("counter", "0".into()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .atomic_update(
                        "counter",
                        Box::new(|current| {
                            let n: i64 = current.unwrap_or_default().parse().unwrap_or(0);
                            Ok((n + 1).to_string())
                        }),
                    )
                    .await
                    .unwrap();
            }));
        }

        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.get("counter").await.unwrap(), Some("50".to_string()));
    }

    #[tokio::test]
    async fn atomic_update_rejection_leaves_value_untouched() {
        let store = MemoryStore::new();
        store.set("a", "1".into()).await.unwrap();

        let err = store
            .atomic_update(
                "a",
                Box::new(|_| Err(StoreError::Rejected("nope".into()))),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Rejected(_)));
        assert_eq!(store.get("a").await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn publish_delivers_to_subscriber() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe("room-events:1").await.unwrap();

        store
            .publish("room-events:1", "hello".into())
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("k", "v".into(), Duration::from_millis(10))
            .await
            .unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn call_count_sanity() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = MemoryStore::new();
        store.set("x", "0".into()).await.unwrap();

        let calls_clone = calls.clone();
        store
            .atomic_update(
                "x",
                Box::new(move |current| {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(current.unwrap_or_default())
                }),
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
