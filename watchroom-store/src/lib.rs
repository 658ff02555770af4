//! The Shared State Store adapter (§4.1): a typed key/hash/pub-sub
//! interface over an external service, with a single-key atomic
//! read-modify-write primitive that the Room Repository builds on.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

pub type Result<T> = std::result::Result<T, StoreError>;
pub type BoxedStore = std::sync::Arc<dyn Store>;

/// A closure applied to the current value of a key (absent if the key
/// doesn't exist yet) to produce the next value. Returning `Err` aborts
/// the update without writing anything.
pub type UpdateFn = Box<dyn FnMut(Option<String>) -> Result<String> + Send>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing service could not be reached. Callers should treat
    /// this as transient.
    #[error("the shared state store is unavailable")]
    Unavailable,
    /// An `atomicUpdate` could not make progress within its retry budget
    /// because of sustained contention on the key.
    #[error("too much contention updating key {0}")]
    Conflict(String),
    /// The update function rejected the value it was given.
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

/// The contract C1 (§4.1) requires: typed get/set/delete/exists, hash
/// fields, pub/sub, and a single-key atomic update. Implementations are
/// free to choose how `atomic_update` serializes concurrent writers
/// (OCC with retry, a server-side script, or a per-key lock) as long as
/// no two `atomic_update` calls on the same key ever interleave.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    async fn hash_set(&self, key: &str, field: &str, value: String) -> Result<()>;
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn hash_delete(&self, key: &str, field: &str) -> Result<()>;

    /// Fire-and-forget delivery to whatever is currently subscribed to
    /// `channel`. There is no guarantee of delivery if nobody is listening.
    async fn publish(&self, channel: &str, payload: String) -> Result<()>;

    /// Subscribes to `channel`, returning a receiver of payloads. The
    /// caller is expected to drive this from its own task - reading from
    /// it must never block whatever else is sharing this store.
    async fn subscribe(&self, channel: &str) -> Result<UnboundedReceiver<String>>;

    /// Reads the current value of `key`, applies `f` to it, and writes
    /// the result back, guaranteeing no other `atomic_update` on the
    /// same key observes an intermediate state.
    async fn atomic_update(&self, key: &str, f: UpdateFn) -> Result<String>;
}
