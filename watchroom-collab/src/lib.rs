//! Room and queue coordination: the part of the system that knows what
//! a room is, how commands change it, and how changes reach every
//! connection that cares, regardless of which process accepted them.

mod adapter;
mod bus;
mod commands;
mod config;
mod durable;
mod errors;
mod events;
mod lifecycle;
mod password;
mod registry;
mod repository;
mod room;
mod util;
mod video;

pub use adapter::{AssetAdapter, ExternalAssetAdapter, Page};
#[cfg(any(test, feature = "test-support"))]
pub use adapter::MemoryAssetAdapter;
pub use bus::BroadcastBus;
pub use commands::{Command, Dispatcher, InboundFrame};
pub use config::RuntimeConfig;
pub use durable::{DurableStore, MongoDurableStore, NullDurableStore};
pub use errors::{CollabError, ErrorCode, Result};
pub use events::ServerEvent;
pub use password::PasswordScheme;
pub use registry::{ClientRegistry, ConnectionHandle};
pub use repository::RoomRepository;
pub use room::{ClientId, Room, RoomView};
pub use util::{random_room_id, random_string};
pub use video::Video;

use std::sync::Arc;

use log::{info, warn};
use watchroom_store::{BoxedStore, MemoryStore, RedisStore};

/// The assembled system: everything a `watchroom-server` connection
/// handler needs to turn inbound frames into room state changes and
/// outbound events. Cloning is cheap - every field is already an `Arc`
/// or a value type - so a connection task can hold its own `Collab`
/// without any lifetime entanglement with the listener.
#[derive(Clone)]
pub struct Collab {
    pub config: Arc<RuntimeConfig>,
    pub registry: Arc<ClientRegistry>,
    pub bus: Arc<BroadcastBus>,
    pub repository: Arc<RoomRepository>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Collab {
    /// Builds the shared store (Redis if reachable configuration is
    /// present, otherwise an in-process `MemoryStore` for tests and
    /// single-instance runs), the durable store (Mongo if
    /// `MONGODB_URI` is set, otherwise a no-op), and starts the
    /// Lifecycle Worker.
    pub async fn new(config: RuntimeConfig) -> Self {
        let config = Arc::new(config);
        let store = Self::build_store(&config).await;
        let durable = Self::build_durable_store(&config).await;

        let registry = ClientRegistry::new(store.clone());
        let bus = BroadcastBus::new(store.clone(), registry.clone());
        let repository = Arc::new(RoomRepository::new(store.clone()));
        let adapter: Arc<dyn AssetAdapter> = Arc::new(ExternalAssetAdapter::new(store));

        let dispatcher = Arc::new(Dispatcher::new(
            repository.clone(),
            registry.clone(),
            bus.clone(),
            adapter,
            config.clone(),
        ));

        let lifecycle = Arc::new(lifecycle::LifecycleWorker::new(
            repository.clone(),
            registry.clone(),
            bus.clone(),
            durable,
            config.clone(),
        ));
        lifecycle.start().await;

        Self {
            config,
            registry,
            bus,
            repository,
            dispatcher,
        }
    }

    async fn build_store(config: &RuntimeConfig) -> BoxedStore {
        match RedisStore::connect(&config.redis_url()).await {
            Ok(store) => {
                info!("connected to shared store at {}", config.redis_host);
                Arc::new(store)
            }
            Err(e) => {
                warn!("shared store unavailable ({e}), falling back to an in-process store");
                Arc::new(MemoryStore::new())
            }
        }
    }

    async fn build_durable_store(config: &RuntimeConfig) -> Arc<dyn DurableStore> {
        let Some(uri) = &config.mongodb_uri else {
            return Arc::new(NullDurableStore);
        };

        match MongoDurableStore::connect(uri).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!("durable store unavailable ({e}), snapshots will be skipped");
                Arc::new(NullDurableStore)
            }
        }
    }
}
