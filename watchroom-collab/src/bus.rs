use std::sync::Arc;

use dashmap::DashMap;
use log::warn;
use tokio::task::JoinHandle;
use watchroom_store::BoxedStore;

use crate::events::ServerEvent;
use crate::registry::ClientRegistry;
use crate::room::ClientId;
use crate::Result;

fn topic_for(room_id: &str) -> String {
    format!("room-events:{room_id}")
}

/// Per-room fan-out to local subscribers plus cross-instance
/// delivery through the shared store's pub/sub channel.
///
/// Each process subscribes to a room's topic the first time it has a
/// local connection bound to that room, and tears the subscription down
/// when the room closes. Delivery to an individual connection goes
/// through [`ClientRegistry::send_to`], so a slow or gone connection
/// never affects its roommates.
pub struct BroadcastBus {
    store: BoxedStore,
    registry: Arc<ClientRegistry>,
    subscriptions: DashMap<String, JoinHandle<()>>,
}

impl BroadcastBus {
    pub fn new(store: BoxedStore, registry: Arc<ClientRegistry>) -> Arc<Self> {
        Arc::new(Self {
            store,
            registry,
            subscriptions: DashMap::new(),
        })
    }

    /// Publishes `event` to every member of `room_id`, local or remote.
    /// Targeted replies (pong, ack, roomCreated, ...) bypass this and go
    /// straight through the registry, since the sender is always local
    /// to the process handling it.
    pub async fn broadcast(&self, room_id: &str, event: &ServerEvent) -> Result<()> {
        self.ensure_subscribed(room_id);
        self.store.publish(&topic_for(room_id), event.to_json()).await?;
        Ok(())
    }

    pub fn send_targeted(&self, client_id: &ClientId, event: &ServerEvent) {
        self.registry.send_to(client_id, event.to_json());
    }

    /// Subscribes this process to a room's topic if it hasn't already.
    /// Called both from `broadcast` and from [`ClientRegistry::bind`]
    /// callers so a process that merely has local members (but never
    /// itself publishes) still receives events from other instances.
    pub fn ensure_subscribed(&self, room_id: &str) {
        if self.subscriptions.contains_key(room_id) {
            return;
        }

        let store = self.store.clone();
        let registry = self.registry.clone();
        let topic = topic_for(room_id);
        let room_id_owned = room_id.to_string();

        let handle = tokio::spawn(async move {
            let mut rx = match store.subscribe(&topic).await {
                Ok(rx) => rx,
                Err(e) => {
                    warn!("failed to subscribe to {topic}: {e}");
                    return;
                }
            };

            while let Some(payload) = rx.recv().await {
                let event: ServerEvent = match serde_json::from_str(&payload) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("dropping malformed event on {topic}: {e}");
                        continue;
                    }
                };

                let members = registry.local_members_of(&room_id_owned);
                let is_closure = matches!(event, ServerEvent::RoomClosed { .. });
                let payload = event.to_json();

                for member in &members {
                    registry.send_to(member, payload.clone());
                }

                if is_closure {
                    for member in &members {
                        registry.forget_local_membership(member);
                    }
                    break;
                }
            }
        });

        self.subscriptions.insert(room_id.to_string(), handle);
    }

    /// Tears down this process's subscription to a closed room's topic.
    pub fn forget(&self, room_id: &str) {
        if let Some((_, handle)) = self.subscriptions.remove(room_id) {
            handle.abort();
        }
    }
}
