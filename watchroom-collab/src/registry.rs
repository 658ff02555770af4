use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use watchroom_core::now_millis;
use watchroom_store::BoxedStore;

use crate::room::ClientId;
use crate::Result;

/// The live outbound half of an accepted connection: a channel to the
/// writer task that owns the actual socket write. Cloning is cheap; the
/// Broadcast Bus holds this for delivery only, while the Connection
/// Handler owns its lifetime - it's the only party that drops the
/// sender and closes the channel.
#[derive(Clone)]
pub struct ConnectionHandle {
    sender: UnboundedSender<String>,
}

impl ConnectionHandle {
    pub fn new() -> (Self, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: tx }, rx)
    }

    /// Sends a pre-serialized frame. Failure means the connection's
    /// writer task is gone; the caller should treat this the same as a
    /// backpressure-triggered drop and let cleanup run.
    pub fn send(&self, payload: String) -> bool {
        self.sender.send(payload).is_ok()
    }
}

/// Maps connection identities to rooms, process-locally for fast
/// delivery and persistently (via the shared store) for reconnect
/// routing and orphan cleanup.
pub struct ClientRegistry {
    store: BoxedStore,
    handles: DashMap<ClientId, ConnectionHandle>,
    client_room: DashMap<ClientId, String>,
    room_members: DashMap<String, DashSet<ClientId>>,
}

fn client_key(id: &str) -> String {
    format!("client:{id}")
}

impl ClientRegistry {
    pub fn new(store: BoxedStore) -> Arc<Self> {
        Arc::new(Self {
            store,
            handles: DashMap::new(),
            client_room: DashMap::new(),
            room_members: DashMap::new(),
        })
    }

    /// Registers the handle for this process's local delivery table.
    pub fn register_connection(&self, id: ClientId, handle: ConnectionHandle) {
        self.handles.insert(id, handle);
    }

    /// Unregisters on close, regardless of how it closed.
    pub fn drop_connection(&self, id: &ClientId) {
        self.handles.remove(id);
    }

    pub fn is_connected_locally(&self, id: &ClientId) -> bool {
        self.handles.contains_key(id)
    }

    /// Binds a client to a room, updating both the local routing table
    /// and the persisted reverse index (`client:<id>`).
    pub async fn bind(&self, id: &ClientId, room_id: &str) -> Result<()> {
        if let Some(previous) = self.client_room.get(id).map(|r| r.clone()) {
            if let Some(members) = self.room_members.get(&previous) {
                members.remove(id);
            }
        }

        self.client_room.insert(id.clone(), room_id.to_string());
        self.room_members
            .entry(room_id.to_string())
            .or_default()
            .insert(id.clone());

        self.store
            .hash_set(&client_key(id), "roomId", room_id.to_string())
            .await?;
        self.store
            .hash_set(&client_key(id), "lastSeen", now_millis().to_string())
            .await?;

        Ok(())
    }

    /// Removes a client's room binding and persisted record entirely.
    pub async fn unbind(&self, id: &ClientId) -> Result<()> {
        if let Some((_, room_id)) = self.client_room.remove(id) {
            if let Some(members) = self.room_members.get(&room_id) {
                members.remove(id);
            }
        }

        self.store.delete(&client_key(id)).await?;
        Ok(())
    }

    pub fn lookup_room_local(&self, id: &ClientId) -> Option<String> {
        self.client_room.get(id).map(|r| r.clone())
    }

    pub async fn lookup_room(&self, id: &ClientId) -> Result<Option<String>> {
        if let Some(room_id) = self.lookup_room_local(id) {
            return Ok(Some(room_id));
        }

        let fields = self.store.hash_get_all(&client_key(id)).await?;
        Ok(fields.get("roomId").cloned())
    }

    /// The connections, among a room's full membership, that are live on
    /// this process - what the Broadcast Bus fans a room event out to.
    pub fn local_members_of(&self, room_id: &str) -> Vec<ClientId> {
        self.room_members
            .get(room_id)
            .map(|members| members.iter().map(|m| m.clone()).collect())
            .unwrap_or_default()
    }

    /// Sends a targeted frame directly to one connection if it's local
    /// to this process; a no-op (not an error) if it isn't, since the
    /// caller is always addressing its own just-handled connection.
    pub fn send_to(&self, id: &ClientId, payload: String) {
        if let Some(handle) = self.handles.get(id) {
            handle.send(payload);
        }
    }

    /// Drops a client's local membership bookkeeping without touching
    /// the persisted record - used when a room closure's broadcast
    /// listener reacts to the closure for members local to this process.
    pub fn forget_local_membership(&self, id: &ClientId) {
        if let Some((_, room_id)) = self.client_room.remove(id) {
            if let Some(members) = self.room_members.get(&room_id) {
                members.remove(id);
            }
        }
    }

    /// Every persisted `client:<id>` record's id, fleet-wide - used by
    /// the Lifecycle Worker's orphan-cleanup and integrity passes, which
    /// need to see client records created by any process, not just this
    /// one's local table.
    pub async fn list_persisted_ids(&self) -> Result<Vec<ClientId>> {
        let keys = self.store.list_keys_with_prefix("client:").await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix("client:").map(str::to_string))
            .collect())
    }

    /// The raw `roomId`/`lastSeen` hash fields behind a persisted client
    /// record, for the Lifecycle Worker's orphan and integrity sweeps.
    pub async fn persisted_fields(
        &self,
        id: &ClientId,
    ) -> Result<std::collections::HashMap<String, String>> {
        self.store.hash_get_all(&client_key(id)).await
    }

    /// Deletes a persisted `client:<id>` record unconditionally, clearing
    /// any local bookkeeping for it too if this process happened to have
    /// some (a no-op otherwise).
    pub async fn delete_persisted_record(&self, id: &ClientId) -> Result<()> {
        self.forget_local_membership(id);
        self.store.delete(&client_key(id)).await?;
        Ok(())
    }

    /// Whether a persisted `client:<id>` record still exists - used to
    /// filter a room's member list down to clients with a live record.
    pub async fn client_record_exists(&self, id: &ClientId) -> Result<bool> {
        self.store.exists(&client_key(id)).await
    }
}
