use async_trait::async_trait;
use log::{info, warn};
use mongodb::bson::doc;
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};

use crate::room::Room;
use crate::{CollabError, Result};

/// The durable snapshot surface the Lifecycle Worker writes rooms
/// through and reads them back from at startup. Optional: a deployment
/// with no `MONGODB_URI` runs entirely off the shared store and gets
/// [`NullDurableStore`], which turns every call into a no-op.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn save_room(&self, room: &Room) -> Result<()>;
    async fn delete_room(&self, room_id: &str) -> Result<()>;
    async fn load_all_rooms(&self) -> Result<Vec<Room>>;
}

pub struct NullDurableStore;

#[async_trait]
impl DurableStore for NullDurableStore {
    async fn save_room(&self, _room: &Room) -> Result<()> {
        Ok(())
    }

    async fn delete_room(&self, _room_id: &str) -> Result<()> {
        Ok(())
    }

    async fn load_all_rooms(&self) -> Result<Vec<Room>> {
        Ok(Vec::new())
    }
}

/// A durable room snapshot, keyed by room id for upsert.
pub struct MongoDurableStore {
    rooms: Collection<Room>,
}

impl MongoDurableStore {
    pub async fn connect(uri: &str) -> Result<Self> {
        let options = ClientOptions::parse(uri)
            .await
            .map_err(|e| CollabError::Internal(format!("invalid mongodb uri: {e}")))?;

        let client = Client::with_options(options)
            .map_err(|e| CollabError::Internal(format!("mongodb client init failed: {e}")))?;

        let database = client.default_database().unwrap_or_else(|| client.database("watchroom"));
        let rooms = database.collection::<Room>("rooms");

        info!("connected to durable store");
        Ok(Self { rooms })
    }
}

#[async_trait]
impl DurableStore for MongoDurableStore {
    async fn save_room(&self, room: &Room) -> Result<()> {
        self.rooms
            .replace_one(doc! { "id": &room.id }, room)
            .upsert(true)
            .await
            .map_err(|e| {
                warn!("failed to persist room {}: {e}", room.id);
                CollabError::Internal(format!("durable save failed: {e}"))
            })?;

        Ok(())
    }

    async fn delete_room(&self, room_id: &str) -> Result<()> {
        self.rooms
            .delete_one(doc! { "id": room_id })
            .await
            .map_err(|e| CollabError::Internal(format!("durable delete failed: {e}")))?;

        Ok(())
    }

    async fn load_all_rooms(&self) -> Result<Vec<Room>> {
        use futures_util::TryStreamExt;

        let cursor = self
            .rooms
            .find(doc! {})
            .await
            .map_err(|e| CollabError::Internal(format!("durable scan failed: {e}")))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| CollabError::Internal(format!("durable scan failed: {e}")))
    }
}
