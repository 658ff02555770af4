use std::sync::{Arc, Mutex};

use watchroom_store::{BoxedStore, StoreError};

use crate::room::Room;
use crate::{CollabError, Result};

fn room_key(id: &str) -> String {
    format!("room:{id}")
}

/// Encodes/decodes `Room` records and performs atomic mutations
/// against them via the shared store's `atomic_update`.
///
/// A `Room` is serialized as a single self-contained JSON blob under
/// `room:<id>`.
pub struct RoomRepository {
    store: BoxedStore,
}

impl RoomRepository {
    pub fn new(store: BoxedStore) -> Self {
        Self { store }
    }

    pub async fn exists_id(&self, id: &str) -> Result<bool> {
        Ok(self.store.exists(&room_key(id)).await?)
    }

    pub async fn create(&self, room: Room) -> Result<()> {
        if self.exists_id(&room.id).await? {
            return Err(CollabError::Internal(format!(
                "room {} already exists",
                room.id
            )));
        }

        let encoded = serde_json::to_string(&room)
            .map_err(|e| CollabError::Internal(format!("room serialization failed: {e}")))?;

        self.store.set(&room_key(&room.id), encoded).await?;
        Ok(())
    }

    pub async fn load(&self, room_id: &str) -> Result<Room> {
        let raw = self
            .store
            .get(&room_key(room_id))
            .await?
            .ok_or_else(|| CollabError::RoomNotFound(room_id.to_string()))?;

        decode(&raw)
    }

    pub async fn delete(&self, room_id: &str) -> Result<()> {
        self.store.delete(&room_key(room_id)).await?;
        Ok(())
    }

    /// Every currently-known room id, used by the Lifecycle Worker's
    /// sweeps. Not cheap on a large shared store; callers should treat
    /// this as a periodic-background-job operation, not a hot path.
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        let keys = self.store.list_keys_with_prefix("room:").await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix("room:").map(str::to_string))
            .collect())
    }

    /// Atomic read-modify-write. `f` must be pure and may reject by
    /// returning an `Err`, in which case nothing is written - a command
    /// failure never mutates room state.
    ///
    /// The store's `atomic_update` only knows how to reject with a
    /// `StoreError`, so domain errors from `f` are stashed in `rejected`
    /// and re-raised after the call returns, preserving the original
    /// `CollabError` (including its wire `ErrorCode`) instead of
    /// collapsing it into a generic rejection message.
    pub async fn mutate<F>(&self, room_id: &str, mut f: F) -> Result<Room>
    where
        F: FnMut(&mut Room) -> Result<()> + Send + 'static,
    {
        let rejected: Arc<Mutex<Option<CollabError>>> = Arc::new(Mutex::new(None));
        let rejected_for_closure = rejected.clone();

        let key = room_key(room_id);
        let room_id_owned = room_id.to_string();

        let result = self
            .store
            .atomic_update(
                &key,
                Box::new(move |current| {
                    let Some(raw) = current else {
                        let err = CollabError::RoomNotFound(room_id_owned.clone());
                        *rejected_for_closure.lock().unwrap() = Some(err);
                        return Err(StoreError::Rejected("room not found".into()));
                    };

                    let mut room = match decode(&raw) {
                        Ok(room) => room,
                        Err(err) => {
                            *rejected_for_closure.lock().unwrap() = Some(err);
                            return Err(StoreError::Rejected("room corrupt".into()));
                        }
                    };

                    if let Err(err) = f(&mut room) {
                        *rejected_for_closure.lock().unwrap() = Some(err);
                        return Err(StoreError::Rejected("rejected by mutator".into()));
                    }

                    serde_json::to_string(&room)
                        .map_err(|e| StoreError::Internal(Box::new(e)))
                }),
            )
            .await;

        match result {
            Ok(encoded) => decode(&encoded),
            Err(_) => {
                if let Some(err) = rejected.lock().unwrap().take() {
                    Err(err)
                } else {
                    Err(CollabError::Store(StoreError::Conflict(room_id.to_string())))
                }
            }
        }
    }
}

fn decode(raw: &str) -> Result<Room> {
    serde_json::from_str(raw)
        .map_err(|e| CollabError::Internal(format!("room deserialization failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchroom_store::MemoryStore;

    fn repo() -> RoomRepository {
        RoomRepository::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn create_then_load_round_trips() {
        let repo = repo();
        let room = Room::new("473829".into(), "creator".into(), None);
        repo.create(room.clone()).await.unwrap();

        let loaded = repo.load("473829").await.unwrap();
        assert_eq!(loaded.id, room.id);
        assert_eq!(loaded.creator_id, room.creator_id);
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let repo = repo();
        let room = Room::new("473829".into(), "creator".into(), None);
        repo.create(room.clone()).await.unwrap();

        assert!(repo.create(room).await.is_err());
    }

    #[tokio::test]
    async fn load_missing_room_is_not_found() {
        let repo = repo();
        let err = repo.load("000000").await.unwrap_err();
        assert!(matches!(err, CollabError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn mutate_applies_and_persists() {
        let repo = repo();
        let room = Room::new("473829".into(), "creator".into(), None);
        repo.create(room).await.unwrap();

        let updated = repo
            .mutate("473829", |room| {
                room.set_volume(42);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(updated.volume, 42);
        assert_eq!(repo.load("473829").await.unwrap().volume, 42);
    }

    #[tokio::test]
    async fn mutate_rejection_leaves_room_untouched() {
        let repo = repo();
        let room = Room::new("473829".into(), "creator".into(), None);
        repo.create(room).await.unwrap();

        let err = repo
            .mutate("473829", |_room| Err(CollabError::AlreadyInQueue))
            .await
            .unwrap_err();

        assert!(matches!(err, CollabError::AlreadyInQueue));
        assert_eq!(repo.load("473829").await.unwrap().volume, 100);
    }

    #[tokio::test]
    async fn mutate_on_missing_room_is_not_found() {
        let repo = repo();
        let err = repo
            .mutate("000000", |_room| Ok(()))
            .await
            .unwrap_err();

        assert!(matches!(err, CollabError::RoomNotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_mutations_on_same_room_serialize() {
        let store = Arc::new(MemoryStore::new());
        let repo = Arc::new(RoomRepository::new(store));
        repo.create(Room::new("473829".into(), "creator".into(), None))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.mutate("473829", |room| {
                    room.video_queue.push(crate::video::Video {
                        id: watchroom_collab_test_id(),
                        title: String::new(),
                        duration: 1.0,
                        formatted_duration: String::new(),
                        thumbnail: String::new(),
                        channel: String::new(),
                        channel_verified: false,
                        upload_date: String::new(),
                        view_count: 0,
                        url: String::new(),
                    });
                    Ok(())
                })
                .await
                .unwrap();
            }));
        }

        for h in handles {
            h.await.unwrap();
        }

        let final_room = repo.load("473829").await.unwrap();
        assert_eq!(final_room.video_queue.len(), 50);
    }

    fn watchroom_collab_test_id() -> String {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        COUNTER.fetch_add(1, Ordering::SeqCst).to_string()
    }
}
