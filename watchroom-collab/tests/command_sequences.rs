use std::sync::Arc;
use std::time::Duration;

use watchroom_collab::{
    AssetAdapter, BroadcastBus, ClientRegistry, Command, Dispatcher, InboundFrame,
    MemoryAssetAdapter, RoomRepository, RuntimeConfig, Video,
};
use watchroom_store::MemoryStore;

fn test_config() -> Arc<RuntimeConfig> {
    Arc::new(RuntimeConfig {
        port: 8000,
        redis_host: "localhost".into(),
        redis_port: 6379,
        redis_password: None,
        mongodb_uri: None,
        inactive_timeout: Duration::from_secs(300),
        min_video_timeout_hours: 2.0,
        video_duration_multiplier: 5.0,
        is_encrypted_password: false,
        log_level: "info".into(),
        log_to_files: false,
        error_log_path: None,
        combined_log_path: None,
        node_env: String::new(),
    })
}

fn test_video(id: &str) -> Video {
    Video {
        id: id.to_string(),
        title: format!("video {id}"),
        duration: 120.0,
        formatted_duration: "2:00".into(),
        thumbnail: String::new(),
        channel: "a channel".into(),
        channel_verified: false,
        upload_date: "2024-01-01".into(),
        view_count: 0,
        url: format!("https://example.invalid/{id}"),
    }
}

fn frame(command: Command) -> InboundFrame {
    InboundFrame {
        command,
        id: None,
        timestamp: None,
        requires_ack: false,
    }
}

struct Harness {
    repository: Arc<RoomRepository>,
    dispatcher: Dispatcher,
}

fn harness() -> Harness {
    let store: watchroom_store::BoxedStore = Arc::new(MemoryStore::new());
    let repository = Arc::new(RoomRepository::new(store.clone()));
    let registry = ClientRegistry::new(store.clone());
    let bus = BroadcastBus::new(store, registry.clone());
    let adapter: Arc<dyn AssetAdapter> = Arc::new(MemoryAssetAdapter::default());
    let dispatcher = Dispatcher::new(repository.clone(), registry, bus, adapter, test_config());

    Harness { repository, dispatcher }
}

async fn only_room_id(repository: &RoomRepository) -> String {
    let ids = repository.list_ids().await.unwrap();
    assert_eq!(ids.len(), 1, "expected exactly one room, found {ids:?}");
    ids.into_iter().next().unwrap()
}

#[tokio::test]
async fn create_join_and_queue_a_video() {
    let Harness { repository, dispatcher } = harness();

    dispatcher.dispatch(&"alice".to_string(), frame(Command::CreateRoom { password: None })).await;
    let room_id = only_room_id(&repository).await;

    let room = repository.load(&room_id).await.unwrap();
    assert_eq!(room.creator_id, "alice");
    assert_eq!(room.clients, vec!["alice".to_string()]);

    dispatcher
        .dispatch(
            &"bob".to_string(),
            frame(Command::JoinRoom {
                room_id: room_id.clone(),
                password: None,
            }),
        )
        .await;

    let room = repository.load(&room_id).await.unwrap();
    assert_eq!(room.clients, vec!["alice".to_string(), "bob".to_string()]);

    dispatcher
        .dispatch(
            &"alice".to_string(),
            frame(Command::AddVideo { video: test_video("v1") }),
        )
        .await;

    let room = repository.load(&room_id).await.unwrap();
    // An empty room auto-starts playback on the first queued video.
    assert_eq!(room.playing_now.as_ref().map(|v| v.id.as_str()), Some("v1"));
    assert!(room.video_queue.is_empty());
    assert!(room.is_playing);
}

#[tokio::test]
async fn duplicate_video_is_rejected_and_leaves_the_room_unchanged() {
    let Harness { repository, dispatcher } = harness();

    dispatcher.dispatch(&"alice".to_string(), frame(Command::CreateRoom { password: None })).await;
    let room_id = only_room_id(&repository).await;

    dispatcher
        .dispatch(
            &"alice".to_string(),
            frame(Command::AddVideo { video: test_video("v1") }),
        )
        .await;
    dispatcher
        .dispatch(
            &"alice".to_string(),
            frame(Command::AddVideo { video: test_video("v2") }),
        )
        .await;

    let before = repository.load(&room_id).await.unwrap();

    // v1 is already playing, v2 sits in the queue; re-adding v2 must be a no-op.
    dispatcher
        .dispatch(
            &"alice".to_string(),
            frame(Command::AddVideo { video: test_video("v2") }),
        )
        .await;

    let after = repository.load(&room_id).await.unwrap();
    assert_eq!(before.video_queue.len(), after.video_queue.len());
    assert_eq!(after.video_queue.len(), 1);
}

#[tokio::test]
async fn leaving_and_rejoining_tracks_membership() {
    let Harness { repository, dispatcher } = harness();

    dispatcher.dispatch(&"alice".to_string(), frame(Command::CreateRoom { password: None })).await;
    let room_id = only_room_id(&repository).await;

    dispatcher
        .dispatch(
            &"bob".to_string(),
            frame(Command::JoinRoom {
                room_id: room_id.clone(),
                password: None,
            }),
        )
        .await;

    dispatcher.dispatch(&"bob".to_string(), frame(Command::LeaveRoom)).await;

    let room = repository.load(&room_id).await.unwrap();
    assert_eq!(room.clients, vec!["alice".to_string()]);

    dispatcher
        .dispatch(
            &"bob".to_string(),
            frame(Command::ReJoinRoom {
                room_id: room_id.clone(),
                password: None,
            }),
        )
        .await;

    let room = repository.load(&room_id).await.unwrap();
    assert_eq!(room.clients, vec!["alice".to_string(), "bob".to_string()]);
}

#[tokio::test]
async fn password_protected_room_rejects_wrong_password_and_accepts_right_one() {
    let Harness { repository, dispatcher } = harness();

    dispatcher
        .dispatch(
            &"alice".to_string(),
            frame(Command::CreateRoom { password: Some("s3".to_string()) }),
        )
        .await;
    let room_id = only_room_id(&repository).await;

    dispatcher
        .dispatch(
            &"bob".to_string(),
            frame(Command::JoinRoom {
                room_id: room_id.clone(),
                password: Some("wrong".to_string()),
            }),
        )
        .await;

    let room = repository.load(&room_id).await.unwrap();
    assert_eq!(room.clients, vec!["alice".to_string()]);

    dispatcher
        .dispatch(
            &"bob".to_string(),
            frame(Command::JoinRoom {
                room_id: room_id.clone(),
                password: Some("s3".to_string()),
            }),
        )
        .await;

    let room = repository.load(&room_id).await.unwrap();
    assert_eq!(room.clients, vec!["alice".to_string(), "bob".to_string()]);
}

#[tokio::test]
async fn creator_closes_the_room() {
    let Harness { repository, dispatcher } = harness();

    dispatcher.dispatch(&"alice".to_string(), frame(Command::CreateRoom { password: None })).await;
    let room_id = only_room_id(&repository).await;

    dispatcher.dispatch(&"alice".to_string(), frame(Command::CloseRoom)).await;

    assert!(!repository.exists_id(&room_id).await.unwrap());
}

#[tokio::test]
async fn non_creator_cannot_close_the_room() {
    let Harness { repository, dispatcher } = harness();

    dispatcher.dispatch(&"alice".to_string(), frame(Command::CreateRoom { password: None })).await;
    let room_id = only_room_id(&repository).await;

    dispatcher
        .dispatch(
            &"bob".to_string(),
            frame(Command::JoinRoom {
                room_id: room_id.clone(),
                password: None,
            }),
        )
        .await;

    dispatcher.dispatch(&"bob".to_string(), frame(Command::CloseRoom)).await;

    // Still there - bob isn't the creator, so closeRoom must have failed silently
    // from the caller's perspective (reported only to bob as errorWithCode).
    assert!(repository.exists_id(&room_id).await.unwrap());
}
