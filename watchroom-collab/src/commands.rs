use std::sync::Arc;
use std::time::Duration;

use log::{error, warn};
use serde::Deserialize;
use tokio::time::sleep;

use crate::adapter::AssetAdapter;
use crate::bus::BroadcastBus;
use crate::config::RuntimeConfig;
use crate::password::PasswordScheme;
use crate::registry::ClientRegistry;
use crate::repository::RoomRepository;
use crate::room::{ClientId, Room, RoomView};
use crate::util::random_room_id;
use crate::video::Video;
use crate::{CollabError, Result};
use crate::events::ServerEvent;

const IMPORT_BATCH_SIZE: usize = 50;
const IMPORT_BATCH_PAUSE: Duration = Duration::from_millis(100);
const ROOM_ID_GENERATION_ATTEMPTS: usize = 50;

/// The full message envelope an inbound frame carries: the command tag
/// plus the optional `id`/`timestamp`/`requiresAck` fields that exist
/// independently of which command was sent.
#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    #[serde(flatten)]
    pub command: Command,
    pub id: Option<String>,
    #[allow(dead_code)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub requires_ack: bool,
}

/// The closed set of client commands, deserialized directly off the
/// `type` tag. An unrecognized tag fails to deserialize at all, which
/// the Connection Handler reports as `invalidMessage` - exhaustive
/// dispatch enforced at the serde layer instead of a manual catch-all
/// variant.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    Ping,
    CreateRoom {
        #[serde(default)]
        password: Option<String>,
    },
    JoinRoom {
        room_id: String,
        password: Option<String>,
    },
    ReJoinRoom {
        room_id: String,
        password: Option<String>,
    },
    LeaveRoom,
    CloseRoom,
    SendMessage {
        content: String,
    },
    AddVideo {
        video: Video,
    },
    AddVideoAndMoveToTop {
        video: Video,
    },
    RemoveVideoFromQueue {
        video_id: String,
    },
    MoveToTop {
        video_id: String,
    },
    ShuffleQueue,
    ClearQueue,
    ClearHistory,
    PlayNow {
        video: Video,
    },
    NextVideo,
    VideoFinished,
    Play,
    Pause,
    Replay,
    Seek {
        time: f64,
    },
    SetVolume {
        volume: i64,
    },
    ImportPlaylist {
        #[serde(rename = "ref")]
        reference: String,
    },
}

/// The command dispatcher. Holds everything a command might need -
/// the repository for atomic mutation, the registry for membership and
/// targeted replies, the bus for room-wide broadcast, the asset adapter
/// for embeddability/playlist expansion, and the runtime config for the
/// password scheme and any per-room policy.
pub struct Dispatcher {
    pub(crate) repository: Arc<RoomRepository>,
    pub(crate) registry: Arc<ClientRegistry>,
    pub(crate) bus: Arc<BroadcastBus>,
    pub(crate) adapter: Arc<dyn AssetAdapter>,
    pub(crate) config: Arc<RuntimeConfig>,
}

impl Dispatcher {
    pub fn new(
        repository: Arc<RoomRepository>,
        registry: Arc<ClientRegistry>,
        bus: Arc<BroadcastBus>,
        adapter: Arc<dyn AssetAdapter>,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        Self {
            repository,
            registry,
            bus,
            adapter,
            config,
        }
    }

    /// The asset adapter, exposed for the HTTP surface's catalog
    /// endpoints (`/search`, `/suggestions`, `/playlist`, `/related`,
    /// `/check-embeddable`), which don't otherwise go through a command.
    pub fn adapter(&self) -> &Arc<dyn AssetAdapter> {
        &self.adapter
    }

    fn password_scheme(&self) -> PasswordScheme {
        PasswordScheme::from_config_flag(self.config.is_encrypted_password)
    }

    fn reply(&self, client_id: &ClientId, event: ServerEvent) {
        self.bus.send_targeted(client_id, &event);
    }

    /// If `requiresAck` is true, an `ack` carrying the `id` is sent
    /// back before processing.
    fn maybe_ack(&self, client_id: &ClientId, frame: &InboundFrame) {
        if frame.requires_ack {
            if let Some(id) = &frame.id {
                self.reply(client_id, ServerEvent::Ack { id: id.clone() });
            }
        }
    }

    /// Entry point from the Connection Handler. Every command runs
    /// inside this try region: domain errors become `errorWithCode`
    /// targeted at the sender; anything else becomes a generic `error`
    /// and is logged with full context. Neither ever terminates the
    /// connection.
    pub async fn dispatch(&self, client_id: &ClientId, frame: InboundFrame) {
        self.maybe_ack(client_id, &frame);

        if let Err(err) = self.handle(client_id, frame.command).await {
            self.report_failure(client_id, err);
        }
    }

    /// Called by the Connection Handler when a socket closes, regardless
    /// of whether the client ever sent `leaveRoom` itself. A connection
    /// that never joined a room is a no-op.
    pub async fn disconnect(&self, client_id: &ClientId) -> Result<()> {
        match self.leave_room(client_id).await {
            Ok(()) | Err(CollabError::NotInRoom) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn report_failure(&self, client_id: &ClientId, err: CollabError) {
        match &err {
            CollabError::Internal(_) | CollabError::Store(_) => {
                error!("command failed for {client_id}: {err}");
                self.reply(
                    client_id,
                    ServerEvent::Error {
                        message: "an internal error occurred".into(),
                    },
                );
            }
            _ => {
                self.reply(client_id, ServerEvent::from_error(&err));
            }
        }
    }

    async fn handle(&self, client_id: &ClientId, command: Command) -> Result<()> {
        match command {
            Command::Ping => {
                self.reply(client_id, ServerEvent::Pong);
                Ok(())
            }
            Command::CreateRoom { password } => self.create_room(client_id, password).await,
            Command::JoinRoom { room_id, password } => {
                self.join_room(client_id, room_id, password, false).await
            }
            Command::ReJoinRoom { room_id, password } => {
                self.join_room(client_id, room_id, password, true).await
            }
            Command::LeaveRoom => self.leave_room(client_id).await,
            Command::CloseRoom => self.close_room(client_id).await,
            Command::SendMessage { content } => self.send_message(client_id, content).await,
            Command::AddVideo { video } => self.add_video(client_id, video).await,
            Command::AddVideoAndMoveToTop { video } => {
                self.add_video_to_top(client_id, video).await
            }
            Command::RemoveVideoFromQueue { video_id } => {
                self.remove_video(client_id, video_id).await
            }
            Command::MoveToTop { video_id } => self.move_to_top(client_id, video_id).await,
            Command::ShuffleQueue => self.shuffle_queue(client_id).await,
            Command::ClearQueue => self.clear_queue(client_id).await,
            Command::ClearHistory => self.clear_history(client_id).await,
            Command::PlayNow { video } => self.play_now(client_id, video).await,
            Command::NextVideo | Command::VideoFinished => self.next_video(client_id).await,
            Command::Play => self.play(client_id).await,
            Command::Pause => self.pause(client_id).await,
            Command::Replay => self.replay(client_id).await,
            Command::Seek { time } => self.seek(client_id, time).await,
            Command::SetVolume { volume } => self.set_volume(client_id, volume).await,
            Command::ImportPlaylist { reference } => {
                self.import_playlist(client_id, reference).await
            }
        }
    }

    /// Most commands require the sender to currently be bound to a
    /// room; `ping`, `createRoom`, and `joinRoom`/`reJoinRoom` are the
    /// exceptions.
    async fn current_room(&self, client_id: &ClientId) -> Result<String> {
        self.registry
            .lookup_room(client_id)
            .await?
            .ok_or(CollabError::NotInRoom)
    }

    async fn broadcast_room_update(&self, room_id: &str, room: &Room) -> Result<()> {
        self.bus
            .broadcast(room_id, &ServerEvent::RoomUpdate { room: room.into() })
            .await
    }

    async fn create_room(&self, client_id: &ClientId, password: Option<String>) -> Result<()> {
        let mut room_id = random_room_id();
        let mut attempts = 0;

        while self.repository.exists_id(&room_id).await? {
            attempts += 1;
            if attempts >= ROOM_ID_GENERATION_ATTEMPTS {
                return Err(CollabError::Internal(
                    "failed to generate a unique room id".into(),
                ));
            }
            room_id = random_room_id();
        }

        let stored_password = password
            .as_deref()
            .map(|pw| self.password_scheme().store(pw))
            .transpose()?;

        let room = Room::new(room_id.clone(), client_id.clone(), stored_password);
        self.repository.create(room).await?;

        self.reply(
            client_id,
            ServerEvent::RoomCreated {
                room_id: room_id.clone(),
            },
        );

        // Binds the sender to the new room, replies roomCreated, then
        // runs the same side effects as an ordinary joinRoom.
        self.join_room(client_id, room_id, None, false).await
    }

    async fn join_room(
        &self,
        client_id: &ClientId,
        room_id: String,
        password: Option<String>,
        is_rejoin: bool,
    ) -> Result<()> {
        let not_found = |room_id: &str| {
            if is_rejoin {
                CollabError::RejoinRoomNotFound(room_id.to_string())
            } else {
                CollabError::RoomNotFound(room_id.to_string())
            }
        };

        if !self.repository.exists_id(&room_id).await? {
            return Err(not_found(&room_id));
        }

        // Leave any current room first, ignoring `NotInRoom` since a
        // fresh connection isn't in one yet.
        if let Err(err) = self.leave_room(client_id).await {
            if !matches!(err, CollabError::NotInRoom) {
                return Err(err);
            }
        }

        let scheme = self.password_scheme();
        let room = self
            .repository
            .mutate(&room_id, move |room| {
                if let Some(stored) = &room.password {
                    let candidate = password.as_deref().unwrap_or("");
                    if !scheme.verify(candidate, stored) {
                        return Err(CollabError::IncorrectPassword);
                    }
                }

                room.add_client(client_id);
                Ok(())
            })
            .await
            .map_err(|err| match err {
                CollabError::RoomNotFound(id) => not_found(&id),
                other => other,
            })?;

        self.registry.bind(client_id, &room_id).await?;
        self.bus.ensure_subscribed(&room_id);

        self.reply(
            client_id,
            ServerEvent::RoomJoined {
                your_id: client_id.clone(),
                room: RoomView::from(&room),
            },
        );

        Ok(())
    }

    async fn leave_room(&self, client_id: &ClientId) -> Result<()> {
        let room_id = self.current_room(client_id).await?;

        self.repository
            .mutate(&room_id, {
                let client_id = client_id.clone();
                move |room| {
                    room.remove_client(&client_id);
                    Ok(())
                }
            })
            .await?;

        self.registry.unbind(client_id).await?;
        self.reply(client_id, ServerEvent::LeftRoom);

        Ok(())
    }

    async fn close_room(&self, client_id: &ClientId) -> Result<()> {
        let room_id = self.current_room(client_id).await?;
        let room = self.repository.load(&room_id).await?;

        if room.creator_id != *client_id {
            return Err(CollabError::NotCreatorOfRoom);
        }

        self.bus
            .broadcast(
                &room_id,
                &ServerEvent::RoomClosed {
                    reason: "Room closed by creator".into(),
                },
            )
            .await?;

        self.bus.forget(&room_id);
        self.repository.delete(&room_id).await?;

        for member in &room.clients {
            if let Err(e) = self.registry.unbind(member).await {
                warn!("failed to unbind {member} after room {room_id} closed: {e}");
            }
        }

        Ok(())
    }

    async fn send_message(&self, client_id: &ClientId, content: String) -> Result<()> {
        let room_id = self.current_room(client_id).await?;

        self.bus
            .broadcast(
                &room_id,
                &ServerEvent::Message {
                    sender: client_id.clone(),
                    content,
                },
            )
            .await
    }

    async fn require_embeddable(&self, video: &Video) -> Result<()> {
        if !self.adapter.is_embeddable(&video.id).await? {
            return Err(CollabError::VideoNotEmbeddable);
        }
        Ok(())
    }

    async fn add_video(&self, client_id: &ClientId, video: Video) -> Result<()> {
        let room_id = self.current_room(client_id).await?;

        // Check the cheap, room-local rejection first so a collision
        // never pays for a network round trip before a cheaper local
        // check could have already rejected the command.
        {
            let room = self.repository.load(&room_id).await?;
            if room.has_video(&video.id) {
                return Err(CollabError::AlreadyInQueue);
            }
        }

        self.require_embeddable(&video).await?;

        let room = self
            .repository
            .mutate(&room_id, {
                let video = video.clone();
                move |room| room.add_video(video.clone())
            })
            .await?;

        self.broadcast_room_update(&room_id, &room).await
    }

    async fn add_video_to_top(&self, client_id: &ClientId, video: Video) -> Result<()> {
        let room_id = self.current_room(client_id).await?;
        self.require_embeddable(&video).await?;

        let room = self
            .repository
            .mutate(&room_id, {
                let video = video.clone();
                move |room| {
                    room.add_video_to_top(video.clone());
                    Ok(())
                }
            })
            .await?;

        self.broadcast_room_update(&room_id, &room).await
    }

    async fn remove_video(&self, client_id: &ClientId, video_id: String) -> Result<()> {
        let room_id = self.current_room(client_id).await?;

        let room = self
            .repository
            .mutate(&room_id, move |room| {
                room.remove_video(&video_id);
                Ok(())
            })
            .await?;

        self.broadcast_room_update(&room_id, &room).await
    }

    async fn move_to_top(&self, client_id: &ClientId, video_id: String) -> Result<()> {
        let room_id = self.current_room(client_id).await?;

        let room = self
            .repository
            .mutate(&room_id, move |room| room.move_to_top(&video_id))
            .await?;

        self.broadcast_room_update(&room_id, &room).await
    }

    async fn shuffle_queue(&self, client_id: &ClientId) -> Result<()> {
        let room_id = self.current_room(client_id).await?;

        let room = self
            .repository
            .mutate(&room_id, |room| {
                room.shuffle_queue();
                Ok(())
            })
            .await?;

        self.broadcast_room_update(&room_id, &room).await
    }

    async fn clear_queue(&self, client_id: &ClientId) -> Result<()> {
        let room_id = self.current_room(client_id).await?;

        let room = self
            .repository
            .mutate(&room_id, |room| {
                room.clear_queue();
                Ok(())
            })
            .await?;

        self.broadcast_room_update(&room_id, &room).await
    }

    async fn clear_history(&self, client_id: &ClientId) -> Result<()> {
        let room_id = self.current_room(client_id).await?;

        let room = self
            .repository
            .mutate(&room_id, |room| {
                room.clear_history();
                Ok(())
            })
            .await?;

        self.broadcast_room_update(&room_id, &room).await
    }

    async fn play_now(&self, client_id: &ClientId, video: Video) -> Result<()> {
        let room_id = self.current_room(client_id).await?;
        self.require_embeddable(&video).await?;

        let room = self
            .repository
            .mutate(&room_id, {
                let video = video.clone();
                move |room| {
                    room.play_now(video.clone());
                    Ok(())
                }
            })
            .await?;

        self.broadcast_room_update(&room_id, &room).await
    }

    async fn next_video(&self, client_id: &ClientId) -> Result<()> {
        let room_id = self.current_room(client_id).await?;

        let room = self
            .repository
            .mutate(&room_id, |room| {
                room.advance();
                Ok(())
            })
            .await?;

        self.broadcast_room_update(&room_id, &room).await
    }

    async fn play(&self, client_id: &ClientId) -> Result<()> {
        let room_id = self.current_room(client_id).await?;

        self.repository
            .mutate(&room_id, |room| {
                room.play();
                Ok(())
            })
            .await?;

        self.bus.broadcast(&room_id, &ServerEvent::Play).await
    }

    async fn pause(&self, client_id: &ClientId) -> Result<()> {
        let room_id = self.current_room(client_id).await?;

        self.repository
            .mutate(&room_id, |room| {
                room.pause();
                Ok(())
            })
            .await?;

        self.bus.broadcast(&room_id, &ServerEvent::Pause).await
    }

    async fn replay(&self, client_id: &ClientId) -> Result<()> {
        let room_id = self.current_room(client_id).await?;

        self.repository
            .mutate(&room_id, |room| room.replay())
            .await?;

        self.bus.broadcast(&room_id, &ServerEvent::Replay).await
    }

    async fn seek(&self, client_id: &ClientId, time: f64) -> Result<()> {
        let room_id = self.current_room(client_id).await?;

        let room = self
            .repository
            .mutate(&room_id, move |room| {
                room.seek(time);
                Ok(())
            })
            .await?;

        self.bus
            .broadcast(
                &room_id,
                &ServerEvent::CurrentTimeChanged {
                    current_time: room.current_time,
                },
            )
            .await
    }

    async fn set_volume(&self, client_id: &ClientId, volume: i64) -> Result<()> {
        let room_id = self.current_room(client_id).await?;

        let room = self
            .repository
            .mutate(&room_id, move |room| {
                room.set_volume(volume);
                Ok(())
            })
            .await?;

        self.bus
            .broadcast(&room_id, &ServerEvent::VolumeChanged { volume: room.volume })
            .await
    }

    /// Expands up to 200 entries, probing embeddability and deduping in
    /// batches of 50 with a pause between batches so a large playlist
    /// doesn't hammer the asset adapter. The expensive probing happens
    /// outside any atomic mutation; the final append is one atomic step
    /// that re-checks membership, since the queue may have changed while
    /// probing was in flight.
    async fn import_playlist(&self, client_id: &ClientId, reference: String) -> Result<()> {
        let room_id = self.current_room(client_id).await?;

        let candidates = self
            .adapter
            .expand_playlist(&reference)
            .await
            .map_err(|e| CollabError::Internal(format!("playlist expansion failed: {e}")))?;

        let mut survivors = Vec::new();

        for batch in candidates.chunks(IMPORT_BATCH_SIZE) {
            let existing = self.repository.load(&room_id).await?;

            for video in batch {
                if existing.has_video(&video.id) || survivors.iter().any(|v: &Video| v.id == video.id) {
                    continue;
                }

                match self.adapter.is_embeddable(&video.id).await {
                    Ok(true) => survivors.push(video.clone()),
                    Ok(false) => {}
                    Err(e) => warn!("embeddability probe failed for {}: {e}", video.id),
                }
            }

            sleep(IMPORT_BATCH_PAUSE).await;
        }

        let room = self
            .repository
            .mutate(&room_id, move |room| {
                room.append_videos(survivors.clone());
                Ok(())
            })
            .await?;

        self.broadcast_room_update(&room_id, &room).await
    }
}
