use serde::{Deserialize, Serialize};

use watchroom_core::now_millis;

use crate::video::Video;
use crate::{CollabError, Result};

/// A connection identity. Opaque from the room's point of view - it
/// never needs to be anything but a key.
pub type ClientId = String;

/// The unit of shared playback state, addressed by a 6-digit id.
///
/// Only [`crate::RoomRepository`] ever writes a `Room` back to storage;
/// callers get one out of `load`/`mutate` and treat it as a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub password: Option<String>,
    pub creator_id: ClientId,
    pub clients: Vec<ClientId>,
    pub video_queue: Vec<Video>,
    pub history_queue: Vec<Video>,
    pub playing_now: Option<Video>,
    pub is_playing: bool,
    pub current_time: f64,
    pub volume: u8,
    pub last_activity: u64,
}

impl Room {
    pub fn new(id: String, creator_id: ClientId, password: Option<String>) -> Self {
        Self {
            id,
            password,
            creator_id,
            clients: Vec::new(),
            video_queue: Vec::new(),
            history_queue: Vec::new(),
            playing_now: None,
            is_playing: false,
            current_time: 0.0,
            volume: 100,
            last_activity: now_millis(),
        }
    }

    /// A persisted room with no members is eligible for eviction.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Bumps `lastActivity`; applied by every mutating operation below.
    fn touch(&mut self) {
        self.last_activity = now_millis();
    }

    pub fn add_client(&mut self, client_id: &ClientId) {
        if !self.clients.iter().any(|c| c == client_id) {
            self.clients.push(client_id.clone());
        }
        self.touch();
    }

    pub fn remove_client(&mut self, client_id: &ClientId) {
        self.clients.retain(|c| c != client_id);
        self.touch();
    }

    pub fn has_video(&self, video_id: &str) -> bool {
        self.video_queue.iter().any(|v| v.id == video_id)
    }

    /// Caller is responsible for the embeddability check; this only
    /// enforces that queue entries stay unique and starts playback when
    /// the room was otherwise idle.
    pub fn add_video(&mut self, video: Video) -> Result<()> {
        if self.has_video(&video.id) {
            return Err(CollabError::AlreadyInQueue);
        }

        if self.playing_now.is_none() && self.video_queue.is_empty() {
            self.start_playing(video);
        } else {
            self.video_queue.push(video);
        }

        self.touch();
        Ok(())
    }

    /// Adds a video and moves it to the front of the queue in one step.
    pub fn add_video_to_top(&mut self, video: Video) {
        self.video_queue.retain(|v| v.id != video.id);

        if self.playing_now.is_none() && self.video_queue.is_empty() {
            self.start_playing(video);
        } else {
            self.video_queue.insert(0, video);
        }

        self.touch();
    }

    pub fn remove_video(&mut self, video_id: &str) {
        self.video_queue.retain(|v| v.id != video_id);
        self.touch();
    }

    pub fn move_to_top(&mut self, video_id: &str) -> Result<()> {
        let index = self
            .video_queue
            .iter()
            .position(|v| v.id == video_id)
            .ok_or(CollabError::VideoNotFound)?;

        let video = self.video_queue.remove(index);
        self.video_queue.insert(0, video);
        self.touch();
        Ok(())
    }

    /// Uniform random permutation via Fisher-Yates.
    pub fn shuffle_queue(&mut self) {
        use rand::seq::SliceRandom;
        self.video_queue.shuffle(&mut rand::thread_rng());
        self.touch();
    }

    pub fn clear_queue(&mut self) {
        self.video_queue.clear();
        self.touch();
    }

    pub fn clear_history(&mut self) {
        self.history_queue.clear();
        self.touch();
    }

    /// Prepends to `historyQueue`, deduplicating on video id first so the
    /// front of the list is always the single most recent occurrence.
    fn push_history(&mut self, video: Video) {
        self.history_queue.retain(|v| v.id != video.id);
        self.history_queue.insert(0, video);
    }

    fn start_playing(&mut self, video: Video) {
        self.playing_now = Some(video);
        self.is_playing = true;
        self.current_time = 0.0;
    }

    /// Interrupts whatever is currently playing. Embeddability is
    /// checked by the caller.
    pub fn play_now(&mut self, video: Video) {
        self.video_queue.retain(|v| v.id != video.id);
        self.history_queue.retain(|v| v.id != video.id);

        if let Some(previous) = self.playing_now.take() {
            self.push_history(previous);
        }

        self.start_playing(video);
        self.touch();
    }

    /// Advances to the next queued video, or stops playback if the
    /// queue is empty.
    pub fn advance(&mut self) {
        if let Some(finished) = self.playing_now.take() {
            self.push_history(finished);
        }

        if !self.video_queue.is_empty() {
            let next = self.video_queue.remove(0);
            self.start_playing(next);
        } else {
            self.is_playing = false;
            self.current_time = 0.0;
        }

        self.touch();
    }

    pub fn play(&mut self) {
        self.is_playing = true;
        self.touch();
    }

    pub fn pause(&mut self) {
        self.is_playing = false;
        self.touch();
    }

    pub fn replay(&mut self) -> Result<()> {
        if self.playing_now.is_none() {
            return Err(CollabError::InvalidMessage(
                "replay requires a currently playing video".into(),
            ));
        }

        self.current_time = 0.0;
        self.is_playing = true;
        self.touch();
        Ok(())
    }

    pub fn seek(&mut self, time: f64) {
        self.current_time = time.max(0.0);
        self.touch();
    }

    /// `volume` is clamped to [0, 100] on every mutation.
    pub fn set_volume(&mut self, volume: i64) {
        self.volume = volume.clamp(0, 100) as u8;
        self.touch();
    }

    /// Appends playlist-import survivors, re-checking uniqueness since
    /// membership may have changed between the caller's own dedup pass
    /// and this atomic mutation.
    pub fn append_videos(&mut self, videos: Vec<Video>) {
        for video in videos {
            if !self.has_video(&video.id) {
                self.video_queue.push(video);
            }
        }

        if self.playing_now.is_none() && !self.video_queue.is_empty() {
            let next = self.video_queue.remove(0);
            self.start_playing(next);
        }

        self.touch();
    }
}

/// The wire projection of a [`Room`]: identical except `clients` is
/// stripped - no outbound event leaks connection identities, so the
/// same stripping applies everywhere a `Room` crosses the wire (see
/// DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub id: String,
    pub video_queue: Vec<Video>,
    pub history_queue: Vec<Video>,
    pub playing_now: Option<Video>,
    pub is_playing: bool,
    pub current_time: f64,
    pub volume: u8,
    pub last_activity: u64,
}

impl From<&Room> for RoomView {
    fn from(room: &Room) -> Self {
        Self {
            id: room.id.clone(),
            video_queue: room.video_queue.clone(),
            history_queue: room.history_queue.clone(),
            playing_now: room.playing_now.clone(),
            is_playing: room.is_playing,
            current_time: room.current_time,
            volume: room.volume,
            last_activity: room.last_activity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: &str) -> Video {
        Video {
            id: id.to_string(),
            title: id.to_string(),
            duration: 120.0,
            formatted_duration: "2:00".into(),
            thumbnail: String::new(),
            channel: String::new(),
            channel_verified: false,
            upload_date: String::new(),
            view_count: 0,
            url: String::new(),
        }
    }

    fn room() -> Room {
        Room::new("473829".into(), "creator".into(), None)
    }

    #[test]
    fn add_video_starts_playback_when_idle() {
        let mut r = room();
        r.add_video(video("v1")).unwrap();

        assert_eq!(r.playing_now.as_ref().unwrap().id, "v1");
        assert!(r.is_playing);
        assert_eq!(r.current_time, 0.0);
        assert!(r.video_queue.is_empty());
    }

    #[test]
    fn add_video_rejects_duplicate() {
        let mut r = room();
        r.add_video(video("v1")).unwrap();
        r.add_video(video("v2")).unwrap(); // goes to queue since v1 is playing

        let err = r.add_video(video("v2")).unwrap_err();
        assert!(matches!(err, CollabError::AlreadyInQueue));
    }

    #[test]
    fn add_then_remove_round_trips() {
        let mut r = room();
        r.add_video(video("v1")).unwrap(); // starts playing
        r.add_video(video("v2")).unwrap(); // goes to queue

        let before = r.video_queue.clone();
        let playing_before = r.playing_now.clone();

        r.remove_video("v2");
        r.add_video(video("v2")).unwrap();
        r.remove_video("v2");

        assert_eq!(r.video_queue, before);
        assert_eq!(r.playing_now, playing_before);
    }

    #[test]
    fn move_to_top_is_idempotent() {
        let mut r = room();
        r.video_queue = vec![video("a"), video("b"), video("c")];

        r.move_to_top("b").unwrap();
        let after_first = r.video_queue.clone();

        r.move_to_top("b").unwrap();
        assert_eq!(r.video_queue, after_first);
        assert_eq!(r.video_queue[0].id, "b");
    }

    #[test]
    fn move_to_top_missing_video_errors() {
        let mut r = room();
        let err = r.move_to_top("missing").unwrap_err();
        assert!(matches!(err, CollabError::VideoNotFound));
    }

    #[test]
    fn shuffle_preserves_membership() {
        let mut r = room();
        r.video_queue = (0..20).map(|i| video(&format!("v{i}"))).collect();
        let before: std::collections::HashSet<_> =
            r.video_queue.iter().map(|v| v.id.clone()).collect();

        r.shuffle_queue();

        let after: std::collections::HashSet<_> =
            r.video_queue.iter().map(|v| v.id.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn play_pause_is_idempotent_on_is_playing() {
        let mut r = room();
        r.pause();
        r.play();
        r.play();
        assert!(r.is_playing);

        r.play();
        r.pause();
        assert!(!r.is_playing);
    }

    #[test]
    fn next_video_rotates_queue_into_history() {
        let mut r = room();
        r.playing_now = Some(video("v1"));
        r.video_queue = vec![video("v2"), video("v3")];

        r.advance();

        assert_eq!(r.playing_now.as_ref().unwrap().id, "v2");
        assert_eq!(r.video_queue.len(), 1);
        assert_eq!(r.video_queue[0].id, "v3");
        assert_eq!(r.history_queue.len(), 1);
        assert_eq!(r.history_queue[0].id, "v1");
        assert!(r.is_playing);
        assert_eq!(r.current_time, 0.0);
    }

    #[test]
    fn next_video_with_empty_queue_stops_playback() {
        let mut r = room();
        r.playing_now = Some(video("v1"));

        r.advance();

        assert!(r.playing_now.is_none());
        assert!(!r.is_playing);
        assert_eq!(r.history_queue[0].id, "v1");
    }

    #[test]
    fn set_volume_clamps() {
        let mut r = room();
        r.set_volume(-5);
        assert_eq!(r.volume, 0);

        r.set_volume(250);
        assert_eq!(r.volume, 100);
    }

    #[test]
    fn history_dedups_on_prepend() {
        let mut r = room();
        r.playing_now = Some(video("v1"));
        r.push_history(video("v2"));
        r.push_history(video("v1"));
        r.push_history(video("v2"));

        assert_eq!(r.history_queue.len(), 2);
        assert_eq!(r.history_queue[0].id, "v2");
        assert_eq!(r.history_queue[1].id, "v1");
    }

    #[test]
    fn replay_requires_playing_now() {
        let mut r = room();
        assert!(r.replay().is_err());

        r.playing_now = Some(video("v1"));
        r.current_time = 42.0;
        r.is_playing = false;
        r.replay().unwrap();

        assert_eq!(r.current_time, 0.0);
        assert!(r.is_playing);
    }
}
