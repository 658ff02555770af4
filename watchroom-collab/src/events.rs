use serde::{Deserialize, Serialize};

use crate::errors::ErrorCode;
use crate::room::RoomView;

/// Every outbound frame tag the wire protocol emits.
///
/// Also round-trips through `Deserialize`: the Broadcast Bus decodes it
/// back out of the payload it gets from the shared store's pub/sub
/// channel before fanning it out to local connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    Pong,
    Ack {
        id: String,
    },
    RoomCreated {
        room_id: String,
    },
    RoomJoined {
        your_id: String,
        room: RoomView,
    },
    RoomUpdate {
        room: RoomView,
    },
    LeftRoom,
    RoomClosed {
        reason: String,
    },
    Message {
        sender: String,
        content: String,
    },
    Play,
    Pause,
    Replay,
    VolumeChanged {
        volume: u8,
    },
    CurrentTimeChanged {
        current_time: f64,
    },
    Error {
        message: String,
    },
    ErrorWithCode {
        code: ErrorCode,
        message: String,
    },
}

impl ServerEvent {
    /// Every command failure becomes a generic `error` unless it maps to
    /// one of the closed `ErrorCode` variants.
    pub fn from_error(err: &crate::CollabError) -> Self {
        Self::ErrorWithCode {
            code: err.code(),
            message: err.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("ServerEvent always serializes")
    }
}
