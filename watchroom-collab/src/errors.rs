use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed error taxonomy surfaced to clients via `errorWithCode`.
/// `roomClosed` is deliberately absent - it's communicated as an event,
/// never as a command failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    InternalError,
    InvalidMessage,
    RoomNotFound,
    RejoinRoomNotFound,
    NotInRoom,
    IncorrectPassword,
    NotCreatorOfRoom,
    AlreadyInQueue,
    VideoNotFound,
    VideoNotEmbeddable,
}

/// The error type produced by the command dispatcher and room
/// repository: a small enum of domain failures, with a catch-all for
/// anything that isn't supposed to happen.
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("room {0} not found")]
    RoomNotFound(String),
    #[error("room {0} not found")]
    RejoinRoomNotFound(String),
    #[error("not a member of any room")]
    NotInRoom,
    #[error("incorrect room password")]
    IncorrectPassword,
    #[error("only the room's creator can do this")]
    NotCreatorOfRoom,
    #[error("video is already in the queue")]
    AlreadyInQueue,
    #[error("video not found in queue")]
    VideoNotFound,
    #[error("video cannot be embedded")]
    VideoNotEmbeddable,
    #[error("malformed command: {0}")]
    InvalidMessage(String),
    #[error(transparent)]
    Store(#[from] watchroom_store::StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CollabError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::RoomNotFound(_) => ErrorCode::RoomNotFound,
            Self::RejoinRoomNotFound(_) => ErrorCode::RejoinRoomNotFound,
            Self::NotInRoom => ErrorCode::NotInRoom,
            Self::IncorrectPassword => ErrorCode::IncorrectPassword,
            Self::NotCreatorOfRoom => ErrorCode::NotCreatorOfRoom,
            Self::AlreadyInQueue => ErrorCode::AlreadyInQueue,
            Self::VideoNotFound => ErrorCode::VideoNotFound,
            Self::VideoNotEmbeddable => ErrorCode::VideoNotEmbeddable,
            Self::InvalidMessage(_) => ErrorCode::InvalidMessage,
            Self::Store(_) | Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, CollabError>;
