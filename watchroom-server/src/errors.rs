use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use watchroom_collab::CollabError;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Collab(#[from] CollabError),
    #[error("{0}")]
    BadRequest(String),
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl ServerError {
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Collab(CollabError::RoomNotFound(_) | CollabError::RejoinRoomNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            Self::Collab(CollabError::IncorrectPassword | CollabError::NotCreatorOfRoom) => {
                StatusCode::FORBIDDEN
            }
            Self::Collab(
                CollabError::NotInRoom
                | CollabError::AlreadyInQueue
                | CollabError::VideoNotFound
                | CollabError::VideoNotEmbeddable
                | CollabError::InvalidMessage(_),
            ) => StatusCode::BAD_REQUEST,
            Self::Collab(CollabError::Store(_) | CollabError::Internal(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.as_status_code();
        let body = ErrorBody {
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
