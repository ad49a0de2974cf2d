//! Error types for the chat client.

use thiserror::Error;

use crate::{
    client::connection::TransportError,
    domain::{ApiError, MessageType, RoomId},
};

/// Client-level errors.
///
/// Every variant is caught by the session loop and turned into view state;
/// only `Unauthorized` ends the session.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The broker connection could not be established.
    #[error("connection error: {0}")]
    Transport(#[source] TransportError),

    /// A connection operation was used in the wrong state.
    #[error("invalid connection state: {0}")]
    InvalidState(#[source] TransportError),

    /// Room history could not be loaded.
    #[error("failed to load message history: {0}")]
    HistoryFetch(#[source] ApiError),

    /// No OPEN room connection to publish on.
    #[error("not connected to the room; message not sent")]
    NotConnected,

    /// The upload REST call failed or returned something unusable.
    #[error("file upload failed: {0}")]
    Upload(#[source] ApiError),

    #[error("upload returned a {0:?} message instead of a file message")]
    UnexpectedUpload(MessageType),

    /// The credential was rejected; the session has been torn down.
    #[error("session expired, please log in again")]
    Unauthorized,

    /// Room resolution, creation, leave or listing failed.
    #[error("request failed: {0}")]
    Api(#[source] ApiError),

    #[error("message is empty")]
    EmptyMessage,

    #[error("no room is open")]
    NoActiveRoom,

    #[error("room {0} kind is unknown (metadata not loaded)")]
    RoomKindUnknown(RoomId),
}

impl ClientError {
    /// Map an API error, turning a rejected credential into `Unauthorized`.
    pub fn from_api(error: ApiError, wrap: fn(ApiError) -> ClientError) -> Self {
        if error.is_unauthorized() {
            Self::Unauthorized
        } else {
            wrap(error)
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

impl From<TransportError> for ClientError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::InvalidState(_) => Self::InvalidState(error),
            other => Self::Transport(other),
        }
    }
}
