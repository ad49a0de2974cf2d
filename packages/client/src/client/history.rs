//! History Fetcher: the one-shot read performed when a room is opened.
//!
//! Three independent requests for the same room, each run as a background
//! task that reports back tagged with the room generation. Nothing here is
//! awaited by the session loop, so a slow server never holds up other rooms,
//! notifications or logout. Metadata and participant failures only leave
//! defaults in place; a message history failure becomes `HistoryFetch`.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    domain::{ApiError, ChatApi, Message, Participant, RoomId, RoomMetadata},
    error::ClientError,
};

#[derive(Debug, Clone, PartialEq)]
pub enum RoomDetail {
    Messages(Result<Vec<Message>, ApiError>),
    Metadata(Result<RoomMetadata, ApiError>),
    Participants(Result<Vec<Participant>, ApiError>),
}

impl RoomDetail {
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Messages(Err(e)) => e.is_unauthorized(),
            Self::Metadata(Err(e)) => e.is_unauthorized(),
            Self::Participants(Err(e)) => e.is_unauthorized(),
            _ => false,
        }
    }

    pub fn is_history(&self) -> bool {
        matches!(self, Self::Messages(_))
    }
}

/// A fetch result, tagged with the room activation that requested it.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomDetailUpdate {
    pub room_id: RoomId,
    pub generation: u64,
    pub detail: RoomDetail,
}

/// Map a failed history fetch to the error surfaced to the view.
pub fn history_fetch_error(error: ApiError) -> ClientError {
    ClientError::from_api(error, ClientError::HistoryFetch)
}

pub struct HistoryFetcher {
    api: Arc<dyn ChatApi>,
}

impl HistoryFetcher {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        Self { api }
    }

    /// Start the message, metadata and participant requests.
    ///
    /// Results arrive on `results` in completion order. They are not
    /// cancelled if the room is superseded; the receiver compares generations.
    pub fn spawn(
        &self,
        room_id: RoomId,
        generation: u64,
        results: mpsc::UnboundedSender<RoomDetailUpdate>,
    ) {
        let api = self.api.clone();
        let tx = results.clone();
        tokio::spawn(async move {
            let result = api.fetch_messages(room_id).await;
            match &result {
                Ok(messages) => {
                    tracing::info!("Loaded {} messages of room {}", messages.len(), room_id)
                }
                Err(e) => tracing::error!("Failed to fetch history of room {}: {}", room_id, e),
            }
            let _ = tx.send(RoomDetailUpdate {
                room_id,
                generation,
                detail: RoomDetail::Messages(result),
            });
        });

        let api = self.api.clone();
        let tx = results.clone();
        tokio::spawn(async move {
            let result = api.fetch_room(room_id).await;
            if let Err(e) = &result {
                tracing::warn!("Failed to fetch metadata of room {}: {}", room_id, e);
            }
            let _ = tx.send(RoomDetailUpdate {
                room_id,
                generation,
                detail: RoomDetail::Metadata(result),
            });
        });

        let api = self.api.clone();
        tokio::spawn(async move {
            let result = api.fetch_participants(room_id).await;
            if let Err(e) = &result {
                tracing::warn!("Failed to fetch participants of room {}: {}", room_id, e);
            }
            let _ = results.send(RoomDetailUpdate {
                room_id,
                generation,
                detail: RoomDetail::Participants(result),
            });
        });
    }
}
