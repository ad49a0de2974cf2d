//! Domain entities of the chat client.

use super::value_object::{LoginId, MessageId, RoomId, UserId};

/// Title shown while room metadata is unavailable.
pub const FALLBACK_ROOM_TITLE: &str = "Chat Room";

/// The authenticated identity of this session.
///
/// Supplied from outside (login flow, CLI flags) and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: UserId,
    pub login_id: LoginId,
    pub display_name: String,
    pub avatar_ref: Option<String>,
}

impl Identity {
    pub fn new(id: UserId, login_id: LoginId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            login_id,
            display_name: display_name.into(),
            avatar_ref: None,
        }
    }

    pub fn with_avatar(mut self, avatar_ref: impl Into<String>) -> Self {
        self.avatar_ref = Some(avatar_ref.into());
        self
    }

    /// Whether `login_id` names this identity.
    pub fn is_self(&self, login_id: &LoginId) -> bool {
        &self.login_id == login_id
    }
}

/// Message type used for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Text,
    File,
    Join,
    Leave,
    Typing,
}

/// Stored file reference carried by FILE messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub url: String,
    pub name: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    File(FileDescriptor),
}

impl MessageBody {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::File(_) => None,
        }
    }
}

/// A chat message as kept in a room log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Option<MessageId>,
    pub room_id: RoomId,
    pub kind: MessageType,
    pub sender: LoginId,
    pub sender_name: String,
    pub body: MessageBody,
    pub timestamp: Option<i64>,
}

impl Message {
    /// A locally authored message; id and timestamp are left for the server.
    pub fn outgoing(room_id: RoomId, kind: MessageType, author: &Identity, text: String) -> Self {
        Self {
            id: None,
            room_id,
            kind,
            sender: author.login_id.clone(),
            sender_name: author.display_name.clone(),
            body: MessageBody::Text(text),
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKind {
    Private,
    Group,
}

impl RoomKind {
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Private => "PRIVATE",
            Self::Group => "GROUP",
        }
    }
}

/// One entry of a room's participant list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub login_id: LoginId,
    pub display_name: String,
    pub avatar_ref: Option<String>,
}

/// Room metadata as returned by the metadata endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMetadata {
    pub room_id: RoomId,
    pub room_name: String,
    pub kind: RoomKind,
}

/// Point-in-time view of the open room.
///
/// JOIN/LEAVE messages never mutate `participants`; the list only changes when
/// the room is opened again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub room_name: String,
    pub kind: Option<RoomKind>,
    pub participants: Vec<Participant>,
}

impl RoomSnapshot {
    /// Defaults used until (or instead of) the metadata and participant fetches.
    pub fn placeholder(room_id: RoomId) -> Self {
        Self {
            room_id,
            room_name: FALLBACK_ROOM_TITLE.to_string(),
            kind: None,
            participants: Vec::new(),
        }
    }

    pub fn apply_metadata(&mut self, metadata: RoomMetadata) {
        self.room_name = metadata.room_name;
        self.kind = Some(metadata.kind);
    }
}

/// Ephemeral "you were messaged" event from the per-user topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub sender: LoginId,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub room_id: RoomId,
    pub content: String,
}

/// Entry of the room list endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub room_name: String,
    pub kind: Option<RoomKind>,
}

/// Entry of the user directory endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    pub id: UserId,
    pub login_id: LoginId,
    pub display_name: String,
    pub avatar_ref: Option<String>,
}

/// FILE message descriptor returned by the upload endpoint.
///
/// `raw` is the exact response body; it is what gets published so the
/// descriptor reaches the room without any field rewritten.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    pub message: Message,
    pub raw: serde_json::Value,
}
