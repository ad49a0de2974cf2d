//! Broker topic names.

use std::fmt;

use super::value_object::{LoginId, RoomId};

/// Inbound topic every chat action is published to.
pub const CHAT_PUBLISH_TOPIC: &str = "chat/publish";

/// A named address within the broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// `room/{roomId}`: live message stream of one room.
    pub fn room(room_id: RoomId) -> Self {
        Self(format!("room/{}", room_id))
    }

    /// `user/{loginId}/notifications`: per-identity notification stream.
    pub fn notifications(login_id: &LoginId) -> Self {
        Self(format!("user/{}/notifications", login_id))
    }

    /// `chat/publish`: routed server-side by the payload's `type` and `roomId`.
    pub fn chat_publish() -> Self {
        Self(CHAT_PUBLISH_TOPIC.to_string())
    }

    pub fn from_wire(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
