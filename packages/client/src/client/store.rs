//! Room Message Store: the ordered log of the open room.
//!
//! Order is arrival order (snapshot order, then live append order). Nothing is
//! ever re-sorted by timestamp.

use crate::domain::{Message, MessageType, RoomId};

/// What `append` does with a live message whose id is already in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Keep every delivered message, duplicates included.
    #[default]
    Preserve,
    /// Skip a live message whose non-null id is already present.
    DropKnownIds,
}

/// Result of `append`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    SkippedDuplicate,
    RejectedTyping,
}

/// Log of one room. Owned by the active room scope and dropped with it.
#[derive(Debug)]
pub struct RoomMessageStore {
    room_id: RoomId,
    policy: DuplicatePolicy,
    log: Vec<Message>,
}

impl RoomMessageStore {
    pub fn new(room_id: RoomId, policy: DuplicatePolicy) -> Self {
        Self {
            room_id,
            policy,
            log: Vec::new(),
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Replace the whole log with a history snapshot.
    pub fn load(&mut self, snapshot: Vec<Message>) {
        let before = snapshot.len();
        self.log = snapshot
            .into_iter()
            .filter(|m| m.kind != MessageType::Typing)
            .collect();
        if self.log.len() != before {
            tracing::warn!(
                "Dropped {} typing events from the room {} snapshot",
                before - self.log.len(),
                self.room_id
            );
        }
    }

    /// Add one live message to the end of the log.
    pub fn append(&mut self, message: Message) -> AppendOutcome {
        if message.kind == MessageType::Typing {
            tracing::warn!("Typing event reached the store of room {}; ignored", self.room_id);
            return AppendOutcome::RejectedTyping;
        }
        if self.policy == DuplicatePolicy::DropKnownIds
            && let Some(id) = message.id
            && self.log.iter().any(|m| m.id == Some(id))
        {
            tracing::debug!("Skipping duplicate message {} in room {}", id.value(), self.room_id);
            return AppendOutcome::SkippedDuplicate;
        }
        self.log.push(message);
        AppendOutcome::Appended
    }

    pub fn messages(&self) -> &[Message] {
        &self.log
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}
