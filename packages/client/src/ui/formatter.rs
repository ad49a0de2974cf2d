//! Message formatting utilities for client display.

use madang_shared::time::{timestamp_to_kst_clock, timestamp_to_kst_rfc3339};

use crate::{
    client::connection::ScopeKey,
    domain::{
        LoginId, Message, MessageBody, MessageType, NotificationEvent, RoomId, RoomKind,
        RoomSnapshot, RoomSummary, UserSummary,
    },
    error::ClientError,
};

const RULE: &str = "============================================================";

/// Message formatter for client display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Format the header and history shown when a room is opened
    ///
    /// # Arguments
    ///
    /// * `snapshot` - Room view at open time (placeholder title until metadata arrives)
    /// * `messages` - Loaded history, in server order
    pub fn format_room_opened(snapshot: &RoomSnapshot, messages: &[Message]) -> String {
        let mut output = format!("\n\n{}\n{}\n{}\n", RULE, Self::room_title(snapshot), RULE);
        if messages.is_empty() {
            output.push_str("(No messages yet)\n");
        }
        for message in messages {
            output.push_str(&Self::format_message(message));
        }
        output
    }

    fn room_title(snapshot: &RoomSnapshot) -> String {
        let kind = match snapshot.kind {
            Some(RoomKind::Private) => "private",
            Some(RoomKind::Group) => "group",
            None => "...",
        };
        format!("#{} {} ({})", snapshot.room_id, snapshot.room_name, kind)
    }

    /// Format the participant list, marking the current user
    ///
    /// # Arguments
    ///
    /// * `snapshot` - Room view with the latest participant list
    /// * `me` - The current user's login id (to mark as "me")
    pub fn format_participants(snapshot: &RoomSnapshot, me: &LoginId) -> String {
        let mut output = format!("\n{}\nParticipants of {}:\n", RULE, Self::room_title(snapshot));
        if snapshot.participants.is_empty() {
            output.push_str("(No participants)\n");
        } else {
            for participant in &snapshot.participants {
                let me_suffix = if &participant.login_id == me { " (me)" } else { "" };
                output.push_str(&format!(
                    "{} @{}{}\n",
                    participant.display_name, participant.login_id, me_suffix
                ));
            }
        }
        output.push_str(RULE);
        output.push('\n');
        output
    }

    /// Format one log entry
    pub fn format_message(message: &Message) -> String {
        let clock = message
            .timestamp
            .map_or_else(|| "--:--".to_string(), timestamp_to_kst_clock);
        match (&message.kind, &message.body) {
            (MessageType::File, MessageBody::File(file)) => {
                let name = file
                    .name
                    .as_deref()
                    .or_else(|| file.url.rsplit('/').next())
                    .unwrap_or(&file.url);
                format!(
                    "[{}] {}: [file] {} <{}>\n",
                    clock, message.sender_name, name, file.url
                )
            }
            (MessageType::Join | MessageType::Leave, body) => {
                format!("[{}] * {}\n", clock, body.text().unwrap_or_default())
            }
            (_, body) => format!(
                "[{}] {}: {}\n",
                clock,
                message.sender_name,
                body.text().unwrap_or_default()
            ),
        }
    }

    pub fn format_room_details(snapshot: &RoomSnapshot) -> String {
        format!("\n-- {} --\n", Self::room_title(snapshot))
    }

    pub fn format_typing(sender_name: &str) -> String {
        format!("\n... {} is typing\n", sender_name)
    }

    /// Format a notification from another room
    ///
    /// # Arguments
    ///
    /// * `event` - The accepted notification
    /// * `received_at` - Unix timestamp when it arrived (milliseconds)
    pub fn format_notification(event: &NotificationEvent, received_at: i64) -> String {
        format!(
            "\n[notice {}] {} in room #{}: {}  (/go to open)\n",
            timestamp_to_kst_rfc3339(received_at),
            event.sender_name,
            event.room_id,
            event.content
        )
    }

    pub fn format_send_rejected(text: Option<&str>, error: &ClientError) -> String {
        match (text, error) {
            (Some(_), ClientError::NotConnected) => {
                format!("\n! {} (/retry to send it again)\n", error)
            }
            _ => format!("\n! {}\n", error),
        }
    }

    pub fn format_connection_lost(scope: &ScopeKey, reason: &str) -> String {
        let (what, hint) = match scope {
            ScopeKey::Room(room_id) => (format!("room #{}", room_id), "Reopen the room"),
            ScopeKey::Global(_) => ("notifications".to_string(), "Type /reconnect"),
        };
        format!(
            "\n! Connection to {} lost ({}). {} to reconnect.\n",
            what, reason, hint
        )
    }

    pub fn format_error(error: &ClientError) -> String {
        format!("\n! {}\n", error)
    }

    pub fn format_room_left(room_id: RoomId) -> String {
        format!("\n- You left room #{}\n", room_id)
    }

    pub fn format_rooms(rooms: &[RoomSummary]) -> String {
        if rooms.is_empty() {
            return "\n(No rooms)\n".to_string();
        }
        let mut output = String::from("\nRooms:\n");
        for room in rooms {
            let kind = room.kind.map_or("?", |k| k.as_wire());
            output.push_str(&format!("  #{} {} [{}]\n", room.room_id, room.room_name, kind));
        }
        output
    }

    pub fn format_users(users: &[UserSummary]) -> String {
        if users.is_empty() {
            return "\n(No other users)\n".to_string();
        }
        let mut output = String::from("\nUsers:\n");
        for user in users {
            output.push_str(&format!("  {} @{}\n", user.display_name, user.login_id));
        }
        output
    }

    pub fn format_logged_out(reason: Option<&ClientError>) -> String {
        match reason {
            Some(error) => format!("\n{}\n", error),
            None => "\nBye.\n".to_string(),
        }
    }
}
