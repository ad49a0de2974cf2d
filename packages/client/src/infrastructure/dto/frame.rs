//! Broker frames: one JSON object per WebSocket text message, tagged by `type`.

use serde::{Deserialize, Serialize};

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { id: String, topic: String },
    Unsubscribe { id: String },
    Publish { topic: String, payload: serde_json::Value },
}

/// Frames the broker sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerFrame {
    /// Handshake accepted; the connection is OPEN from here on.
    Connected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },
    Event {
        subscription: String,
        topic: String,
        payload: serde_json::Value,
    },
    Error { message: String },
}
