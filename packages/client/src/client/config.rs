//! Runtime configuration of a chat session.

use std::time::Duration;

use crate::{client::store::DuplicatePolicy, domain::RoomId};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8087";
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8087/ws";
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the REST API.
    pub api_url: String,
    /// Broker endpoint (`ws://` or `wss://`).
    pub ws_url: String,
    /// How long to wait for the broker's `connected` frame.
    pub handshake_timeout: Duration,
    /// Upper bound for each REST request.
    pub request_timeout: Duration,
    pub duplicate_policy: DuplicatePolicy,
    /// Room opened as soon as the session starts.
    pub initial_room: Option<RoomId>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            duplicate_policy: DuplicatePolicy::default(),
            initial_room: None,
        }
    }
}
