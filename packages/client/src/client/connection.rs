//! Channel Connection: one transport link to the broker per logical scope.
//!
//! State machine: `Connecting -> Open -> Closed`. There is no reconnect here;
//! a dropped connection stays `Closed` until its owner opens a new one.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::{LoginId, RoomId, Topic};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Identity of one created connection. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// What a connection is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    Room(RoomId),
    Global(LoginId),
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Room(room_id) => write!(f, "room:{}", room_id),
            Self::Global(login_id) => write!(f, "global:{}", login_id),
        }
    }
}

/// Returned by `subscribe`; used to unsubscribe a single topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: String,
    pub topic: Topic,
}

/// Events a connection reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A payload arrived on a subscribed topic.
    Delivered {
        connection: ConnectionId,
        topic: Topic,
        payload: serde_json::Value,
    },
    /// The transport went away without `close()` being called.
    Closed {
        connection: ConnectionId,
        reason: String,
    },
}

impl ChannelEvent {
    pub fn connection(&self) -> ConnectionId {
        match self {
            Self::Delivered { connection, .. } | Self::Closed { connection, .. } => *connection,
        }
    }
}

/// Receives the events of one subscription (or of the connection lifecycle).
pub type EventHandler = mpsc::UnboundedSender<ChannelEvent>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("broker rejected the connection: {0}")]
    Rejected(String),

    #[error("broker handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Subscribe/publish on a connection that is not OPEN.
    #[error("connection is {0}, operation requires OPEN")]
    InvalidState(ConnectionState),

    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One live publish/subscribe link.
#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn scope(&self) -> &ScopeKey;

    fn state(&self) -> ConnectionState;

    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Register `handler` for `topic`. Fails with `InvalidState` unless OPEN.
    fn subscribe(
        &mut self,
        topic: Topic,
        handler: EventHandler,
    ) -> Result<SubscriptionHandle, TransportError>;

    fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> Result<(), TransportError>;

    /// Fire-and-forget publish. Never buffers: fails with `InvalidState` unless OPEN.
    fn publish(&self, topic: &Topic, payload: serde_json::Value) -> Result<(), TransportError>;

    /// Unregister every subscription, then release the transport.
    /// Idempotent.
    async fn close(&mut self);
}

/// Opens connections to one broker endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a connection and complete the broker handshake.
    ///
    /// `token` is sent as a connection-time credential. `lifecycle` is told when
    /// the transport drops on its own.
    async fn open(
        &self,
        scope: ScopeKey,
        token: Option<String>,
        lifecycle: EventHandler,
    ) -> Result<Box<dyn Connection>, TransportError>;
}
