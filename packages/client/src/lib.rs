//! Madang real-time chat client library.
//!
//! Keeps a local view of chat rooms in sync with a REST API and a topic-based
//! WebSocket broker: room history, the live stream of the open room, and the
//! per-user notification feed.

// layers
pub mod client;
pub mod domain;
pub mod infrastructure;
pub mod ui;

pub mod error;
