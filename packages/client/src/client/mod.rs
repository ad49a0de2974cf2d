//! Sync engine: connections, room lifecycle, notifications and the session loop.

pub mod config;
pub mod connection;
pub mod history;
pub mod notification;
pub mod room;
pub mod session;
pub mod store;

pub use config::ClientConfig;
pub use session::{ChatSession, SessionCommand, SessionDeps, SessionHandle, SessionUpdate};
