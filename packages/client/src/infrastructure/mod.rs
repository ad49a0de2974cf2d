//! Infrastructure layer: wire formats, REST client, broker transports, credentials.

pub mod api;
pub mod credential;
pub mod dto;
pub mod transport;
