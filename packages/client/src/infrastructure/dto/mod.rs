//! Data Transfer Objects (DTOs) for the chat client.
//!
//! DTOs are organized by protocol:
//! - `rest`: REST request/response bodies and pub/sub payloads
//! - `frame`: broker frames carried over the WebSocket

pub mod conversion;
pub mod frame;
pub mod rest;
