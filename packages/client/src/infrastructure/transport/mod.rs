//! Broker transports implementing `Connector`.
//!
//! - `websocket`: JSON frames over `tokio-tungstenite`
//! - `inmemory`: in-process broker for unit tests

#[cfg(test)]
pub mod inmemory;
pub mod websocket;

#[cfg(test)]
pub use inmemory::{BrokerRecord, InMemoryBroker};
pub use websocket::WebSocketConnector;
