//! REST API clients.

pub mod http;

pub use http::HttpChatApi;
