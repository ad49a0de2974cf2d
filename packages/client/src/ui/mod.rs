//! Terminal front end.

mod formatter;
mod prompt;
mod runner;

pub use formatter::MessageFormatter;
pub use prompt::{InputAction, parse_input};
pub use runner::run_client;
