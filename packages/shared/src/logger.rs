//! Logging setup for Madang binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber with the specified default log level.
///
/// Both the library crates (`madang_*`) and the binary itself log at
/// `default_log_level`. `RUST_LOG` overrides the whole filter.
///
/// # Arguments
///
/// * `binary_name` - The name of the binary (e.g., "madang_client")
/// * `default_log_level` - The default log level (e.g., "debug", "info", "warn")
///
/// # Examples
///
/// ```no_run
/// use madang_shared::logger::setup_logger;
///
/// setup_logger("madang_client", "info");
/// ```
pub fn setup_logger(binary_name: &str, default_log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(binary_name, default_log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn default_filter(binary_name: &str, level: &str) -> String {
    format!(
        "madang_client={level},madang_shared={level},{}={level}",
        binary_name.replace('-', "_"),
    )
}
