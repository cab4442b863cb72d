//! Logging setup utilities for Idobata binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Library crates whose log output follows the default level.
const WORKSPACE_CRATES: [&str; 3] = ["idobata_core", "idobata_shared", "idobata_client"];

/// Initialize the tracing subscriber with the specified default log level.
///
/// The workspace crates and the binary itself log at `default_log_level`.
/// The filter can be overridden using the `RUST_LOG` environment variable.
///
/// # Arguments
///
/// * `binary_name` - The name of the binary (e.g., "idobata-client")
/// * `default_log_level` - The default log level (e.g., "debug", "info", "warn", "error")
///
/// # Examples
///
/// ```no_run
/// use idobata_shared::logger::setup_logger;
///
/// setup_logger("idobata-client", "info");
/// ```
pub fn setup_logger(binary_name: &str, default_log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(binary_name, default_log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the default `EnvFilter` directive string.
pub fn default_filter(binary_name: &str, default_log_level: &str) -> String {
    let mut directives: Vec<String> = WORKSPACE_CRATES
        .iter()
        .map(|krate| format!("{}={}", krate, default_log_level))
        .collect();
    let binary_target = binary_name.replace('-', "_");
    if !WORKSPACE_CRATES.contains(&binary_target.as_str()) {
        directives.push(format!("{}={}", binary_target, default_log_level));
    }
    directives.join(",")
}
