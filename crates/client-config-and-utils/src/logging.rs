//! Logging initialization for the client.
//!
//! This module wraps the observability crate's initialization. The CLI and
//! any embedding application write structured JSONL to
//! `~/.docsight/logs/dev.jsonl`.

use std::path::PathBuf;

/// Initialize the logging system for the client.
///
/// This sets up tracing with:
/// - Structured JSONL output to `~/.docsight/logs/dev.jsonl`
/// - Log level from RUST_LOG env var or the provided default
/// - Service name included in every log line
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("client started");
/// ```
pub fn init_logging(level: &str) {
    init_logging_for_service("docsight", level, None);
}

/// Initialize logging with a custom service name and, optionally, a custom
/// log file.
///
/// Use this when several components share the central log stream and need
/// to be told apart.
pub fn init_logging_for_service(service_name: &str, level: &str, log_path: Option<PathBuf>) {
    let also_stderr = std::env::var("DOCSIGHT_LOG_STDERR")
        .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);

    observability::init_with_config(observability::LogConfig {
        service_name: service_name.into(),
        default_level: parse_level(level).to_string().to_lowercase(),
        log_path,
        also_stderr,
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
