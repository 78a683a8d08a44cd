//! # Observability
//!
//! Centralized logging layer for the Docsight client.
//!
//! Components are **log producers**: they call `observability::init()` once
//! at startup and use standard `tracing` macros everywhere else. Where the
//! logs end up is decided here.
//!
//! ## Dev Mode
//!
//! Every process writes structured JSONL to one central file:
//! `~/.docsight/logs/dev.jsonl`
//!
//! - `tail -f ~/.docsight/logs/dev.jsonl | jq` for pretty JSON
//! - `lnav ~/.docsight/logs/dev.jsonl` for interactive exploration
//!
//! Multi-process safety comes from append-only writes flushed per line.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init("docsight");
//!     tracing::info!("client started");
//! }
//! ```

#[cfg(feature = "dev")]
mod dev;

mod json_layer;

pub use json_layer::{JsonLayer, LogEntry};

use std::path::PathBuf;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service (e.g., "docsight", "docsight-shell").
    /// Included in every log line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.docsight/logs/dev.jsonl` in dev mode.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr for immediate feedback.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize the observability layer with default settings.
///
/// ```rust,ignore
/// observability::init("my-service");
/// ```
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize the observability layer with custom configuration.
///
/// Installing a second global subscriber is a no-op, so calling this more
/// than once (for example from tests) is harmless.
pub fn init_with_config(config: LogConfig) {
    #[cfg(feature = "dev")]
    {
        dev::init_dev_subscriber(&config);
    }

    #[cfg(not(feature = "dev"))]
    {
        use tracing_subscriber::util::SubscriberInitExt;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.default_level)),
            )
            .with_target(true)
            .compact()
            .finish()
            .try_init();
    }
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
