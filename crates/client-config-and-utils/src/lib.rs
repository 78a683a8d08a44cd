//! Configuration, paths, logging and user-facing messages for the Docsight client.

mod config;
mod error;
mod logging;
mod messages;
mod paths;

pub use config::{Config, IdentityProviderConfig, DEFAULT_API_URL, MIN_STORAGE_POLL_INTERVAL_MS};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_for_service, parse_level};
pub use messages::{Locale, Messages};
pub use paths::Paths;
