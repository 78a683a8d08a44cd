//! Configuration management for the client.

use crate::{CoreError, CoreResult, Locale, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default API base URL (can be overridden at compile time via DOCSIGHT_DEFAULT_API_URL).
pub const DEFAULT_API_URL: &str = match option_env!("DOCSIGHT_DEFAULT_API_URL") {
    Some(url) => url,
    None => "http://localhost:8000/api",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Lower bound for the storage poll interval, to keep re-render pressure bounded.
pub const MIN_STORAGE_POLL_INTERVAL_MS: u64 = 100;

const DEFAULT_LEGACY_EXCHANGE_PATH: &str = "/auth/thirdparty/callback";
const DEFAULT_CALLBACK_PATH: &str = "/auth/callback";
const DEFAULT_LOGIN_PATH: &str = "/login";
const DEFAULT_HOME_PATH: &str = "/";
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_CODE_LOCK_TTL_MS: u64 = 5 * 60 * 1_000;
const DEFAULT_STORAGE_POLL_INTERVAL_MS: u64 = 500;

/// Third-party identity provider used for code-based login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityProviderConfig {
    /// Authorization endpoint the browser is sent to.
    pub authorize_url: String,
    /// OAuth client id registered with the provider.
    pub client_id: String,
    /// Requested scope, if the provider needs one.
    #[serde(default)]
    pub scope: Option<String>,
}

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Base URL of the backend API.
    pub api_url: String,
    /// Path of the legacy code exchange endpoint, relative to `api_url`.
    pub legacy_exchange_path: String,
    /// Route that redeems authorization codes.
    pub callback_path: String,
    /// Route of the login screen.
    pub login_path: String,
    /// Route shown after a successful login.
    pub home_path: String,
    /// How long a login waits for the shell to adopt the new session.
    pub handshake_timeout_ms: u64,
    /// Lifetime of an authorization code lock before it is considered abandoned.
    pub code_lock_ttl_ms: u64,
    /// Interval for the storage poll used when change notification is unavailable.
    pub storage_poll_interval_ms: u64,
    /// Language of generic messages.
    pub locale: Locale,
    /// Optional third-party identity provider.
    pub identity_provider: Option<IdentityProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            legacy_exchange_path: DEFAULT_LEGACY_EXCHANGE_PATH.to_string(),
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            home_path: DEFAULT_HOME_PATH.to_string(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            code_lock_ttl_ms: DEFAULT_CODE_LOCK_TTL_MS,
            storage_poll_interval_ms: DEFAULT_STORAGE_POLL_INTERVAL_MS,
            locale: Locale::default(),
            identity_provider: None,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Some(log_level) = env_value("DOCSIGHT_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(api_url) = env_value("DOCSIGHT_API_URL") {
            self.api_url = api_url;
        }
        if let Some(locale) = env_value("DOCSIGHT_LOCALE") {
            match locale.parse() {
                Ok(locale) => self.locale = locale,
                Err(e) => tracing::warn!(error = %e, "Ignoring DOCSIGHT_LOCALE"),
            }
        }
    }

    /// Check values that would otherwise fail late, at request time.
    pub fn validate(&self) -> CoreResult<()> {
        self.api_url()?;
        for (name, route) in [
            ("callback_path", &self.callback_path),
            ("login_path", &self.login_path),
            ("home_path", &self.home_path),
            ("legacy_exchange_path", &self.legacy_exchange_path),
        ] {
            if !route.starts_with('/') {
                return Err(CoreError::Config(format!(
                    "{} must start with '/': {}",
                    name, route
                )));
            }
        }
        if self.callback_path == self.login_path {
            return Err(CoreError::Config(
                "callback_path and login_path must differ".to_string(),
            ));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(CoreError::Config(
                "handshake_timeout_ms must be positive".to_string(),
            ));
        }
        if let Some(provider) = &self.identity_provider {
            Url::parse(&provider.authorize_url)?;
        }
        Ok(())
    }

    /// Get the API URL as a parsed URL.
    pub fn api_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_url).map_err(CoreError::from)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn code_lock_ttl(&self) -> Duration {
        Duration::from_millis(self.code_lock_ttl_ms)
    }

    /// Poll interval, clamped to [`MIN_STORAGE_POLL_INTERVAL_MS`].
    pub fn storage_poll_interval(&self) -> Duration {
        Duration::from_millis(
            self.storage_poll_interval_ms
                .max(MIN_STORAGE_POLL_INTERVAL_MS),
        )
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
