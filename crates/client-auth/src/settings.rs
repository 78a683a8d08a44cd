//! Settings consumed by the auth flows.

use client_config_and_utils::{Config, Locale};
use std::time::Duration;
use url::Url;

use crate::{AuthError, AuthResult};

/// Third-party identity provider endpoint and client registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityProvider {
    pub authorize_url: Url,
    pub client_id: String,
    pub scope: Option<String>,
}

/// Routes, endpoints and timeouts for the login flows.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Base URL of the backend API, without a trailing slash.
    pub api_url: String,
    pub legacy_exchange_path: String,
    pub callback_path: String,
    pub login_path: String,
    pub home_path: String,
    pub handshake_timeout: Duration,
    pub code_lock_ttl: Duration,
    pub storage_poll_interval: Duration,
    pub locale: Locale,
    pub identity_provider: Option<IdentityProvider>,
}

impl AuthSettings {
    pub fn from_config(config: &Config) -> AuthResult<Self> {
        config
            .validate()
            .map_err(|e| AuthError::Config(e.to_string()))?;

        let identity_provider = match &config.identity_provider {
            Some(provider) => Some(IdentityProvider {
                authorize_url: Url::parse(&provider.authorize_url)?,
                client_id: provider.client_id.clone(),
                scope: provider.scope.clone(),
            }),
            None => None,
        };

        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            legacy_exchange_path: config.legacy_exchange_path.clone(),
            callback_path: config.callback_path.clone(),
            login_path: config.login_path.clone(),
            home_path: config.home_path.clone(),
            handshake_timeout: config.handshake_timeout(),
            code_lock_ttl: config.code_lock_ttl(),
            storage_poll_interval: config.storage_poll_interval(),
            locale: config.locale,
            identity_provider,
        })
    }

    /// Whether a route is reachable without a session.
    pub fn is_public_route(&self, route: &str) -> bool {
        let path = route.split(['?', '#']).next().unwrap_or(route);
        path == self.login_path || path == self.callback_path
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        let config = Config::default();
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            legacy_exchange_path: config.legacy_exchange_path.clone(),
            callback_path: config.callback_path.clone(),
            login_path: config.login_path.clone(),
            home_path: config.home_path.clone(),
            handshake_timeout: config.handshake_timeout(),
            code_lock_ttl: config.code_lock_ttl(),
            storage_poll_interval: config.storage_poll_interval(),
            locale: config.locale,
            identity_provider: None,
        }
    }
}
