//! Backend authentication endpoints.

use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use client_storage::UserRecord;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const THIRD_PARTY_LOGIN_PATH: &str = "/auth/thirdparty/login";
const SYSTEM_LOGIN_PATH: &str = "/auth/system/login";
const CURRENT_USER_PATH: &str = "/users/me";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Body shared by every login endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub user: Option<UserRecord>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl LoginResponse {
    pub fn rejected(message: Option<String>) -> Self {
        Self {
            success: false,
            message,
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize)]
struct CodeRequest<'a> {
    code: &'a str,
}

#[derive(Debug, Serialize)]
struct CredentialsRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// `/users/me` answers either with the bare record or with an envelope.
/// Variant order matters: an envelope never carries a top-level `uid`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CurrentUserResponse {
    Bare(UserRecord),
    Envelope {
        #[serde(default = "default_success")]
        success: bool,
        #[serde(default)]
        user: Option<UserRecord>,
        #[serde(default)]
        message: Option<String>,
    },
}

fn default_success() -> bool {
    true
}

/// Network surface used by the login flows.
///
/// Implementations return `Err(AuthError::Network)` only when no response
/// arrived. A response that refuses the login is `Ok` with `success: false`.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn third_party_login(&self, code: &str) -> AuthResult<LoginResponse>;

    async fn legacy_third_party_login(&self, code: &str) -> AuthResult<LoginResponse>;

    async fn system_login(&self, username: &str, password: &str) -> AuthResult<LoginResponse>;

    /// Resolve the user a token belongs to. A refused token is
    /// `AuthError::AuthRejected`.
    async fn current_user(&self, token: &str) -> AuthResult<UserRecord>;
}

/// [`AuthApi`] over HTTP.
#[derive(Clone)]
pub struct HttpAuthApi {
    http_client: Client,
    api_url: String,
    legacy_exchange_path: String,
}

impl HttpAuthApi {
    pub fn new(api_url: &str, legacy_exchange_path: &str) -> AuthResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http_client,
            api_url: api_url.trim_end_matches('/').to_string(),
            legacy_exchange_path: legacy_exchange_path.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn post_login<B: Serialize + Sync>(&self, path: &str, body: &B) -> AuthResult<LoginResponse> {
        let url = self.endpoint(path);
        debug!(url = %url, "Sending login request");

        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(network_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(network_error)?;

        match serde_json::from_slice::<LoginResponse>(&bytes) {
            Ok(mut parsed) => {
                if !status.is_success() {
                    parsed.success = false;
                }
                Ok(parsed)
            }
            Err(e) => {
                warn!(status = %status, error = %e, path, "Unreadable login response");
                Ok(LoginResponse::rejected(None))
            }
        }
    }
}

fn network_error(e: reqwest::Error) -> AuthError {
    AuthError::Network(e.to_string())
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn third_party_login(&self, code: &str) -> AuthResult<LoginResponse> {
        self.post_login(THIRD_PARTY_LOGIN_PATH, &CodeRequest { code })
            .await
    }

    async fn legacy_third_party_login(&self, code: &str) -> AuthResult<LoginResponse> {
        self.post_login(&self.legacy_exchange_path, &CodeRequest { code })
            .await
    }

    async fn system_login(&self, username: &str, password: &str) -> AuthResult<LoginResponse> {
        self.post_login(SYSTEM_LOGIN_PATH, &CredentialsRequest { username, password })
            .await
    }

    async fn current_user(&self, token: &str) -> AuthResult<UserRecord> {
        let response = self
            .http_client
            .get(self.endpoint(CURRENT_USER_PATH))
            .bearer_auth(token)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(AuthError::AuthRejected(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            // The server may be down; the token itself was not refused.
            return Err(AuthError::Network(format!("HTTP {}", status.as_u16())));
        }

        match response.json::<CurrentUserResponse>().await.map_err(network_error)? {
            CurrentUserResponse::Envelope {
                success: true,
                user: Some(user),
                ..
            }
            | CurrentUserResponse::Bare(user) => Ok(user),
            CurrentUserResponse::Envelope { message, .. } => Err(AuthError::AuthRejected(
                message.unwrap_or_default(),
            )),
        }
    }
}
