//! Exchanges codes and credentials for sessions.
//!
//! The orchestrator is a request/response translator: it talks to the
//! backend, folds every outcome into a [`LoginAttemptResult`] and never
//! touches the session store. Retries are the caller's concern.

use crate::api::{AuthApi, LoginResponse};
use crate::{AuthError, AuthResult};
use client_config_and_utils::Messages;
use client_storage::{AuthSession, UserRecord};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a login attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFailureKind {
    /// No response arrived.
    Network,
    /// The server refused, or answered with something unusable.
    Rejected,
}

/// Outcome of one login attempt. Transient, never persisted.
#[derive(Debug, Clone)]
pub struct LoginAttemptResult {
    /// Whether the login succeeded.
    pub success: bool,
    /// Authenticated user (if successful).
    pub user: Option<UserRecord>,
    /// Bearer token (if successful).
    pub token: Option<String>,
    /// Human-readable reason (if failed).
    pub message: Option<String>,
    /// Failure classification (if failed).
    pub failure: Option<LoginFailureKind>,
}

impl LoginAttemptResult {
    /// Create a successful result.
    pub fn success(user: UserRecord, token: String) -> Self {
        Self {
            success: true,
            user: Some(user),
            token: Some(token),
            message: None,
            failure: None,
        }
    }

    /// Create a failed result.
    pub fn failure(kind: LoginFailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            user: None,
            token: None,
            message: Some(message.into()),
            failure: Some(kind),
        }
    }

    /// The session carried by a successful result.
    pub fn into_session(self) -> Option<AuthSession> {
        match (self.success, self.user, self.token) {
            (true, Some(user), Some(token)) => Some(AuthSession::new(user, token)),
            _ => None,
        }
    }
}

/// Drives the login endpoints.
pub struct LoginOrchestrator {
    api: Arc<dyn AuthApi>,
    messages: Messages,
}

impl LoginOrchestrator {
    pub fn new(api: Arc<dyn AuthApi>, messages: Messages) -> Self {
        Self { api, messages }
    }

    /// Redeem a one-time code.
    ///
    /// Any failure of the primary endpoint, including a network error, gets
    /// exactly one attempt at the legacy endpoint, whose result is final.
    pub async fn exchange_code(&self, code: &str) -> LoginAttemptResult {
        let primary = self.normalize(self.api.third_party_login(code).await);
        if primary.success {
            info!("Authorization code redeemed");
            return primary;
        }

        info!(
            reason = primary.message.as_deref().unwrap_or_default(),
            "Primary code exchange failed, trying legacy endpoint"
        );
        let legacy = self.normalize(self.api.legacy_third_party_login(code).await);
        if legacy.success {
            info!("Authorization code redeemed via legacy endpoint");
        } else {
            warn!(
                reason = legacy.message.as_deref().unwrap_or_default(),
                "Legacy code exchange failed"
            );
        }
        legacy
    }

    /// Log in with username and password. No fallback.
    pub async fn exchange_credentials(&self, username: &str, password: &str) -> LoginAttemptResult {
        let result = self.normalize(self.api.system_login(username, password).await);
        if result.success {
            info!(username, "Credential login succeeded");
        } else {
            debug!(username, "Credential login failed");
        }
        result
    }

    fn normalize(&self, response: AuthResult<LoginResponse>) -> LoginAttemptResult {
        match response {
            Ok(LoginResponse {
                success: true,
                user: Some(user),
                access_token: Some(token),
                ..
            }) if !token.is_empty() && !user.uid.is_empty() => {
                LoginAttemptResult::success(user, token)
            }
            Ok(response) => {
                if response.success {
                    warn!("Login response reported success without a user and token");
                }
                LoginAttemptResult::failure(
                    LoginFailureKind::Rejected,
                    self.reason_or_generic(response.message),
                )
            }
            Err(AuthError::AuthRejected(reason)) => LoginAttemptResult::failure(
                LoginFailureKind::Rejected,
                self.reason_or_generic(Some(reason)),
            ),
            Err(e) if e.is_transient() => {
                debug!(error = %e, "Login request did not complete");
                LoginAttemptResult::failure(
                    LoginFailureKind::Network,
                    self.messages.network_unavailable(),
                )
            }
            Err(e) => {
                warn!(error = %e, "Login request failed");
                LoginAttemptResult::failure(LoginFailureKind::Rejected, self.messages.login_failed())
            }
        }
    }

    fn reason_or_generic(&self, reason: Option<String>) -> String {
        reason
            .map(|reason| reason.trim().to_string())
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| self.messages.login_failed().to_string())
    }
}
