//! Authentication error types.

use client_storage::StorageError;
use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The request never completed (connection refused, DNS, timeout).
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered and refused the login.
    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    /// Another holder is already redeeming this authorization code.
    #[error("Authorization code is already being redeemed")]
    LockContention,

    /// The session could not be persisted after a successful exchange.
    #[error("Failed to persist session: {0}")]
    SessionWrite(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid state transition in the handshake FSM
    #[error("Invalid handshake state transition: {0}")]
    InvalidStateTransition(String),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors include:
    /// - Requests that never completed
    /// - HTTP errors with 5xx status codes
    /// - Connection timeouts
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Network(_) => true,
            AuthError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return status.is_server_error();
                }
                false
            }
            _ => false,
        }
    }

    /// Whether the error is shown to the user at the entry point that hit it.
    ///
    /// Lock contention is a coordination outcome and stays silent. A corrupt
    /// stored session never gets here: `SessionStore::read` clears it and
    /// reports "logged out".
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, AuthError::LockContention)
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
