//! Typed access to the persisted session.
//!
//! The session occupies two storage slots ([`StorageKeys::TOKEN`] and
//! [`StorageKeys::USER`]). Backends give no atomicity across keys, so a reader
//! may observe only one slot populated. Such a half-written session is never
//! returned: it is cleared and reported as "not logged in".

use crate::{KeyValueStorage, StorageError, StorageKeys, StorageResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// User record returned by the authentication endpoints.
///
/// Fields the client does not interpret are kept in `extra` so the record can
/// be written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable user identifier.
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserRecord {
    /// Record with only an identifier.
    pub fn with_uid(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            username: None,
            email: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Best human-readable label for the user.
    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.uid)
    }
}

/// An authenticated identity: the bearer token and the user it belongs to.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub user: UserRecord,
    pub token: String,
}

impl AuthSession {
    pub fn new(user: UserRecord, token: impl Into<String>) -> Self {
        Self {
            user,
            token: token.into(),
        }
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Single source of truth for "am I logged in".
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<dyn KeyValueStorage>,
    /// Serializes slot access within this process so local readers never
    /// observe the gap between the two writes.
    slots: Arc<Mutex<()>>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self {
            storage,
            slots: Arc::new(Mutex::new(())),
        }
    }

    /// The backend this store writes to.
    pub fn storage(&self) -> &Arc<dyn KeyValueStorage> {
        &self.storage
    }

    /// Write both slots, replacing any previous session.
    ///
    /// The write is verified by reading both slots back. A failed slot write or
    /// a read-back mismatch (for example a backend that drops writes when it is
    /// full) clears both slots and returns [`StorageError::WriteFailed`], so a
    /// failed write never leaves a partial or stale session behind.
    pub fn write(&self, session: &AuthSession) -> StorageResult<()> {
        if session.token.is_empty() {
            return Err(StorageError::Encoding(
                "refusing to store an empty token".to_string(),
            ));
        }
        let user_json = serde_json::to_string(&session.user)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;

        let _guard = self.slots.lock();

        if let Err(e) = self.write_slots(&user_json, &session.token) {
            warn!(error = %e, "Session write failed, clearing partial session");
            self.clear_slots();
            return Err(StorageError::WriteFailed(e.to_string()));
        }

        let stored_token = self.storage.get(StorageKeys::TOKEN)?;
        let stored_user = self.storage.get(StorageKeys::USER)?;
        if stored_token.as_deref() != Some(session.token.as_str())
            || stored_user.as_deref() != Some(user_json.as_str())
        {
            warn!(uid = %session.user.uid, "Session write did not persist, clearing");
            self.clear_slots();
            return Err(StorageError::WriteFailed(
                "stored session does not match the written session".to_string(),
            ));
        }

        info!(uid = %session.user.uid, "Session stored");
        Ok(())
    }

    /// Read the current session.
    ///
    /// Returns `None` when either slot is missing or the user record cannot be
    /// parsed. Both of those states are repaired by clearing the store.
    pub fn read(&self) -> StorageResult<Option<AuthSession>> {
        let _guard = self.slots.lock();

        let token = self
            .storage
            .get(StorageKeys::TOKEN)?
            .filter(|token| !token.is_empty());
        let user_json = self.storage.get(StorageKeys::USER)?;

        match (token, user_json) {
            (None, None) => Ok(None),
            (Some(token), Some(user_json)) => match serde_json::from_str::<UserRecord>(&user_json) {
                Ok(user) => Ok(Some(AuthSession { user, token })),
                Err(e) => {
                    warn!(error = %e, "Stored user record is corrupt, clearing session");
                    self.clear_slots();
                    Ok(None)
                }
            },
            (token, _) => {
                warn!(
                    has_token = token.is_some(),
                    "Incomplete session in storage, clearing"
                );
                self.clear_slots();
                Ok(None)
            }
        }
    }

    /// Whether a complete, parseable session is stored.
    pub fn is_logged_in(&self) -> StorageResult<bool> {
        Ok(self.read()?.is_some())
    }

    /// Remove both slots.
    pub fn clear(&self) -> StorageResult<()> {
        let _guard = self.slots.lock();
        self.storage.delete(StorageKeys::TOKEN)?;
        self.storage.delete(StorageKeys::USER)?;
        debug!("Session cleared");
        Ok(())
    }

    fn write_slots(&self, user_json: &str, token: &str) -> StorageResult<()> {
        self.storage.set(StorageKeys::USER, user_json)?;
        self.storage.set(StorageKeys::TOKEN, token)?;
        Ok(())
    }

    /// Best-effort removal used on repair paths, where the original failure is
    /// the one worth reporting.
    fn clear_slots(&self) {
        if let Err(e) = self.storage.delete(StorageKeys::TOKEN) {
            warn!(error = %e, "Failed to clear token slot");
        }
        if let Err(e) = self.storage.delete(StorageKeys::USER) {
            warn!(error = %e, "Failed to clear user slot");
        }
    }
}
