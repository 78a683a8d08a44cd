//! Advisory mutual exclusion for one-time authorization codes.
//!
//! A lock is a [`LockRecord`] persisted under `auth_code_lock:<sha256(code)>`.
//! Storage has no compare-and-swap, so a crashed holder can only be recovered
//! from by expiry: a record whose age reaches its TTL is treated as dead and
//! may be overwritten by the next acquirer.
//!
//! Exclusion holds for callers sharing one storage backend. The server stays
//! the authority on single use across devices.

use crate::{AuthError, AuthResult};
use client_storage::{KeyValueStorage, StorageKeys};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_epoch_ms(&self) -> i64;
}

/// Wall clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_epoch_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_epoch_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(duration_ms(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Persisted lock record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Digest of the code this record guards.
    pub key: String,
    pub acquired_at_epoch_ms: i64,
    pub ttl_ms: i64,
}

impl LockRecord {
    pub fn is_expired(&self, now_epoch_ms: i64) -> bool {
        now_epoch_ms.saturating_sub(self.acquired_at_epoch_ms) >= self.ttl_ms
    }
}

/// Hex SHA-256 of a code. Raw codes never reach storage or logs.
pub fn code_digest(code: &str) -> String {
    format!("{:x}", Sha256::digest(code.as_bytes()))
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// TTL-based lock keyed by authorization code.
pub struct AuthorizationCodeLock {
    storage: Arc<dyn KeyValueStorage>,
    clock: Arc<dyn Clock>,
    /// Makes check-then-write atomic for callers in this process.
    guard: Mutex<()>,
}

impl AuthorizationCodeLock {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self::with_clock(storage, Arc::new(SystemClock))
    }

    pub fn with_clock(storage: Arc<dyn KeyValueStorage>, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            guard: Mutex::new(()),
        }
    }

    /// Try to become the redeemer of `code`.
    ///
    /// Returns `false` without waiting when a live record exists. Callers
    /// must abandon the redemption in that case, not retry it.
    pub fn try_acquire(&self, code: &str, ttl: Duration) -> AuthResult<bool> {
        let digest = code_digest(code);
        let key = StorageKeys::code_lock(&digest);
        let _guard = self.guard.lock();
        let now = self.clock.now_epoch_ms();

        if let Some(record) = self.load(&key)? {
            if !record.is_expired(now) {
                debug!(code = %&digest[..12], "Authorization code lock is held");
                return Ok(false);
            }
            info!(code = %&digest[..12], "Replacing expired authorization code lock");
        }

        let record = LockRecord {
            key: digest,
            acquired_at_epoch_ms: now,
            ttl_ms: duration_ms(ttl),
        };
        self.storage.set(&key, &serde_json::to_string(&record)?)?;
        debug!(code = %&record.key[..12], ttl_ms = record.ttl_ms, "Authorization code lock acquired");
        Ok(true)
    }

    /// Remove the record for `code`. Safe to call without holding it.
    pub fn release(&self, code: &str) -> AuthResult<()> {
        let key = StorageKeys::code_lock(&code_digest(code));
        let _guard = self.guard.lock();
        self.storage.delete(&key)?;
        Ok(())
    }

    /// Whether a live record exists for `code`.
    pub fn is_held(&self, code: &str) -> AuthResult<bool> {
        let key = StorageKeys::code_lock(&code_digest(code));
        let now = self.clock.now_epoch_ms();
        Ok(self
            .load(&key)?
            .is_some_and(|record| !record.is_expired(now)))
    }

    /// Acquire and return a guard that releases on drop.
    ///
    /// A live record held by someone else is [`AuthError::LockContention`].
    pub fn acquire(self: &Arc<Self>, code: &str, ttl: Duration) -> AuthResult<CodeLockGuard> {
        if !self.try_acquire(code, ttl)? {
            return Err(AuthError::LockContention);
        }
        Ok(CodeLockGuard {
            lock: Arc::clone(self),
            code: code.to_string(),
        })
    }

    /// Delete expired records. Backends that cannot list keys purge nothing.
    pub fn purge_expired(&self) -> AuthResult<usize> {
        let _guard = self.guard.lock();
        let now = self.clock.now_epoch_ms();
        let mut purged = 0;
        for key in self
            .storage
            .list_keys_with_prefix(StorageKeys::CODE_LOCK_PREFIX)?
        {
            let dead = self.load(&key)?.map_or(true, |record| record.is_expired(now));
            if dead && self.storage.delete(&key)? {
                purged += 1;
            }
        }
        if purged > 0 {
            info!(purged, "Purged expired authorization code locks");
        }
        Ok(purged)
    }

    /// Unparsable records count as dead and read as absent.
    fn load(&self, key: &str) -> AuthResult<Option<LockRecord>> {
        let Some(raw) = self.storage.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable authorization code lock");
                Ok(None)
            }
        }
    }
}

/// Held lock. Dropping it releases the record.
pub struct CodeLockGuard {
    lock: Arc<AuthorizationCodeLock>,
    code: String,
}

impl Drop for CodeLockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release(&self.code) {
            warn!(error = %e, "Failed to release authorization code lock");
        }
    }
}
