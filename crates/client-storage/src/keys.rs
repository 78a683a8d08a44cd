//! Storage key constants.

/// Storage keys used by the client.
pub struct StorageKeys;

impl StorageKeys {
    /// Bearer token of the current session
    pub const TOKEN: &'static str = "token";

    /// JSON-serialized user record of the current session
    pub const USER: &'static str = "user";

    /// Prefix for per-code redemption lock records
    pub const CODE_LOCK_PREFIX: &'static str = "auth_code_lock:";

    /// Lock key for an already-digested authorization code.
    pub fn code_lock(digest: &str) -> String {
        format!("{}{}", Self::CODE_LOCK_PREFIX, digest)
    }
}
