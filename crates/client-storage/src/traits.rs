//! Storage trait definitions.

use crate::StorageResult;
use tokio::sync::broadcast;

/// A single mutation observed on a storage backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    /// The key that was written or removed.
    pub key: String,
}

/// Trait for persisted key/value storage backends.
///
/// Backends offer no compare-and-swap primitive and no atomicity across keys.
/// Everything built on top must tolerate a half-applied multi-key update.
pub trait KeyValueStorage: Send + Sync {
    /// Store a value
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value, returning whether it existed
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// List all keys that start with a given prefix.
    /// Returns an empty vec if not supported or no keys found.
    fn list_keys_with_prefix(&self, _prefix: &str) -> StorageResult<Vec<String>> {
        Ok(Vec::new())
    }

    /// Subscribe to change notifications.
    ///
    /// Returns `None` when the backend cannot notify, in which case consumers
    /// fall back to polling.
    fn subscribe_changes(&self) -> Option<broadcast::Receiver<StorageChange>> {
        None
    }

    /// Whether [`KeyValueStorage::subscribe_changes`] yields a receiver.
    fn supports_change_notification(&self) -> bool {
        false
    }
}
