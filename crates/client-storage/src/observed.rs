//! Change notification on top of any storage backend.

use crate::{KeyValueStorage, StorageChange, StorageResult};
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Storage wrapper that broadcasts a [`StorageChange`] after every successful
/// mutation made through it.
///
/// Only writes routed through this wrapper are observed. Writes made by
/// another process to the same backing file show up on the next read.
pub struct ObservedStorage<S> {
    inner: S,
    change_tx: broadcast::Sender<StorageChange>,
}

impl<S: KeyValueStorage> ObservedStorage<S> {
    pub fn new(inner: S) -> Self {
        let (change_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { inner, change_tx }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn notify(&self, key: &str) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.change_tx.send(StorageChange {
            key: key.to_string(),
        });
    }
}

impl<S: KeyValueStorage> KeyValueStorage for ObservedStorage<S> {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.inner.set(key, value)?;
        self.notify(key);
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let existed = self.inner.delete(key)?;
        if existed {
            self.notify(key);
        }
        Ok(existed)
    }

    fn list_keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list_keys_with_prefix(prefix)
    }

    fn subscribe_changes(&self) -> Option<broadcast::Receiver<StorageChange>> {
        Some(self.change_tx.subscribe())
    }

    fn supports_change_notification(&self) -> bool {
        true
    }
}
