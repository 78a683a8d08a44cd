//! Persisted storage for the Docsight client.
//!
//! This crate provides:
//! - The [`KeyValueStorage`] backend trait with in-memory and file-backed implementations
//! - [`ObservedStorage`], which adds change notification to any backend
//! - [`SessionStore`], the typed token + user session on top of a backend

mod file;
mod keys;
mod memory;
mod observed;
mod session_store;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use observed::ObservedStorage;
pub use session_store::{AuthSession, SessionStore, UserRecord};
pub use traits::{KeyValueStorage, StorageChange};

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific storage error
    #[error("Platform storage error: {0}")]
    Platform(String),

    /// Key not found
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// A multi-slot write did not fully persist and was rolled back
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Create the default persisted storage: a JSON file with in-process change
/// notification.
pub fn create_storage(path: &Path) -> StorageResult<Arc<dyn KeyValueStorage>> {
    let storage = FileStorage::new(path)?;
    Ok(Arc::new(ObservedStorage::new(storage)))
}

/// Create a [`SessionStore`] over the default persisted storage.
pub fn create_session_store(path: &Path) -> StorageResult<SessionStore> {
    Ok(SessionStore::new(create_storage(path)?))
}
