//! File-backed storage backend.
//!
//! All entries live in a single JSON object on disk. The file is re-read on
//! every access so that separate processes sharing the file observe each
//! other's writes. Every read-modify-write cycle runs under an exclusive
//! advisory lock on a sidecar `<file>.lock`, and the document is replaced
//! through a uniquely named temp file + rename so a reader never sees a torn
//! document.

use crate::{KeyValueStorage, StorageError, StorageResult};
use fd_lock::RwLock;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Persisted key/value storage in a JSON file.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock_path: PathBuf,
    /// Serializes read-modify-write cycles within this handle.
    write_lock: Mutex<()>,
}

/// `path` with `suffix` appended to its file name.
fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

impl FileStorage {
    /// Open (or lazily create) storage at `path`.
    pub fn new(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            lock_path: sidecar(&path, ".lock"),
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StorageResult<BTreeMap<String, String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        match serde_json::from_str(&content) {
            Ok(map) => Ok(map),
            Err(e) => {
                // An unreadable document is treated as empty; the next write replaces it.
                warn!(path = %self.path.display(), error = %e, "Storage file is corrupt, ignoring contents");
                Ok(BTreeMap::new())
            }
        }
    }

    fn persist(&self, map: &BTreeMap<String, String>) -> StorageResult<()> {
        let content = serde_json::to_string_pretty(map)
            .map_err(|e| StorageError::Encoding(e.to_string()))?;
        let dir = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        debug!(path = %self.path.display(), entries = map.len(), "Storage file written");
        Ok(())
    }

    /// Load, apply `f`, and persist when `f` reports a change, all while
    /// holding the sidecar lock. Blocks until other handles release it.
    fn modify<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> (T, bool),
    ) -> StorageResult<T> {
        let _local = self.write_lock.lock();
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        let mut file_lock = RwLock::new(lock_file);
        let _exclusive = file_lock.write()?;

        let mut map = self.load()?;
        let (value, changed) = f(&mut map);
        if changed {
            self.persist(&map)?;
        }
        Ok(value)
    }
}

impl KeyValueStorage for FileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.modify(|map| {
            map.insert(key.to_string(), value.to_string());
            ((), true)
        })
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        self.modify(|map| {
            let existed = map.remove(key).is_some();
            (existed, existed)
        })
    }

    fn list_keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .load()?
            .into_keys()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_storage_set_get_delete() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("storage.json")).unwrap();

        assert_eq!(storage.get("token").unwrap(), None);
        storage.set("token", "t1").unwrap();
        assert_eq!(storage.get("token").unwrap(), Some("t1".to_string()));

        assert!(storage.delete("token").unwrap());
        assert!(!storage.delete("token").unwrap());
        assert_eq!(storage.get("token").unwrap(), None);
    }

    #[test]
    fn test_file_storage_shared_between_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.json");
        let first = FileStorage::new(&path).unwrap();
        let second = FileStorage::new(&path).unwrap();

        first.set("user", r#"{"uid":"u1"}"#).unwrap();
        assert_eq!(
            second.get("user").unwrap(),
            Some(r#"{"uid":"u1"}"#.to_string())
        );
    }

    #[test]
    fn test_file_storage_corrupt_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "{not json").unwrap();

        let storage = FileStorage::new(&path).unwrap();
        assert_eq!(storage.get("token").unwrap(), None);

        storage.set("token", "t2").unwrap();
        assert_eq!(storage.get("token").unwrap(), Some("t2".to_string()));
    }

    #[test]
    fn test_file_storage_lists_prefixed_keys() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("storage.json")).unwrap();
        storage.set("auth_code_lock:a", "1").unwrap();
        storage.set("auth_code_lock:b", "2").unwrap();
        storage.set("token", "t").unwrap();

        let mut keys = storage.list_keys_with_prefix("auth_code_lock:").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["auth_code_lock:a", "auth_code_lock:b"]);
    }

    #[test]
    fn test_concurrent_handles_do_not_lose_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storage.json");

        for round in 0..50 {
            let writers: Vec<_> = ["user", "token"]
                .into_iter()
                .map(|key| {
                    let storage = FileStorage::new(&path).unwrap();
                    std::thread::spawn(move || {
                        storage.set(key, &format!("{key}-{round}")).unwrap();
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap();
            }

            let reader = FileStorage::new(&path).unwrap();
            assert_eq!(reader.get("user").unwrap(), Some(format!("user-{round}")));
            assert_eq!(reader.get("token").unwrap(), Some(format!("token-{round}")));
        }
    }

    #[test]
    fn test_delete_through_one_handle_keeps_other_handles_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storage.json");
        let tab_a = FileStorage::new(&path).unwrap();
        tab_a.set("auth_code_lock:a", "{}").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let storage = FileStorage::new(&path).unwrap();
                std::thread::spawn(move || storage.set(&format!("key-{i}"), "v").unwrap())
            })
            .collect();
        assert!(tab_a.delete("auth_code_lock:a").unwrap());
        for handle in handles {
            handle.join().unwrap();
        }

        let keys = tab_a.list_keys_with_prefix("key-").unwrap();
        assert_eq!(keys.len(), 8);
        assert_eq!(tab_a.get("auth_code_lock:a").unwrap(), None);
    }

    #[test]
    fn test_writes_leave_no_temp_files_behind() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("storage.json")).unwrap();
        storage.set("token", "t1").unwrap();
        storage.set("token", "t2").unwrap();

        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["storage.json", "storage.json.lock"]);
    }
}
