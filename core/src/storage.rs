//! Key-value persistence for the session across restarts.
//!
//! Storage is treated as synchronous and always available: implementations
//! swallow (and log) their own I/O failures instead of surfacing them, so a
//! broken disk degrades to "not remembered" rather than "cannot log in".

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;

pub const TOKEN_KEY: &str = "maize.auth.token";
pub const USER_KEY: &str = "maize.auth.user";

pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.lock().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

/// JSON object on disk, rewritten on every change.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> HashMap<String, String> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to read session storage");
                return HashMap::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|err| {
            tracing::warn!(path = %self.path.display(), error = %err, "session storage is corrupt, ignoring");
            HashMap::new()
        })
    }

    fn store(&self, entries: &HashMap<String, String>) {
        let result = serde_json::to_string_pretty(entries)
            .map_err(std::io::Error::other)
            .and_then(|raw| {
                if let Some(parent) = self.path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&self.path, raw)
            });
        if let Err(err) = result {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to write session storage");
        }
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock();
        self.load().remove(key)
    }

    fn set(&self, key: &str, value: &str) {
        let _guard = self.lock.lock();
        let mut entries = self.load();
        entries.insert(key.to_string(), value.to_string());
        self.store(&entries);
    }

    fn remove(&self, key: &str) {
        let _guard = self.lock.lock();
        let mut entries = self.load();
        if entries.remove(key).is_some() {
            self.store(&entries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_round_trips_keys() {
        let storage = MemoryStorage::new();
        storage.set(TOKEN_KEY, "abc");
        assert_eq!(storage.get(TOKEN_KEY).as_deref(), Some("abc"));
        storage.remove(TOKEN_KEY);
        assert!(storage.get(TOKEN_KEY).is_none());
    }

    #[test]
    fn file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        FileStorage::new(&path).set(USER_KEY, r#"{"id":1}"#);
        let reopened = FileStorage::new(&path);
        assert_eq!(reopened.get(USER_KEY).as_deref(), Some(r#"{"id":1}"#));

        reopened.remove(USER_KEY);
        assert!(FileStorage::new(&path).get(USER_KEY).is_none());
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "not json").unwrap();

        let storage = FileStorage::new(&path);
        assert!(storage.get(TOKEN_KEY).is_none());
        storage.set(TOKEN_KEY, "fresh");
        assert_eq!(storage.get(TOKEN_KEY).as_deref(), Some("fresh"));
    }
}
