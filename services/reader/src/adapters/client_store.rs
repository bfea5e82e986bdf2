//! services/reader/src/adapters/client_store.rs
//!
//! Implementations of the `ClientStore` port: a process-local map, and a JSON
//! file that survives restarts of the reader binary.

use recitation_core::ports::{ClientStore, PortError, PortResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

fn poisoned<T>(_: T) -> PortError {
    PortError::Unexpected("client store lock poisoned".to_string())
}

/// Keeps everything in memory. Used by tests and by embedders with no disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl ClientStore for MemoryStore {
    fn get(&self, key: &str) -> PortResult<Option<String>> {
        Ok(self.entries.lock().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> PortResult<()> {
        self.entries
            .lock()
            .map_err(poisoned)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> PortResult<()> {
        self.entries.lock().map_err(poisoned)?.remove(key);
        Ok(())
    }
}

//=========================================================================================
// JSON File Store
//=========================================================================================

/// A flat JSON object on disk, rewritten in full on every change.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    /// Opens `path`, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> PortResult<Self> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|e| PortError::Unexpected(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(PortError::Unexpected(e.to_string())),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn flush(&self, entries: &HashMap<String, String>) -> PortResult<()> {
        let json =
            serde_json::to_string_pretty(entries).map_err(|e| PortError::Unexpected(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PortError::Unexpected(e.to_string()))?;
        }
        std::fs::write(&self.path, json).map_err(|e| PortError::Unexpected(e.to_string()))
    }
}

impl ClientStore for JsonFileStore {
    fn get(&self, key: &str) -> PortResult<Option<String>> {
        Ok(self.entries.lock().map_err(poisoned)?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> PortResult<()> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> PortResult<()> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("reader-store-{}-{}.json", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn memory_store_round_trips_and_removes() {
        let store = MemoryStore::default();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let path = temp_path("reopen");
        {
            let store = JsonFileStore::open(&path).unwrap();
            store.set("reader.auth_token", "abc").unwrap();
            store.set("reader.passive_tracking", "true").unwrap();
            store.remove("reader.passive_tracking").unwrap();
        }
        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("reader.auth_token").unwrap().as_deref(), Some("abc"));
        assert_eq!(reopened.get("reader.passive_tracking").unwrap(), None);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "not json").unwrap();
        assert!(JsonFileStore::open(&path).is_err());
        let _ = std::fs::remove_file(path);
    }
}
