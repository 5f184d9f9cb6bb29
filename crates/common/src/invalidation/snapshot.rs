//! Persisted menu snapshots keyed by `fullMenu:<restaurantId>`

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::ids::RestaurantId;

/// Prefix shared by every menu snapshot key
pub const FULL_MENU_PREFIX: &str = "fullMenu:";
const FILE_EXTENSION: &str = ".json";

/// Snapshot key for a restaurant's full menu
pub fn full_menu_key(restaurant_id: &RestaurantId) -> String {
    format!("{FULL_MENU_PREFIX}{restaurant_id}")
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-origin persistent key-value store
pub trait SnapshotStore: std::fmt::Debug + Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SnapshotError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SnapshotError>;
    /// Removing a missing key succeeds
    fn remove(&self, key: &str) -> Result<(), SnapshotError>;
    /// Remove every key starting with `prefix`, returning how many went
    fn remove_prefix(&self, prefix: &str) -> Result<usize, SnapshotError>;
}

#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn get(&self, key: &str) -> Result<Option<String>, SnapshotError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SnapshotError> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SnapshotError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn remove_prefix(&self, prefix: &str) -> Result<usize, SnapshotError> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - entries.len())
    }
}

/// One file per key under a directory
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Create the directory if needed
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|source| SnapshotError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{FILE_EXTENSION}", encode_key(key)))
    }
}

/// Percent-encode a key into a file stem
///
/// Bytes outside `[A-Za-z0-9._-]`, and `%` itself, become `%XX`, so distinct
/// keys never share a file. The encoding works byte by byte, which keeps
/// prefixes: `encode_key(p)` starts `encode_key(k)` exactly when `p` starts `k`.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

impl SnapshotStore for FileSnapshotStore {
    fn get(&self, key: &str) -> Result<Option<String>, SnapshotError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SnapshotError::Io { path, source }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SnapshotError> {
        let path = self.path_for(key);
        std::fs::write(&path, value).map_err(|source| SnapshotError::Io { path, source })
    }

    fn remove(&self, key: &str) -> Result<(), SnapshotError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SnapshotError::Io { path, source }),
        }
    }

    fn remove_prefix(&self, prefix: &str) -> Result<usize, SnapshotError> {
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| SnapshotError::Io { path, source }
        };
        let encoded_prefix = encode_key(prefix);
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir).map_err(io_error(&self.dir))? {
            let entry = entry.map_err(io_error(&self.dir))?;
            let file_name = entry.file_name();
            let Some(stem) = file_name
                .to_str()
                .and_then(|name| name.strip_suffix(FILE_EXTENSION))
            else {
                continue;
            };
            if !stem.starts_with(&encoded_prefix) {
                continue;
            }
            let path = entry.path();
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(SnapshotError::Io { path, source }),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_menu_key() {
        assert_eq!(full_menu_key(&RestaurantId::new("r1")), "fullMenu:r1");
    }

    #[test]
    fn test_memory_store_remove_is_idempotent() {
        let store = MemorySnapshotStore::new();
        store.set("fullMenu:r1", "{}").unwrap();
        store.remove("fullMenu:r1").unwrap();
        store.remove("fullMenu:r1").unwrap();
        assert_eq!(store.get("fullMenu:r1").unwrap(), None);
    }

    #[test]
    fn test_file_store_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::open(temp.path().join("snapshots")).unwrap();

        store.set("fullMenu:r1", r#"{"dishes":[]}"#).unwrap();
        assert_eq!(
            store.get("fullMenu:r1").unwrap().as_deref(),
            Some(r#"{"dishes":[]}"#)
        );
        assert!(store.dir().join("fullMenu%3Ar1.json").exists());

        store.remove("fullMenu:r1").unwrap();
        store.remove("fullMenu:r1").unwrap();
        assert_eq!(store.get("fullMenu:r1").unwrap(), None);
    }

    #[test]
    fn test_file_store_keeps_similar_keys_apart() {
        let temp = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::open(temp.path()).unwrap();
        let slashed = full_menu_key(&RestaurantId::new("a/b"));
        let underscored = full_menu_key(&RestaurantId::new("a_b"));

        store.set(&underscored, "menu-of-a_b").unwrap();
        store.set("fullMenu_a_b", "raw").unwrap();
        assert_eq!(store.get(&slashed).unwrap(), None);

        store.set(&slashed, "menu-of-a/b").unwrap();
        store.remove(&slashed).unwrap();
        assert_eq!(store.get(&underscored).unwrap().as_deref(), Some("menu-of-a_b"));
        assert_eq!(store.get("fullMenu_a_b").unwrap().as_deref(), Some("raw"));
    }

    #[test]
    fn test_percent_sign_is_escaped_too() {
        assert_eq!(encode_key("fullMenu:r%1"), "fullMenu%3Ar%251");
        assert_ne!(encode_key("a%3Ab"), encode_key("a:b"));
    }

    #[test]
    fn test_memory_store_remove_prefix() {
        let store = MemorySnapshotStore::new();
        store.set("fullMenu:r1", "{}").unwrap();
        store.set("fullMenu:r2", "{}").unwrap();
        store.set("settings", "{}").unwrap();

        assert_eq!(store.remove_prefix(FULL_MENU_PREFIX).unwrap(), 2);
        assert_eq!(store.keys(), vec!["settings".to_string()]);
    }

    #[test]
    fn test_file_store_remove_prefix() {
        let temp = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::open(temp.path()).unwrap();
        store.set("fullMenu:r1", "{}").unwrap();
        store.set("fullMenu:r2", "{}").unwrap();
        store.set("fullMenu_r3", "{}").unwrap();
        store.set("fullMenu", "{}").unwrap();

        assert_eq!(store.remove_prefix(FULL_MENU_PREFIX).unwrap(), 2);
        assert_eq!(store.get("fullMenu:r1").unwrap(), None);
        assert_eq!(store.get("fullMenu:r2").unwrap(), None);
        assert!(store.get("fullMenu_r3").unwrap().is_some());
        assert!(store.get("fullMenu").unwrap().is_some());
    }
}
