//! The size-limited key/value facility.
//!
//! A synchronous string store with a hard capacity, modelled on browser
//! session storage: writes that would exceed the capacity are refused with
//! [`StorageError::QuotaExceeded`] and leave the previous value in place.
//! Usage is the sum of key and value lengths.

use crate::error::StorageError;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Default capacity of a storage facility: 5 MiB.
pub const DEFAULT_CAPACITY: usize = 5 * 1024 * 1024;

/// Synchronous, capacity-limited string storage.
pub trait KeyValueStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`, replacing any previous value.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`. Missing keys are ignored.
    fn remove_item(&self, key: &str);

    fn keys(&self) -> Vec<String>;

    fn used_bytes(&self) -> usize;

    fn capacity_bytes(&self) -> usize;

    fn remaining_bytes(&self) -> usize {
        self.capacity_bytes().saturating_sub(self.used_bytes())
    }
}

fn check_quota(
    key: &str,
    value: &str,
    used: usize,
    replaced: usize,
    capacity: usize,
) -> Result<(), StorageError> {
    let requested = key.len() + value.len();
    let available = capacity.saturating_sub(used.saturating_sub(replaced));
    if requested > available {
        return Err(StorageError::QuotaExceeded {
            key: key.to_string(),
            requested,
            available,
        });
    }
    Ok(())
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── In-memory session storage ────────────────────────────────────────────

/// In-memory facility scoped to the running process.
#[derive(Debug)]
pub struct SessionStorage {
    items: Mutex<HashMap<String, String>>,
    capacity: usize,
}

impl SessionStorage {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            capacity,
        }
    }
}

impl Default for SessionStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStorage for SessionStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        lock(&self.items).get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = lock(&self.items);
        let used: usize = items.iter().map(|(k, v)| k.len() + v.len()).sum();
        let replaced = items.get(key).map_or(0, |v| key.len() + v.len());
        check_quota(key, value, used, replaced, self.capacity)?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) {
        lock(&self.items).remove(key);
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.items).keys().cloned().collect();
        keys.sort();
        keys
    }

    fn used_bytes(&self) -> usize {
        lock(&self.items).iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    fn capacity_bytes(&self) -> usize {
        self.capacity
    }
}

// ── Directory-backed storage ─────────────────────────────────────────────

const ITEM_EXT: &str = "item";

/// Facility persisted as one file per key inside a directory.
///
/// Survives process restarts, which makes a directory the CLI's notion of a
/// browsing session: `stage` and `process` can run as separate commands.
/// File names are the hex-encoded key, so any key is representable.
#[derive(Debug)]
pub struct DirStorage {
    root: PathBuf,
    capacity: usize,
    // Serialises read-modify-write cycles within this process.
    guard: Mutex<()>,
}

impl DirStorage {
    /// Open (creating if needed) a storage directory with the default capacity.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        Self::open_with_capacity(root, DEFAULT_CAPACITY)
    }

    pub fn open_with_capacity(root: impl Into<PathBuf>, capacity: usize) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        debug!("Opened storage directory {}", root.display());
        Ok(Self {
            root,
            capacity,
            guard: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key.bytes().map(|b| format!("{b:02x}")).collect();
        self.root.join(format!("{name}.{ITEM_EXT}"))
    }

    fn key_from_path(path: &Path) -> Option<String> {
        if path.extension()? != ITEM_EXT {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        if stem.len() % 2 != 0 {
            return None;
        }
        let bytes = (0..stem.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&stem[i..i + 2], 16).ok())
            .collect::<Option<Vec<u8>>>()?;
        String::from_utf8(bytes).ok()
    }

    /// `(key, byte usage)` of every stored item.
    fn entries(&self) -> Vec<(String, usize)> {
        let Ok(dir) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        dir.filter_map(|entry| {
            let entry = entry.ok()?;
            let key = Self::key_from_path(&entry.path())?;
            let len = entry.metadata().ok()?.len() as usize;
            Some((key.clone(), key.len() + len))
        })
        .collect()
    }
}

impl KeyValueStorage for DirStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(v) => Some(v),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read storage item '{}': {}", key, e);
                None
            }
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = lock(&self.guard);
        let entries = self.entries();
        let used: usize = entries.iter().map(|(_, n)| n).sum();
        let replaced = entries
            .iter()
            .find(|(k, _)| k == key)
            .map_or(0, |(_, n)| *n);
        check_quota(key, value, used, replaced, self.capacity)?;

        // Atomic write: temp file in the same directory, then rename.
        let io_err = |source| StorageError::Io {
            key: key.to_string(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root).map_err(io_err)?;
        tmp.write_all(value.as_bytes()).map_err(io_err)?;
        tmp.persist(self.path_for(key))
            .map_err(|e| io_err(e.error))?;
        Ok(())
    }

    fn remove_item(&self, key: &str) {
        let _guard = lock(&self.guard);
        if let Err(e) = fs::remove_file(self.path_for(key)) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove storage item '{}': {}", key, e);
            }
        }
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries().into_iter().map(|(k, _)| k).collect();
        keys.sort();
        keys
    }

    fn used_bytes(&self) -> usize {
        self.entries().iter().map(|(_, n)| n).sum()
    }

    fn capacity_bytes(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise_quota(storage: &dyn KeyValueStorage) {
        // capacity 64: "a" + 40 bytes = 41 used
        storage.set_item("a", &"x".repeat(40)).unwrap();
        assert_eq!(storage.used_bytes(), 41);

        let err = storage.set_item("b", &"y".repeat(30)).unwrap_err();
        match err {
            StorageError::QuotaExceeded {
                requested,
                available,
                ..
            } => {
                assert_eq!(requested, 31);
                assert_eq!(available, 23);
            }
            other => panic!("unexpected {other:?}"),
        }
        // A refused write leaves nothing behind.
        assert_eq!(storage.get_item("b"), None);

        // Replacing an item only counts the difference.
        storage.set_item("a", &"z".repeat(60)).unwrap();
        assert_eq!(storage.get_item("a").unwrap().len(), 60);

        storage.remove_item("a");
        storage.remove_item("a");
        assert_eq!(storage.used_bytes(), 0);
        assert!(storage.keys().is_empty());
    }

    #[test]
    fn session_storage_enforces_quota() {
        exercise_quota(&SessionStorage::with_capacity(64));
    }

    #[test]
    fn dir_storage_enforces_quota() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirStorage::open_with_capacity(dir.path(), 64).unwrap();
        exercise_quota(&storage);
    }

    #[test]
    fn dir_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = DirStorage::open(dir.path()).unwrap();
            storage.set_item("docdesk.stage.manifest", "{}").unwrap();
            storage.set_item("weird key/with:chars", "v").unwrap();
        }
        let storage = DirStorage::open(dir.path()).unwrap();
        assert_eq!(
            storage.keys(),
            vec!["docdesk.stage.manifest".to_string(), "weird key/with:chars".to_string()]
        );
        assert_eq!(storage.get_item("weird key/with:chars").as_deref(), Some("v"));
    }

    #[test]
    fn dir_storage_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README.txt"), "hello").unwrap();
        fs::write(dir.path().join("zz.item"), "not hex").unwrap();
        let storage = DirStorage::open(dir.path()).unwrap();
        assert!(storage.keys().is_empty());
        assert_eq!(storage.used_bytes(), 0);
    }
}
