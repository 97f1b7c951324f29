//! Key-value storage backends for the override cache.
//!
//! Browser builds use `localStorage` (see `web`). Native builds and tests use
//! [`MemoryStorage`] or [`FileStorage`]. Every backend is scoped to one
//! origin: handles that share a backing map or directory see each other's
//! writes, like tabs on the same site.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::StorageError;

pub trait KeyValueStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    items: BTreeMap<String, String>,
    quota_bytes: Option<usize>,
    disabled: bool,
}

impl MemoryState {
    fn used_bytes_with(&self, key: &str, value: &str) -> usize {
        let others: usize = self
            .items
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum();
        others + key.len() + value.len()
    }
}

/// In-memory origin storage. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that rejects writes once keys plus values exceed `bytes`
    pub fn with_quota(bytes: usize) -> Self {
        let storage = Self::default();
        if let Ok(mut state) = storage.state.lock() {
            state.quota_bytes = Some(bytes);
        }
        storage
    }

    /// Simulate storage being turned off (private browsing, policy)
    pub fn set_disabled(&self, disabled: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.disabled = disabled;
        }
    }

    /// Write a raw value, bypassing quota and disabled checks
    pub fn insert_raw(&self, key: &str, value: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.items.insert(key.to_string(), value.to_string());
        }
    }

    pub fn keys(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.items.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Backend("memory storage lock poisoned".to_string()))
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let state = self.lock()?;
        if state.disabled {
            return Err(StorageError::Disabled);
        }
        Ok(state.items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        if state.disabled {
            return Err(StorageError::Disabled);
        }
        if let Some(quota) = state.quota_bytes {
            if state.used_bytes_with(key, value) > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                });
            }
        }
        state.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        if state.disabled {
            return Err(StorageError::Disabled);
        }
        state.items.remove(key);
        Ok(())
    }
}

const ITEM_EXTENSION: &str = "item";

/// File-backed origin storage: one file per key inside the origin directory.
///
/// Separate instances pointed at the same directory behave like tabs sharing
/// `localStorage`. A write replaces exactly one key: the value goes to a
/// uniquely named temp file which is then renamed over the key's file, so
/// writers of different keys never touch each other's data and a damaged
/// file only affects its own key.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(io_error)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the value stored under `key`
    pub fn item_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{ITEM_EXTENSION}", encode_key(key)))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!(".{}.{}.tmp", encode_key(key), ulid::Ulid::new()))
    }
}

/// Filesystem-safe, reversible file stem for a storage key.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn io_error(err: io::Error) -> StorageError {
    StorageError::Io(err.to_string())
}

impl KeyValueStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.item_path(key);
        match fs::read(&path) {
            Ok(data) => String::from_utf8(data).map(Some).map_err(|e| {
                StorageError::Backend(format!("{} is not UTF-8: {e}", path.display()))
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_error(err)),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let tmp_path = self.temp_path(key);
        if let Err(err) = fs::write(&tmp_path, value) {
            let _ = fs::remove_file(&tmp_path);
            return Err(io_error(err));
        }
        fs::rename(&tmp_path, self.item_path(key)).map_err(|err| {
            let _ = fs::remove_file(&tmp_path);
            io_error(err)
        })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.item_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_error(err)),
        }
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;

    #[test]
    fn test_memory_clones_share_origin() {
        let tab_a = MemoryStorage::new();
        let tab_b = tab_a.clone();
        tab_a.set_item("k", "v").unwrap();
        assert_eq!(tab_b.get_item("k").unwrap().as_deref(), Some("v"));
        tab_b.remove_item("k").unwrap();
        assert_eq!(tab_a.get_item("k").unwrap(), None);
    }

    #[test]
    fn test_memory_quota_rejects_oversized_write() {
        let storage = MemoryStorage::with_quota(16);
        storage.set_item("key", "small").unwrap();
        let err = storage.set_item("key2", "this value is far too long").unwrap_err();
        assert_eq!(
            err,
            StorageError::QuotaExceeded {
                key: "key2".to_string()
            }
        );
        // Replacing an existing key only counts the new value
        storage.set_item("key", "other").unwrap();
    }

    #[test]
    fn test_memory_disabled_rejects_everything() {
        let storage = MemoryStorage::new();
        storage.set_disabled(true);
        assert_eq!(storage.get_item("k"), Err(StorageError::Disabled));
        assert_eq!(storage.set_item("k", "v"), Err(StorageError::Disabled));
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        {
            let storage = FileStorage::open(dir.path()).unwrap();
            storage.set_item("assistant_tools_a1", r#"["calc"]"#).unwrap();
            storage.set_item("other", "x").unwrap();
            storage.remove_item("other").unwrap();
        }

        let reopened = FileStorage::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get_item("assistant_tools_a1").unwrap().as_deref(),
            Some(r#"["calc"]"#)
        );
        assert_eq!(reopened.get_item("other").unwrap(), None);
    }

    #[test]
    fn test_file_storage_instances_see_each_other() {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let tab_a = FileStorage::open(dir.path()).unwrap();
        let tab_b = FileStorage::open(dir.path()).unwrap();
        tab_a.set_item("k", "1").unwrap();
        assert_eq!(tab_b.get_item("k").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_file_storage_keys_are_separate_files() {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage = FileStorage::open(dir.path()).unwrap();
        storage.set_item("assistant_tools_a1", "1").unwrap();
        storage.set_item("a/../b c", "2").unwrap();

        assert_ne!(
            storage.item_path("assistant_tools_a1"),
            storage.item_path("assistant_tools_a2")
        );
        assert_eq!(storage.item_path("a/../b c").parent(), Some(dir.path()));
        assert_eq!(storage.get_item("a/../b c").unwrap().as_deref(), Some("2"));

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2, "no temp files left behind: {names:?}");
    }

    #[test]
    fn test_damaged_item_only_affects_its_key() {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let storage = FileStorage::open(dir.path()).unwrap();
        storage.set_item("good", "ok").unwrap();
        fs::write(storage.item_path("bad"), [0xff, 0xfe, 0x00]).unwrap();

        assert!(matches!(storage.get_item("bad"), Err(StorageError::Backend(_))));
        assert_eq!(storage.get_item("good").unwrap().as_deref(), Some("ok"));

        storage.set_item("bad", "fixed").unwrap();
        assert_eq!(storage.get_item("bad").unwrap().as_deref(), Some("fixed"));
        storage.remove_item("bad").unwrap();
        storage.remove_item("bad").unwrap();
        assert_eq!(storage.get_item("bad").unwrap(), None);
    }

    #[test]
    fn test_concurrent_instances_keep_every_key() {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");

        std::thread::scope(|scope| {
            for tab in 0..4 {
                let path = dir.path();
                scope.spawn(move || {
                    let storage = FileStorage::open(path).unwrap();
                    for n in 0..50 {
                        let key = format!("assistant_tools_t{tab}_{n}");
                        storage.set_item(&key, &format!("[\"tool_{n}\"]")).unwrap();
                    }
                });
            }
        });

        let reader = FileStorage::open(dir.path()).unwrap();
        for tab in 0..4 {
            for n in 0..50 {
                let key = format!("assistant_tools_t{tab}_{n}");
                assert_eq!(
                    reader.get_item(&key).unwrap(),
                    Some(format!("[\"tool_{n}\"]")),
                    "missing {key}"
                );
            }
        }
    }
}
