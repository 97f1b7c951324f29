//! OverrideStore - optimistic per-assistant capability cache
//!
//! Holds the capability list a user last saved for an assistant, written
//! before the server confirms it. The store is best-effort: unreadable
//! entries read as absent and failed writes are dropped, both with a warning.
//! Nothing here ever returns an error to the caller.
//!
//! Besides the flat list, the store keeps two smaller per-assistant records:
//! the selected categories (category mode) and the environment-grant toggle.

use std::sync::Arc;

use crate::config::OverrideKeys;
use crate::error::StoreError;
use crate::storage::KeyValueStorage;

#[derive(Clone)]
pub struct OverrideStore {
    storage: Arc<dyn KeyValueStorage>,
    keys: OverrideKeys,
}

impl std::fmt::Debug for OverrideStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverrideStore")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl OverrideStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self::with_keys(storage, OverrideKeys::default())
    }

    pub fn with_keys(storage: Arc<dyn KeyValueStorage>, keys: OverrideKeys) -> Self {
        Self { storage, keys }
    }

    pub fn keys(&self) -> &OverrideKeys {
        &self.keys
    }

    /// Last list written for `entity_id`. `Some(vec![])` is an explicit empty edit.
    pub fn get(&self, entity_id: &str) -> Option<Vec<String>> {
        self.read_list(&self.keys.capabilities(entity_id))
    }

    /// Replace the cached list. Returns whether the write reached storage.
    pub fn set(&self, entity_id: &str, capability_ids: &[String]) -> bool {
        self.write_list(&self.keys.capabilities(entity_id), capability_ids)
    }

    pub fn clear(&self, entity_id: &str) {
        self.remove(&self.keys.capabilities(entity_id));
    }

    /// Selected categories; `Some` means category mode is active.
    pub fn categories(&self, entity_id: &str) -> Option<Vec<String>> {
        self.read_list(&self.keys.categories(entity_id))
    }

    pub fn set_categories(&self, entity_id: &str, categories: &[String]) -> bool {
        self.write_list(&self.keys.categories(entity_id), categories)
    }

    pub fn clear_categories(&self, entity_id: &str) {
        self.remove(&self.keys.categories(entity_id));
    }

    pub fn environment_toggle(&self, entity_id: &str) -> bool {
        let key = self.keys.toggle(entity_id);
        match self.storage.get_item(&key) {
            Ok(Some(raw)) => match raw.as_str() {
                "true" => true,
                "false" => false,
                _ => {
                    report(StoreError::CacheCorrupt {
                        key,
                        reason: format!("expected boolean, found {raw:?}"),
                    });
                    false
                }
            },
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Override storage read failed");
                false
            }
        }
    }

    pub fn set_environment_toggle(&self, entity_id: &str, enabled: bool) -> bool {
        let key = self.keys.toggle(entity_id);
        if !enabled {
            return self.remove(&key);
        }
        match self.storage.set_item(&key, "true") {
            Ok(()) => true,
            Err(source) => {
                report(StoreError::CachePersistFailed { key, source });
                false
            }
        }
    }

    fn read_list(&self, key: &str) -> Option<Vec<String>> {
        let raw = match self.storage.get_item(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Override storage read failed");
                return None;
            }
        };

        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(list) => Some(list),
            Err(e) => {
                report(StoreError::CacheCorrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                });
                None
            }
        }
    }

    fn write_list(&self, key: &str, values: &[String]) -> bool {
        let payload = match serde_json::to_string(values) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to serialize override");
                return false;
            }
        };

        match self.storage.set_item(key, &payload) {
            Ok(()) => {
                tracing::debug!(key = %key, count = values.len(), "Override cached");
                true
            }
            Err(source) => {
                report(StoreError::CachePersistFailed {
                    key: key.to_string(),
                    source,
                });
                false
            }
        }
    }

    fn remove(&self, key: &str) -> bool {
        match self.storage.remove_item(key) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to remove cached override");
                false
            }
        }
    }
}

fn report(err: StoreError) {
    match &err {
        StoreError::CacheCorrupt { key, .. } => {
            tracing::warn!(key = %key, error = %err, "Ignoring corrupt cached override");
        }
        StoreError::CachePersistFailed { key, .. } => {
            tracing::warn!(key = %key, error = %err, "Dropping optimistic override write");
        }
    }
}
