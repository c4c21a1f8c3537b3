/**
 * KEY-VALUE STORE - Persistence for dashboard snapshots and UI preferences
 *
 * ROLE :
 * Plays the part browser storage plays for a dashboard front-end: a
 * persistent store (JSON file, survives restarts) and an ephemeral one
 * (process memory, gone on restart) behind the same API.
 *
 * HOW IT WORKS :
 * - In-memory map guarded by a parking_lot mutex
 * - Persistent stores rewrite the whole JSON file on every mutation, through a
 *   temp file + rename, one writer at a time
 * - Values are arbitrary serde types, stored as JSON
 * - Prefix deletion is used to drop every dashboard snapshot at once
 */

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

pub const DASHBOARD_KEY_PREFIX: &str = "dashboard_";
pub const ZONE_FILTERS_KEY: &str = "managementZoneFilters";
pub const ZONE_SEARCH_KEY: &str = "managementZoneSearch";
pub const THEME_KEY: &str = "theme";
pub const LAST_ACTIVE_TAB_KEY: &str = "lastActiveTab";
pub const LAST_TIMEFRAME_KEY: &str = "lastTimeframe";
pub const LAST_NAVIGATION_KEY: &str = "lastNavigation";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct KeyValueStore {
    /// None for ephemeral stores
    path: Option<PathBuf>,
    entries: parking_lot::Mutex<Map<String, Value>>,
    /// Serializes snapshot + write so the file never goes back in time.
    disk: parking_lot::Mutex<()>,
}

impl KeyValueStore {
    /// Opens (or creates) a store backed by a JSON file.
    pub fn persistent<P: Into<PathBuf>>(path: P) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        if !path.exists() {
            fs::write(&path, "{}")?;
        }

        let content = fs::read_to_string(&path)?;
        let entries = match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                warn!("store file {:?} is not a JSON object, starting empty", path);
                Map::new()
            }
        };
        debug!("opened store {:?} with {} keys", path, entries.len());

        Ok(Self {
            path: Some(path),
            entries: parking_lot::Mutex::new(entries),
            disk: parking_lot::Mutex::new(()),
        })
    }

    pub fn ephemeral() -> Self {
        Self {
            path: None,
            entries: parking_lot::Mutex::new(Map::new()),
            disk: parking_lot::Mutex::new(()),
        }
    }

    /// Returns None when the key is absent or holds a value of another shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.entries.lock().get(key).cloned()?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("ignoring unreadable store entry {key}: {e}");
                None
            }
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value)?;
        self.entries.lock().insert(key.to_string(), value);
        self.save_to_disk()
    }

    /// Returns whether the key existed.
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let existed = self.entries.lock().remove(key).is_some();
        if existed {
            self.save_to_disk()?;
        }
        Ok(existed)
    }

    /// Deletes every key starting with `prefix`, returns how many went away.
    pub fn remove_prefixed(&self, prefix: &str) -> Result<usize, StoreError> {
        let removed = {
            let mut entries = self.entries.lock();
            let doomed: Vec<String> = entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            for key in &doomed {
                entries.remove(key);
            }
            doomed.len()
        };
        if removed > 0 {
            self.save_to_disk()?;
            debug!("removed {removed} keys with prefix {prefix}");
        }
        Ok(removed)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    fn save_to_disk(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else { return Ok(()) };
        let _writer = self.disk.lock();
        let json = {
            let entries = self.entries.lock();
            serde_json::to_string_pretty(&*entries)?
        };
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistent_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = KeyValueStore::persistent(&path).unwrap();
        store.set(THEME_KEY, &"dark").unwrap();
        store.set("dashboard_vfg_cache", &serde_json::json!({"n": 1})).unwrap();
        drop(store);

        let reopened = KeyValueStore::persistent(&path).unwrap();
        assert_eq!(reopened.get::<String>(THEME_KEY).as_deref(), Some("dark"));
        assert_eq!(reopened.keys().len(), 2);
    }

    #[test]
    fn test_remove_prefixed() {
        let store = KeyValueStore::ephemeral();
        store.set("dashboard_vfg_cache", &1).unwrap();
        store.set("dashboard_vfe_cache", &2).unwrap();
        store.set(ZONE_SEARCH_KEY, &"paris").unwrap();

        assert_eq!(store.remove_prefixed(DASHBOARD_KEY_PREFIX).unwrap(), 2);
        assert_eq!(store.keys(), vec![ZONE_SEARCH_KEY.to_string()]);
        assert_eq!(store.remove_prefixed(DASHBOARD_KEY_PREFIX).unwrap(), 0);
    }

    #[test]
    fn test_get_wrong_shape_is_none() {
        let store = KeyValueStore::ephemeral();
        store.set("n", &"not a number").unwrap();
        assert_eq!(store.get::<u32>("n"), None);
        assert!(store.remove("n").unwrap());
        assert!(!store.remove("n").unwrap());
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        let store = KeyValueStore::persistent(&path).unwrap();
        assert!(store.keys().is_empty());
    }

    #[test]
    fn test_concurrent_writers_leave_latest_values_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        for _ in 0..5 {
            let store = KeyValueStore::persistent(&path).unwrap();
            std::thread::scope(|scope| {
                for t in 0..8 {
                    let store = &store;
                    scope.spawn(move || {
                        for n in 0..30u32 {
                            store.set(&format!("dashboard_{t}_cache"), &n).unwrap();
                        }
                    });
                }
            });
            drop(store);

            let reopened = KeyValueStore::persistent(&path).unwrap();
            assert_eq!(reopened.keys().len(), 8);
            for t in 0..8 {
                assert_eq!(reopened.get::<u32>(&format!("dashboard_{t}_cache")), Some(29));
            }
            assert_eq!(reopened.remove_prefixed(DASHBOARD_KEY_PREFIX).unwrap(), 8);
        }
        assert!(!path.with_extension("json.tmp").exists());
    }
}
