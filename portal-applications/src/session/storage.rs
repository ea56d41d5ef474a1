//! Local Storage - persisted key/value state surviving restarts
//!
//! Holds two entries: the serialized auth session and the user-data cache
//! carrying the last known role. Last writer wins; nothing here is authoritative.

use chrono::{DateTime, TimeZone, Utc};
use portal_core::{ErrorContext, LocalStore, PortalError, PortalResult, Role};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

const STORAGE_FILE: &str = "local-storage.json";

/// Store keeping every entry in one JSON document on disk
pub struct FileLocalStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileLocalStore {
    /// Open (or create) the store under `dir`
    pub fn open<P: AsRef<Path>>(dir: P) -> PortalResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| storage_error("open", dir, e))?;

        let path = dir.join(STORAGE_FILE);
        let values = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| storage_error("open", &path, e))?;
            match serde_json::from_str(&raw) {
                Ok(values) => values,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Discarding unreadable local storage");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        info!("Local storage initialized at: {}", path.display());

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn flush(&self, values: &BTreeMap<String, String>) -> PortalResult<()> {
        let json = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, json).map_err(|e| storage_error("flush", &self.path, e))?;
        debug!("Flushed {} local storage entries", values.len());
        Ok(())
    }
}

impl LocalStore for FileLocalStore {
    fn get(&self, key: &str) -> PortalResult<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> PortalResult<()> {
        let mut values = self.lock();
        values.insert(key.to_string(), value.to_string());
        self.flush(&values)
    }

    fn remove(&self, key: &str) -> PortalResult<()> {
        let mut values = self.lock();
        if values.remove(key).is_some() {
            self.flush(&values)?;
        }
        Ok(())
    }
}

fn storage_error(operation: &str, path: &Path, e: std::io::Error) -> PortalError {
    PortalError::Storage {
        message: format!("Local storage {} failed for {}: {}", operation, path.display(), e),
        source: Some(Box::new(e)),
        context: ErrorContext::new("local_storage")
            .with_operation(operation)
            .with_suggestion("Check that the data directory is writable"),
    }
}

/// Store living only as long as the process
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, key: &str) -> PortalResult<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> PortalResult<()> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> PortalResult<()> {
        self.lock().remove(key);
        Ok(())
    }
}

/// Cached role entry: `{user_id, role, timestamp}` with the timestamp in epoch
/// milliseconds. Entries without an owner never match anyone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRole {
    #[serde(default)]
    pub user_id: String,
    pub role: String,
    pub timestamp: i64,
}

impl CachedRole {
    pub fn cached_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

/// Typed view over the user-data key
#[derive(Clone)]
pub struct RoleCache {
    store: Arc<dyn LocalStore>,
    key: String,
}

impl RoleCache {
    pub fn new(store: Arc<dyn LocalStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Raw cached entry, if present and readable
    pub fn load(&self) -> Option<CachedRole> {
        let raw = match self.store.get(&self.key) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "Failed to read role cache");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(cached) => Some(cached),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable role cache");
                None
            }
        }
    }

    /// Cached role of `user_id`, if present, non-empty and known
    pub fn load_role(&self, user_id: &str) -> Option<Role> {
        let cached = self.load()?;
        if user_id.is_empty() || cached.user_id != user_id {
            debug!(user_id = user_id, "Cached role belongs to another user, ignoring");
            return None;
        }
        if cached.role.trim().is_empty() {
            return None;
        }
        cached.role.parse().ok()
    }

    /// Remember `role` of `user_id` with the current time. Failures are
    /// logged, not raised.
    pub fn save(&self, user_id: &str, role: Role) {
        let entry = CachedRole {
            user_id: user_id.to_string(),
            role: role.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        };

        let result = serde_json::to_string(&entry)
            .map_err(PortalError::from)
            .and_then(|json| self.store.set(&self.key, &json));
        if let Err(e) = result {
            warn!(error = %e, "Failed to cache role");
        }
    }

    pub fn clear(&self) {
        if let Err(e) = self.store.remove(&self.key) {
            warn!(error = %e, "Failed to clear role cache");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();

        let store = FileLocalStore::open(dir.path()).unwrap();
        store.set("portal-auth-token", "{\"a\":1}").unwrap();
        store.set("portal-user-data", "x").unwrap();
        store.remove("portal-user-data").unwrap();
        drop(store);

        let reopened = FileLocalStore::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get("portal-auth-token").unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        assert_eq!(reopened.get("portal-user-data").unwrap(), None);
    }

    #[test]
    fn test_file_store_recovers_from_corrupt_document() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(STORAGE_FILE), "not json").unwrap();

        let store = FileLocalStore::open(dir.path()).unwrap();
        assert_eq!(store.get("anything").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_role_cache_round_trip() {
        let cache = RoleCache::new(Arc::new(MemoryLocalStore::new()), "portal-user-data");
        assert_eq!(cache.load_role("u-1"), None);

        cache.save("u-1", Role::Admin);
        let cached = cache.load().unwrap();
        assert_eq!(cached.user_id, "u-1");
        assert_eq!(cached.role, "admin");
        assert!(cached.cached_at().is_some());
        assert_eq!(cache.load_role("u-1"), Some(Role::Admin));

        cache.clear();
        assert_eq!(cache.load(), None);
    }

    #[test]
    fn test_empty_cached_role_is_ignored() {
        let store = Arc::new(MemoryLocalStore::new());
        store
            .set("portal-user-data", r#"{"user_id":"u-1","role":"","timestamp":0}"#)
            .unwrap();

        let cache = RoleCache::new(store, "portal-user-data");
        assert!(cache.load().is_some());
        assert_eq!(cache.load_role("u-1"), None);
    }

    #[test]
    fn test_cached_role_is_only_served_to_its_owner() {
        let store = Arc::new(MemoryLocalStore::new());
        let cache = RoleCache::new(store.clone(), "portal-user-data");
        cache.save("u-admin", Role::Admin);

        assert_eq!(cache.load_role("u-admin"), Some(Role::Admin));
        assert_eq!(cache.load_role("u-client"), None);
        assert_eq!(cache.load_role(""), None);

        // Entries written without an owner match nobody
        store
            .set("portal-user-data", r#"{"role":"admin","timestamp":0}"#)
            .unwrap();
        assert_eq!(cache.load_role("u-admin"), None);
    }
}
