use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{BackendKind, Lifetime, StorageBackend};
use crate::error::StorageError;

/// In-memory key/value storage
///
/// Used as the session-scoped backend (its contents die with the process,
/// like a tab's session storage) and in tests for any backend role. An
/// optional byte quota mimics the browser's storage limits.
pub struct MemoryStorage {
    kind: BackendKind,
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
            quota_bytes: None,
        }
    }

    /// Session-scoped storage
    #[must_use]
    pub fn session_scoped() -> Self {
        Self::new(BackendKind::SessionScoped)
    }

    /// Limit the total size (keys plus values) this storage accepts
    #[must_use]
    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    /// Drop everything, as when the browsing session ends
    pub fn end_session(&self) {
        self.entries().clear();
    }

    /// Number of stored keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StorageBackend for MemoryStorage {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str, _lifetime: Lifetime) -> Result<(), StorageError> {
        let mut entries = self.entries();

        if let Some(quota) = self.quota_bytes {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > quota {
                return Err(StorageError::QuotaExceeded {
                    backend: self.kind,
                    key: key.to_string(),
                });
            }
        }

        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries().remove(key);
        Ok(())
    }
}
