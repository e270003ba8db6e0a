//! One backend per session tier.
//!
//! Memory tiers keep values by reference; serialized tiers encode them as
//! JSON into a [`KeyValueStorage`]. The store picks the encoding from the
//! backend, so a value only round-trips through its serializable form on the
//! serialized tiers.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::SessionTier;
use super::storage::{KeyValueStorage, StorageError, lock};

/// A value as held by a backend.
#[derive(Clone)]
pub enum StoredValue {
    /// Held by reference, no serialization.
    Shared(Arc<dyn Any + Send + Sync>),
    /// JSON text.
    Encoded(String),
}

/// How a backend expects values to be handed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueEncoding {
    Reference,
    Json,
}

/// Storage capability shared by every tier.
pub trait TierBackend: Send + Sync {
    /// Tier this backend implements.
    fn tier(&self) -> SessionTier;

    fn encoding(&self) -> ValueEncoding;

    fn set(&self, key: &str, value: StoredValue) -> Result<(), StorageError>;

    fn get(&self, key: &str) -> Result<Option<StoredValue>, StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn clear(&self) -> Result<(), StorageError>;
}

/// Process-local map holding values by reference.
pub struct MemoryBackend {
    tier: SessionTier,
    entries: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl MemoryBackend {
    pub fn new(tier: SessionTier) -> Self {
        Self {
            tier,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl TierBackend for MemoryBackend {
    fn tier(&self) -> SessionTier {
        self.tier
    }

    fn encoding(&self) -> ValueEncoding {
        ValueEncoding::Reference
    }

    fn set(&self, key: &str, value: StoredValue) -> Result<(), StorageError> {
        match value {
            StoredValue::Shared(value) => {
                lock(&self.entries, "memory backend")?.insert(key.to_string(), value);
                Ok(())
            }
            StoredValue::Encoded(_) => Err(StorageError::Serialization(format!(
                "{} tier only accepts shared values",
                self.tier
            ))),
        }
    }

    fn get(&self, key: &str) -> Result<Option<StoredValue>, StorageError> {
        let entries = lock(&self.entries, "memory backend")?;
        Ok(entries.get(key).cloned().map(StoredValue::Shared))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.entries, "memory backend")?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        lock(&self.entries, "memory backend")?.clear();
        Ok(())
    }
}

/// Backend encoding values as JSON into a string storage.
pub struct SerializedBackend {
    tier: SessionTier,
    storage: Arc<dyn KeyValueStorage>,
}

impl SerializedBackend {
    pub fn new(tier: SessionTier, storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { tier, storage }
    }
}

impl TierBackend for SerializedBackend {
    fn tier(&self) -> SessionTier {
        self.tier
    }

    fn encoding(&self) -> ValueEncoding {
        ValueEncoding::Json
    }

    fn set(&self, key: &str, value: StoredValue) -> Result<(), StorageError> {
        match value {
            StoredValue::Encoded(text) => self.storage.set_item(key, &text),
            StoredValue::Shared(_) => Err(StorageError::Serialization(format!(
                "{} tier only accepts encoded values",
                self.tier
            ))),
        }
    }

    fn get(&self, key: &str) -> Result<Option<StoredValue>, StorageError> {
        Ok(self.storage.get_item(key)?.map(StoredValue::Encoded))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.storage.remove_item(key)
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.storage.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::storage::ScopedStorage;

    #[test]
    fn test_memory_backend_keeps_reference() {
        let backend = MemoryBackend::new(SessionTier::MemoryOnly);
        let value: Arc<dyn Any + Send + Sync> = Arc::new(vec![1u8, 2, 3]);
        backend.set("bytes", StoredValue::Shared(value.clone())).unwrap();

        match backend.get("bytes").unwrap() {
            Some(StoredValue::Shared(held)) => assert!(Arc::ptr_eq(&held, &value)),
            _ => panic!("expected shared value"),
        }
    }

    #[test]
    fn test_memory_backend_rejects_encoded() {
        let backend = MemoryBackend::new(SessionTier::BackendManaged);
        let result = backend.set("k", StoredValue::Encoded("\"v\"".to_string()));
        assert!(matches!(result, Err(StorageError::Serialization(_))));
        assert!(backend.get("k").unwrap().is_none());
    }

    #[test]
    fn test_serialized_backend_rejects_references() {
        let backend = SerializedBackend::new(SessionTier::Tab, Arc::new(ScopedStorage::new()));
        let result = backend.set("k", StoredValue::Shared(Arc::new(1u32)));
        assert!(matches!(result, Err(StorageError::Serialization(_))));
        assert!(backend.get("k").unwrap().is_none());
    }
}
