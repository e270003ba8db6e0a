//! Tiered session store.
//!
//! A key/value store whose backend is picked by a [`SessionTier`]. Each tier
//! is its own namespace: switching tiers does not migrate entries, and the
//! entries of the previous tier become unreachable until it is selected again.
//!
//! - **Persistent / Tab**: values are JSON-encoded into a string storage, so
//!   only their serializable representation round-trips.
//! - **MemoryOnly / BackendManaged**: values are held by reference and come
//!   back exactly as stored.
//!
//! No operation ever fails loudly. Storage errors are logged and reported as
//! `false` (mutations) or `None` (reads).
//!
//! In a production build the active tier is always `MemoryOnly`, whatever the
//! caller asked for.

mod backend;
mod storage;
mod tier;

pub use backend::{MemoryBackend, SerializedBackend, StoredValue, TierBackend, ValueEncoding};
pub use storage::{DEFAULT_QUOTA_BYTES, FileStorage, KeyValueStorage, ScopedStorage, StorageError};
pub use tier::{SecurityAssessment, SessionTier};

use std::any::Any;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{error, info, warn};

use crate::config::Environment;

/// String storages backing the serialized tiers.
#[derive(Clone)]
pub struct SessionStorages {
    pub persistent: Arc<dyn KeyValueStorage>,
    pub tab: Arc<dyn KeyValueStorage>,
}

impl SessionStorages {
    /// Both tiers backed by fresh in-process storages.
    pub fn in_memory() -> Self {
        Self {
            persistent: Arc::new(ScopedStorage::new()),
            tab: Arc::new(ScopedStorage::new()),
        }
    }
}

impl Default for SessionStorages {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Session-scoped key/value store with a swappable security tier.
pub struct SessionStore {
    environment: Environment,
    persistent: Arc<dyn TierBackend>,
    tab: Arc<dyn TierBackend>,
    memory: Arc<dyn TierBackend>,
    backend_managed: Arc<dyn TierBackend>,
    active: RwLock<Arc<dyn TierBackend>>,
}

impl SessionStore {
    /// Creates a store over fresh in-process storages.
    pub fn new(requested: SessionTier, environment: Environment) -> Self {
        Self::with_storages(requested, environment, SessionStorages::in_memory())
    }

    /// Creates a store over the given storages.
    pub fn with_storages(
        requested: SessionTier,
        environment: Environment,
        storages: SessionStorages,
    ) -> Self {
        let persistent: Arc<dyn TierBackend> = Arc::new(SerializedBackend::new(
            SessionTier::Persistent,
            storages.persistent,
        ));
        let tab: Arc<dyn TierBackend> =
            Arc::new(SerializedBackend::new(SessionTier::Tab, storages.tab));
        let memory: Arc<dyn TierBackend> = Arc::new(MemoryBackend::new(SessionTier::MemoryOnly));
        let backend_managed: Arc<dyn TierBackend> =
            Arc::new(MemoryBackend::new(SessionTier::BackendManaged));

        let tier = enforce_tier(requested, environment);
        let active = match tier {
            SessionTier::Persistent => persistent.clone(),
            SessionTier::Tab => tab.clone(),
            SessionTier::MemoryOnly => memory.clone(),
            SessionTier::BackendManaged => backend_managed.clone(),
        };

        info!("Session store created with {} tier", tier);

        Self {
            environment,
            persistent,
            tab,
            memory,
            backend_managed,
            active: RwLock::new(active),
        }
    }

    fn backend_for(&self, tier: SessionTier) -> Arc<dyn TierBackend> {
        match tier {
            SessionTier::Persistent => self.persistent.clone(),
            SessionTier::Tab => self.tab.clone(),
            SessionTier::MemoryOnly => self.memory.clone(),
            SessionTier::BackendManaged => self.backend_managed.clone(),
        }
    }

    fn active(&self) -> Result<Arc<dyn TierBackend>, StorageError> {
        self.active
            .read()
            .map(|backend| backend.clone())
            .map_err(|_| StorageError::Unavailable("session store lock poisoned".to_string()))
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// The tier currently in effect.
    pub fn tier(&self) -> SessionTier {
        match self.active() {
            Ok(backend) => backend.tier(),
            // A poisoned store behaves as if nothing persisted.
            Err(_) => SessionTier::MemoryOnly,
        }
    }

    /// Switches the active tier and returns the tier now in effect.
    ///
    /// Entries are not migrated. In production the switch is forced to
    /// `MemoryOnly`.
    pub fn set_security_level(&self, requested: SessionTier) -> SessionTier {
        let tier = enforce_tier(requested, self.environment);
        let backend = self.backend_for(tier);

        match self.active.write() {
            Ok(mut active) => {
                *active = backend;
                info!("Session security level changed to {}", tier);
                tier
            }
            Err(_) => {
                error!("Failed to change session security level: store lock poisoned");
                self.tier()
            }
        }
    }

    /// Stores `value` under `key`. Returns `false` if the backend failed.
    pub fn set_item<T>(&self, key: &str, value: T) -> bool
    where
        T: Serialize + Send + Sync + 'static,
    {
        let result = self.active().and_then(|backend| {
            let stored = match backend.encoding() {
                ValueEncoding::Reference => StoredValue::Shared(Arc::new(value)),
                ValueEncoding::Json => StoredValue::Encoded(serde_json::to_string(&value)?),
            };
            backend.set(key, stored)
        });

        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to set session item {}: {}", key, e);
                false
            }
        }
    }

    /// Reads the value under `key`, or `None` when absent or unreadable.
    pub fn get_item<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let result = self
            .active()
            .and_then(|backend| backend.get(key))
            .and_then(|stored| match stored {
                None => Ok(None),
                Some(StoredValue::Encoded(text)) => Ok(Some(serde_json::from_str::<T>(&text)?)),
                Some(StoredValue::Shared(value)) => downcast::<T>(key, value).map(Some),
            });

        match result {
            Ok(value) => value,
            Err(StorageError::TypeMismatch { key }) => {
                warn!("Session item {} was stored with a different type", key);
                None
            }
            Err(e) => {
                error!("Failed to get session item {}: {}", key, e);
                None
            }
        }
    }

    /// Removes `key` from the active tier.
    pub fn remove_item(&self, key: &str) -> bool {
        match self.active().and_then(|backend| backend.remove(key)) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to remove session item {}: {}", key, e);
                false
            }
        }
    }

    /// Removes every entry of the active tier.
    pub fn clear(&self) -> bool {
        match self.active().and_then(|backend| backend.clear()) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to clear session storage: {}", e);
                false
            }
        }
    }

    /// Static security report for the active tier.
    pub fn assess_security(&self) -> SecurityAssessment {
        SecurityAssessment::for_tier(self.tier())
    }
}

fn downcast<T>(key: &str, value: Arc<dyn Any + Send + Sync>) -> Result<T, StorageError>
where
    T: Clone + 'static,
{
    value
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| StorageError::TypeMismatch {
            key: key.to_string(),
        })
}

fn enforce_tier(requested: SessionTier, environment: Environment) -> SessionTier {
    if environment.is_production() && requested != SessionTier::MemoryOnly {
        warn!(
            "Production environment: forcing memory-only session tier (requested {})",
            requested
        );
        return SessionTier::MemoryOnly;
    }
    requested
}
