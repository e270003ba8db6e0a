//! String key/value storages behind the serialized tiers.
//!
//! These mirror the web storage contract: synchronous, string-only values,
//! a size quota, and `clear` wiping everything the storage holds.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, error};

/// Default per-storage quota in bytes (keys plus values).
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// Errors raised by a storage or a tier backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Writing the entry would exceed the storage quota.
    QuotaExceeded { key: String, limit: usize },
    /// The value could not be converted to or from its stored form.
    Serialization(String),
    /// The stored value has a different type than the one requested.
    TypeMismatch { key: String },
    /// The storage cannot be used right now.
    Unavailable(String),
    /// Reading or writing the backing file failed.
    Io(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuotaExceeded { key, limit } => {
                write!(f, "Quota of {} bytes exceeded while writing {}", limit, key)
            }
            Self::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Self::TypeMismatch { key } => write!(f, "Stored value for {} has another type", key),
            Self::Unavailable(msg) => write!(f, "Storage unavailable: {}", msg),
            Self::Io(msg) => write!(f, "Storage I/O error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Synchronous string key/value storage.
pub trait KeyValueStorage: Send + Sync {
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    fn clear(&self) -> Result<(), StorageError>;
}

pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, StorageError> {
    mutex
        .lock()
        .map_err(|_| StorageError::Unavailable(format!("{} lock poisoned", what)))
}

fn used_bytes<'a>(entries: impl Iterator<Item = (&'a String, &'a String)>) -> usize {
    entries.map(|(k, v)| k.len() + v.len()).sum()
}

/// Fails if replacing `key` with `value` would push the storage past `limit`.
fn check_quota<'a>(
    entries: impl Iterator<Item = (&'a String, &'a String)>,
    key: &str,
    value: &str,
    limit: usize,
) -> Result<(), StorageError> {
    let others: usize = used_bytes(entries.filter(|(k, _)| k.as_str() != key));
    if others + key.len() + value.len() > limit {
        return Err(StorageError::QuotaExceeded {
            key: key.to_string(),
            limit,
        });
    }
    Ok(())
}

/// In-process string storage that lives as long as its owner keeps it.
///
/// Shared by `Arc`, it outlives any one `SessionStore` built on top of it
/// (a "reload") but not the process (closing the "tab").
#[derive(Debug)]
pub struct ScopedStorage {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: usize,
}

impl ScopedStorage {
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA_BYTES)
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes,
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ScopedStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStorage for ScopedStorage {
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = lock(&self.entries, "scoped storage")?;
        check_quota(entries.iter(), key, value, self.quota_bytes)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = lock(&self.entries, "scoped storage")?;
        Ok(entries.get(key).cloned())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.entries, "scoped storage")?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        lock(&self.entries, "scoped storage")?.clear();
        Ok(())
    }
}

/// String storage persisted as a single JSON object on disk.
///
/// Every mutation rewrites the file through a sibling temp file and a rename,
/// so entries survive process restarts and a crash never leaves a torn file.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
    quota_bytes: usize,
}

impl FileStorage {
    /// Opens the storage at `path`, loading existing entries if the file exists.
    ///
    /// A file that does not parse is moved aside to `<name>.corrupt` and the
    /// storage starts empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_with_quota(path, DEFAULT_QUOTA_BYTES)
    }

    pub fn open_with_quota(path: impl AsRef<Path>, quota_bytes: usize) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        let entries: BTreeMap<String, String> = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|e| StorageError::Io(e.to_string()))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                match serde_json::from_str(&raw) {
                    Ok(entries) => entries,
                    Err(e) => {
                        let aside = sibling(&path, "corrupt");
                        error!(
                            "Discarding corrupt file storage {} ({}), moved to {}",
                            path.display(),
                            e,
                            aside.display()
                        );
                        fs::rename(&path, &aside).map_err(|e| StorageError::Io(e.to_string()))?;
                        BTreeMap::new()
                    }
                }
            }
        } else {
            BTreeMap::new()
        };

        debug!("Opened file storage at {} ({} entries)", path.display(), entries.len());

        Ok(Self {
            path,
            entries: Mutex::new(entries),
            quota_bytes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        let raw = serde_json::to_string(entries)?;
        let tmp = sibling(&self.path, "tmp");
        fs::write(&tmp, raw).map_err(|e| StorageError::Io(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StorageError::Io(e.to_string())
        })
    }
}

/// `dir/name.json` -> `dir/name.json.<suffix>`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

impl KeyValueStorage for FileStorage {
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = lock(&self.entries, "file storage")?;
        check_quota(entries.iter(), key, value, self.quota_bytes)?;

        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = lock(&self.entries, "file storage")?;
        Ok(entries.get(key).cloned())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = lock(&self.entries, "file storage")?;
        if !entries.contains_key(key) {
            return Ok(());
        }

        let mut next = entries.clone();
        next.remove(key);
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        let mut entries = lock(&self.entries, "file storage")?;
        let next = BTreeMap::new();
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }
}
