//! Durable, string-keyed storage for session data.

use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

/// Where the bearer token is kept.
pub const AUTH_TOKEN: &str = "auth_token";
/// Where the serialized [`crate::User`] is kept.
pub const ADMIN_USER: &str = "admin_user";
/// Where the serialized [`crate::Brand`] is kept.
pub const ORG_BRAND: &str = "org_brand";

/// A synchronous key-value store which outlives the process.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key. Removing a key which isn't there is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Errors raised by a [`Storage`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Unable to access the session file at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("The session file at {} is corrupt", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unable to encode a value for storage")]
    Encode(#[from] serde_json::Error),
}

/// A [`Storage`] which lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self { MemoryStorage::default() }

    pub fn len(&self) -> usize { self.entries.lock().len() }

    pub fn is_empty(&self) -> bool { self.entries.lock().is_empty() }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// A [`Storage`] backed by a single JSON object on disk.
///
/// The whole file is read when it is opened and rewritten on every mutation.
/// Writes go to a sibling temporary file which is then renamed into place,
/// so a crash never leaves a half-written session behind.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open the session file, treating a missing file as an empty store.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, StorageError> {
        let path = path.into();

        let entries = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|source| {
                StorageError::Corrupt {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!(
                    "No session file at {}, starting empty",
                    path.display()
                );
                BTreeMap::new()
            },
            Err(source) => return Err(StorageError::Io { path, source }),
        };

        Ok(FileStorage {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path { &self.path }

    fn flush(
        &self,
        entries: &BTreeMap<String, String>,
    ) -> Result<(), StorageError> {
        let text = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        let io_error = |source| StorageError::Io {
            path: self.path.clone(),
            source,
        };

        let mut file = fs::File::create(&tmp).map_err(io_error)?;
        file.write_all(text.as_bytes()).map_err(io_error)?;
        file.sync_all().map_err(io_error)?;
        fs::rename(&tmp, &self.path).map_err(io_error)?;

        log::trace!(
            "Wrote {} entries to {}",
            entries.len(),
            self.path.display()
        );
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        let mut updated = entries.clone();
        updated.insert(key.to_string(), value.to_string());

        self.flush(&updated)?;
        *entries = updated;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        if !entries.contains_key(key) {
            return Ok(());
        }

        let mut updated = entries.clone();
        updated.remove(key);

        self.flush(&updated)?;
        *entries = updated;
        Ok(())
    }
}
