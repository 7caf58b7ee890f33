//! API key storage.
//!
//! The gateway only ever asks "is this key valid?"; how keys are kept is
//! the store's business. Two stores ship with the crate: an in-memory set
//! and a JSON file holding a plain array of key strings.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dashmap::DashSet;
use thiserror::Error;

/// Errors raised by key stores.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("key store at {path} is not a JSON array of strings: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Backing store for API keys.
pub trait KeyStore: Send + Sync {
    /// True if `key` is a known key.
    fn is_valid_key(&self, key: &str) -> bool;

    /// Add a key. Returns `false` if it was already present.
    fn add_key(&self, key: &str) -> Result<bool, KeyStoreError>;

    /// Remove a key. Returns `false` if it was not present.
    fn remove_key(&self, key: &str) -> Result<bool, KeyStoreError>;

    /// All keys, sorted.
    fn list_keys(&self) -> Vec<String>;
}

/// Keys held in memory only.
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: DashSet<String>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        for key in keys {
            store.keys.insert(key.into());
        }
        store
    }
}

impl KeyStore for MemoryKeyStore {
    fn is_valid_key(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    fn add_key(&self, key: &str) -> Result<bool, KeyStoreError> {
        Ok(self.keys.insert(key.to_string()))
    }

    fn remove_key(&self, key: &str) -> Result<bool, KeyStoreError> {
        Ok(self.keys.remove(key).is_some())
    }

    fn list_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys.iter().map(|k| k.key().clone()).collect();
        keys.sort();
        keys
    }
}

/// Keys served from memory and persisted to a JSON file on every change.
#[derive(Debug)]
pub struct FileKeyStore {
    path: PathBuf,
    keys: DashSet<String>,
    /// Serialises mutations so the file always reflects the latest set.
    write_lock: Mutex<()>,
}

impl FileKeyStore {
    /// Open the store, loading existing keys if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KeyStoreError> {
        let path = path.as_ref().to_path_buf();
        let keys = DashSet::new();

        if path.exists() {
            let file = File::open(&path).map_err(|source| KeyStoreError::Io {
                path: path.clone(),
                source,
            })?;
            let list: Vec<String> =
                serde_json::from_reader(BufReader::new(file)).map_err(|source| KeyStoreError::Parse {
                    path: path.clone(),
                    source,
                })?;
            for key in list {
                keys.insert(key);
            }
            tracing::info!(path = %path.display(), count = keys.len(), "Loaded API keys");
        }

        Ok(Self {
            path,
            keys,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `keys` to disk. Callers hold `write_lock`.
    fn persist(&self, keys: &[String]) -> Result<(), KeyStoreError> {
        let file = File::create(&self.path).map_err(|source| KeyStoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        serde_json::to_writer(BufWriter::new(file), keys).map_err(|source| KeyStoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }

    /// The sorted key list with `key` added or removed.
    fn next_keys(&self, key: &str, present: bool) -> Vec<String> {
        let mut keys: Vec<String> = self
            .keys
            .iter()
            .map(|k| k.key().clone())
            .filter(|k| k != key)
            .collect();
        if present {
            keys.push(key.to_string());
        }
        keys.sort();
        keys
    }
}

impl KeyStore for FileKeyStore {
    fn is_valid_key(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    // Memory changes only after the file write succeeds, so a failed write
    // leaves both sides as they were.
    fn add_key(&self, key: &str) -> Result<bool, KeyStoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.keys.contains(key) {
            return Ok(false);
        }
        self.persist(&self.next_keys(key, true))?;
        self.keys.insert(key.to_string());
        Ok(true)
    }

    fn remove_key(&self, key: &str) -> Result<bool, KeyStoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if !self.keys.contains(key) {
            return Ok(false);
        }
        self.persist(&self.next_keys(key, false))?;
        self.keys.remove(key);
        Ok(true)
    }

    fn list_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys.iter().map(|k| k.key().clone()).collect();
        keys.sort();
        keys
    }
}
