//! Key-value store adapter.
//!
//! The recorder writes into and the view reads from anything implementing [`Store`].
//! Two implementations are provided:
//!
//! - **`MemoryStore`**: an ordered in-memory map, serializable as a whole to a JSON
//!   file with [`MemoryStore::save_json`] / [`MemoryStore::load_json`].
//! - **`FileStore`**: a `MemoryStore` bound to a path, written through to disk on
//!   every `set`. This is the store used for "save on every edit".
//!
//! The on-disk layout is plain JSON; arrays use the `ndarray` serde encoding.

use anyhow::{Context, Result};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{LoopError, LoopResult};

/// A value held by a store: an array or a nested group of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreValue {
    /// A numeric array; scalars are 0-d arrays.
    Array(ArrayD<f64>),
    /// A nested mapping of string keys to values.
    Group(BTreeMap<String, StoreValue>),
}

impl StoreValue {
    /// Returns the array if this value is one.
    pub fn as_array(&self) -> Option<&ArrayD<f64>> {
        match self {
            StoreValue::Array(array) => Some(array),
            StoreValue::Group(_) => None,
        }
    }

    /// Returns the group if this value is one.
    pub fn as_group(&self) -> Option<&BTreeMap<String, StoreValue>> {
        match self {
            StoreValue::Group(group) => Some(group),
            StoreValue::Array(_) => None,
        }
    }
}

impl From<ArrayD<f64>> for StoreValue {
    fn from(value: ArrayD<f64>) -> Self {
        StoreValue::Array(value)
    }
}

/// Minimal surface the loop core needs from a key-value store.
///
/// `set` overwrites any previous value under the same key.
pub trait Store {
    /// Looks up a value.
    fn get(&self, key: &str) -> Option<&StoreValue>;

    /// Stores a value, replacing any previous one.
    fn set(&mut self, key: &str, value: StoreValue) -> LoopResult<()>;

    /// Lists stored keys in order.
    fn keys(&self) -> Vec<String>;
}

/// Ordered in-memory store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStore {
    entries: BTreeMap<String, StoreValue>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of top-level keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Save the whole store to a JSON file, creating parent directories.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize store")?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).context("Failed to create store directory")?;
        }

        fs::write(&path, json)
            .with_context(|| format!("Failed to write store to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load a store previously written by [`MemoryStore::save_json`].
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read store from {:?}", path.as_ref()))?;

        let store = serde_json::from_str(&json).context("Failed to deserialize store")?;

        Ok(store)
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Option<&StoreValue> {
        self.entries.get(key)
    }

    fn set(&mut self, key: &str, value: StoreValue) -> LoopResult<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// A store persisted to a JSON file after every write.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl FileStore {
    /// Opens the file at `path`, starting empty if it does not exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let inner = if path.exists() {
            MemoryStore::load_json(&path)?
        } else {
            MemoryStore::new()
        };
        tracing::debug!("Opened store at {:?} with {} keys", path, inner.len());
        Ok(Self { path, inner })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the current contents to disk.
    pub fn flush(&self) -> Result<()> {
        self.inner.save_json(&self.path)
    }
}

impl Store for FileStore {
    fn get(&self, key: &str) -> Option<&StoreValue> {
        self.inner.get(key)
    }

    fn set(&mut self, key: &str, value: StoreValue) -> LoopResult<()> {
        self.inner.set(key, value)?;
        self.flush()
            .map_err(|e| LoopError::Store(format!("{e:#}")))
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }
}
