//! JSON-file backed key-value store.
//!
//! Values are base64 encoded and the whole namespace is rewritten on every
//! mutation using a temp file and rename, so a crash mid-write leaves the
//! previous contents intact.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{KeyValueStore, StoreOp};

/// Current on-disk format version.
const STORE_VERSION: u32 = 1;

/// On-disk representation of one namespace.
#[derive(Debug, Serialize, Deserialize)]
struct StoreData {
    /// Version of the store format (for future migrations).
    version: u32,
    /// Namespace the file belongs to.
    namespace: String,
    /// Base64-encoded values keyed by name.
    values: BTreeMap<String, String>,
}

/// Key-value store persisted to `<dir>/<namespace>.json`.
#[derive(Debug)]
pub struct FileStore {
    namespace: String,
    path: PathBuf,
    values: BTreeMap<String, Vec<u8>>,
}

impl FileStore {
    /// Open (or create on first write) the store for `namespace` in `dir`.
    ///
    /// An existing file is loaded immediately; a missing one starts empty.
    pub fn open<P: AsRef<Path>>(dir: P, namespace: &str) -> Result<Self> {
        let path = dir.as_ref().join(format!("{}.json", namespace));
        let mut store = Self {
            namespace: namespace.to_string(),
            path,
            values: BTreeMap::new(),
        };
        store.load()?;
        Ok(store)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&mut self) -> Result<()> {
        if !self.path.exists() {
            tracing::debug!(
                "Store file not found at {:?}, starting empty",
                self.path
            );
            return Ok(());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read store: {}", self.path.display()))?;

        let data: StoreData = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse store: {}", self.path.display()))?;

        if data.namespace != self.namespace {
            anyhow::bail!(
                "Store {} belongs to namespace {:?}, expected {:?}",
                self.path.display(),
                data.namespace,
                self.namespace
            );
        }

        let engine = base64::engine::general_purpose::STANDARD;
        self.values = data
            .values
            .into_iter()
            .map(|(key, encoded)| {
                engine
                    .decode(&encoded)
                    .map(|bytes| (key.clone(), bytes))
                    .with_context(|| format!("Invalid base64 for store key {:?}", key))
            })
            .collect::<Result<_>>()?;

        tracing::debug!(
            namespace = %self.namespace,
            keys = self.values.len(),
            "Loaded store from {:?}",
            self.path
        );
        Ok(())
    }

    fn save(&self, values: &BTreeMap<String, Vec<u8>>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create store directory: {}", parent.display())
            })?;
        }

        let engine = base64::engine::general_purpose::STANDARD;
        let data = StoreData {
            version: STORE_VERSION,
            namespace: self.namespace.clone(),
            values: values
                .iter()
                .map(|(key, value)| (key.clone(), engine.encode(value)))
                .collect(),
        };

        let contents = serde_json::to_string_pretty(&data).context("Failed to serialize store")?;

        // Atomic write: write to temp file, then rename
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &contents)
            .with_context(|| format!("Failed to write temp store: {}", temp_path.display()))?;

        fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename temp store {} to {}",
                temp_path.display(),
                self.path.display()
            )
        })?;

        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.values.get(key).cloned())
    }

    fn apply(&mut self, batch: &[StoreOp<'_>]) -> Result<()> {
        // Memory only changes once the write has succeeded.
        let mut next = self.values.clone();
        for op in batch {
            match *op {
                StoreOp::Put(key, value) => {
                    next.insert(key.to_string(), value.to_vec());
                }
                StoreOp::Remove(key) => {
                    next.remove(key);
                }
            }
        }
        if next == self.values {
            return Ok(());
        }
        self.save(&next)?;
        self.values = next;
        Ok(())
    }

    fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.values.contains_key(key))
    }
}
