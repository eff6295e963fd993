//! Persistent key-value storage for node secrets and settings.
//!
//! The security module only needs a handful of operations on a flat
//! namespace of byte values, captured by [`KeyValueStore`]. Writes that must
//! land together go through [`KeyValueStore::apply`] as one batch. [`FileStore`] persists to a JSON
//! file under the node's data directory; [`MemoryStore`] keeps everything in
//! RAM for tests and throwaway nodes.

mod file_store;

use std::collections::HashMap;

use anyhow::{bail, Result};

pub use file_store::FileStore;

/// Namespace every node opens its store under.
pub const NAMESPACE: &str = "LoComm";

/// Key for the 16-byte password salt.
pub const KEY_SALT: &str = "sec_salt";
/// Key for the 32-byte salted password hash.
pub const KEY_HASH: &str = "sec_hash";
/// Key for the PBKDF2 iteration count the wrapping key was derived with.
pub const KEY_KDF_ITERATIONS: &str = "sec_kdf_iter";
/// Key for the wrapped group key blob.
pub const KEY_WRAPPED_GROUP_KEY: &str = "sec_d2d_key";
/// Key for the device name set with `SNOD`.
pub const KEY_DEVICE_NAME: &str = "device_name";

/// One mutation inside a [`KeyValueStore::apply`] batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp<'a> {
    /// Insert or replace a value.
    Put(&'a str, &'a [u8]),
    /// Delete a value if present.
    Remove(&'a str),
}

/// A flat byte-valued key-value store bound to one namespace.
pub trait KeyValueStore: Send {
    /// The namespace this store was opened under.
    fn namespace(&self) -> &str;

    /// Read a value, `None` if absent.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Apply every op in `batch`, or none of them.
    fn apply(&mut self, batch: &[StoreOp<'_>]) -> Result<()>;

    /// Insert or replace a value.
    fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.apply(&[StoreOp::Put(key, value)])
    }

    /// Delete a value. Removing an absent key is not an error.
    fn remove(&mut self, key: &str) -> Result<()> {
        self.apply(&[StoreOp::Remove(key)])
    }

    /// Whether a value exists for `key`.
    fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    namespace: String,
    values: HashMap<String, Vec<u8>>,
    write_budget: Option<usize>,
}

impl MemoryStore {
    /// Create an empty store under [`NAMESPACE`].
    pub fn new() -> Self {
        Self::with_namespace(NAMESPACE)
    }

    /// Create an empty store under a custom namespace.
    pub fn with_namespace(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            values: HashMap::new(),
            write_budget: None,
        }
    }

    /// Make every subsequent write fail, simulating an unavailable backing
    /// store.
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.write_budget = if fail { Some(0) } else { None };
    }

    /// Allow `budget` more write batches to succeed, then fail the rest.
    /// `None` lifts the limit.
    pub fn set_write_budget(&mut self, budget: Option<usize>) {
        self.write_budget = budget;
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.values.get(key).cloned())
    }

    fn apply(&mut self, batch: &[StoreOp<'_>]) -> Result<()> {
        match self.write_budget {
            Some(0) => bail!("store {} is read-only", self.namespace),
            Some(n) => self.write_budget = Some(n - 1),
            None => {}
        }
        for op in batch {
            match *op {
                StoreOp::Put(key, value) => {
                    self.values.insert(key.to_string(), value.to_vec());
                }
                StoreOp::Remove(key) => {
                    self.values.remove(key);
                }
            }
        }
        Ok(())
    }

    fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.values.contains_key(key))
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Box<S> {
    fn namespace(&self) -> &str {
        (**self).namespace()
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn apply(&mut self, batch: &[StoreOp<'_>]) -> Result<()> {
        (**self).apply(batch)
    }

    fn put(&mut self, key: &str, value: &[u8]) -> Result<()> {
        (**self).put(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn has_key(&self, key: &str) -> Result<bool> {
        (**self).has_key(key)
    }
}
