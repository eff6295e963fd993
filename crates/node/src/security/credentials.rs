//! Persisted credential record: salt, salted hash, KDF iteration count and
//! the wrapped group key.
//!
//! The record is always written as one [`StoreOp`] batch, so the store never
//! holds a salt from one password next to a blob wrapped under another.

use protocol::crypto::{hash_password, DEFAULT_PBKDF2_ITERATIONS, PASSWORD_HASH_LEN, SALT_LEN};
use protocol::{PasswordHash, Salt, WRAPPED_KEY_LEN};
use rand::{CryptoRng, RngCore};

use super::SecurityError;
use crate::store::{
    KeyValueStore, StoreOp, KEY_HASH, KEY_KDF_ITERATIONS, KEY_SALT, KEY_WRAPPED_GROUP_KEY,
};

/// Salt, salted hash and KDF cost of the current password.
#[derive(Debug, Clone, Copy)]
pub struct CredentialRecord {
    /// Random per-password salt.
    pub salt: Salt,
    /// `SHA-256(salt ++ password)`.
    pub hash: PasswordHash,
    /// PBKDF2 iterations the wrapping key is derived with.
    pub iterations: u32,
}

impl CredentialRecord {
    /// Build a record for `password` under a fresh salt.
    pub fn create<R: RngCore + CryptoRng + ?Sized>(
        password: &[u8],
        iterations: u32,
        rng: &mut R,
    ) -> Self {
        let salt = Salt::generate(rng);
        Self {
            salt,
            hash: hash_password(password, &salt),
            iterations,
        }
    }

    /// Whether `password` matches this record. Constant time in the hash.
    pub fn verify(&self, password: &[u8]) -> bool {
        self.hash.matches(&hash_password(password, &self.salt))
    }

    /// Read the record, `None` if the node was never provisioned.
    pub fn load<S: KeyValueStore + ?Sized>(store: &S) -> Result<Option<Self>, SecurityError> {
        let salt = store.get(KEY_SALT)?;
        let hash = store.get(KEY_HASH)?;
        match (salt, hash) {
            (None, None) => Ok(None),
            (Some(salt), Some(hash)) => {
                let salt = Salt::from_slice(&salt).ok_or_else(|| {
                    SecurityError::CorruptStore(format!(
                        "salt is {} bytes, expected {}",
                        salt.len(),
                        SALT_LEN
                    ))
                })?;
                let hash = PasswordHash::from_slice(&hash).ok_or_else(|| {
                    SecurityError::CorruptStore(format!(
                        "hash is {} bytes, expected {}",
                        hash.len(),
                        PASSWORD_HASH_LEN
                    ))
                })?;
                Ok(Some(Self {
                    salt,
                    hash,
                    iterations: load_iterations(store)?,
                }))
            }
            _ => Err(SecurityError::CorruptStore(
                "salt and hash must be stored together".to_string(),
            )),
        }
    }

    /// Persist the record together with `wrapped`, the group key blob
    /// sealed under this password. `None` deletes any stored blob.
    pub fn save<S: KeyValueStore + ?Sized>(
        &self,
        store: &mut S,
        wrapped: Option<&[u8]>,
    ) -> Result<(), SecurityError> {
        let iterations = self.iterations.to_be_bytes();
        let blob = match wrapped {
            Some(blob) => StoreOp::Put(KEY_WRAPPED_GROUP_KEY, blob),
            None => StoreOp::Remove(KEY_WRAPPED_GROUP_KEY),
        };
        store.apply(&[
            StoreOp::Put(KEY_SALT, self.salt.as_bytes()),
            StoreOp::Put(KEY_HASH, self.hash.as_bytes()),
            StoreOp::Put(KEY_KDF_ITERATIONS, &iterations),
            blob,
        ])?;
        Ok(())
    }
}

/// Records written before the count was stored used the default.
fn load_iterations<S: KeyValueStore + ?Sized>(store: &S) -> Result<u32, SecurityError> {
    let Some(bytes) = store.get(KEY_KDF_ITERATIONS)? else {
        return Ok(DEFAULT_PBKDF2_ITERATIONS);
    };
    let bytes: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
        SecurityError::CorruptStore(format!(
            "kdf iteration count is {} bytes, expected 4",
            bytes.len()
        ))
    })?;
    match u32::from_be_bytes(bytes) {
        0 => Err(SecurityError::CorruptStore(
            "kdf iteration count is zero".to_string(),
        )),
        n => Ok(n),
    }
}

/// Read the wrapped group key blob, `None` when unpaired.
pub fn load_wrapped_key<S: KeyValueStore + ?Sized>(
    store: &S,
) -> Result<Option<Vec<u8>>, SecurityError> {
    match store.get(KEY_WRAPPED_GROUP_KEY)? {
        Some(blob) if blob.len() != WRAPPED_KEY_LEN => Err(SecurityError::CorruptStore(format!(
            "wrapped group key is {} bytes, expected {}",
            blob.len(),
            WRAPPED_KEY_LEN
        ))),
        other => Ok(other),
    }
}

/// Persist a wrapped group key blob.
pub fn save_wrapped_key<S: KeyValueStore + ?Sized>(
    store: &mut S,
    blob: &[u8],
) -> Result<(), SecurityError> {
    store.put(KEY_WRAPPED_GROUP_KEY, blob)?;
    Ok(())
}

/// Delete the wrapped group key blob.
pub fn remove_wrapped_key<S: KeyValueStore + ?Sized>(store: &mut S) -> Result<(), SecurityError> {
    store.remove(KEY_WRAPPED_GROUP_KEY)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_record_verify() {
        let mut rng = StdRng::seed_from_u64(1);
        let record = CredentialRecord::create(b"password", 2, &mut rng);
        assert!(record.verify(b"password"));
        assert!(!record.verify(b"password "));
        assert!(!record.verify(b""));
    }

    #[test]
    fn test_record_save_and_load() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut store = MemoryStore::new();
        assert!(CredentialRecord::load(&store).unwrap().is_none());

        let record = CredentialRecord::create(b"hunter2", 25_000, &mut rng);
        record.save(&mut store, None).unwrap();

        let loaded = CredentialRecord::load(&store).unwrap().unwrap();
        assert_eq!(loaded.salt, record.salt);
        assert_eq!(loaded.iterations, 25_000);
        assert!(loaded.verify(b"hunter2"));
    }

    #[test]
    fn test_record_save_replaces_or_clears_blob() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut store = MemoryStore::new();
        let record = CredentialRecord::create(b"hunter2", 2, &mut rng);

        record
            .save(&mut store, Some(&[9u8; WRAPPED_KEY_LEN][..]))
            .unwrap();
        assert_eq!(
            load_wrapped_key(&store).unwrap(),
            Some(vec![9u8; WRAPPED_KEY_LEN])
        );

        record.save(&mut store, None).unwrap();
        assert!(load_wrapped_key(&store).unwrap().is_none());
        assert!(CredentialRecord::load(&store).unwrap().is_some());
    }

    #[test]
    fn test_record_save_failure_keeps_previous_record() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut store = MemoryStore::new();
        let first = CredentialRecord::create(b"first", 2, &mut rng);
        first.save(&mut store, Some(&[1u8; WRAPPED_KEY_LEN][..])).unwrap();

        store.set_fail_writes(true);
        let second = CredentialRecord::create(b"second", 3, &mut rng);
        assert!(matches!(
            second.save(&mut store, Some(&[2u8; WRAPPED_KEY_LEN][..])),
            Err(SecurityError::Store(_))
        ));

        let loaded = CredentialRecord::load(&store).unwrap().unwrap();
        assert!(loaded.verify(b"first"));
        assert_eq!(loaded.iterations, 2);
        assert_eq!(
            load_wrapped_key(&store).unwrap(),
            Some(vec![1u8; WRAPPED_KEY_LEN])
        );
    }

    #[test]
    fn test_record_without_iterations_uses_default() {
        let mut store = MemoryStore::new();
        store.put(KEY_SALT, &[0u8; 16]).unwrap();
        store.put(KEY_HASH, &[0u8; 32]).unwrap();
        let loaded = CredentialRecord::load(&store).unwrap().unwrap();
        assert_eq!(loaded.iterations, DEFAULT_PBKDF2_ITERATIONS);
    }

    #[test]
    fn test_record_rejects_bad_iterations() {
        let mut store = MemoryStore::new();
        store.put(KEY_SALT, &[0u8; 16]).unwrap();
        store.put(KEY_HASH, &[0u8; 32]).unwrap();

        store.put(KEY_KDF_ITERATIONS, &[0u8; 4]).unwrap();
        assert!(matches!(
            CredentialRecord::load(&store),
            Err(SecurityError::CorruptStore(_))
        ));

        store.put(KEY_KDF_ITERATIONS, &[1u8; 3]).unwrap();
        assert!(matches!(
            CredentialRecord::load(&store),
            Err(SecurityError::CorruptStore(_))
        ));
    }

    #[test]
    fn test_record_load_rejects_bad_lengths() {
        let mut store = MemoryStore::new();
        store.put(KEY_SALT, &[0u8; 15]).unwrap();
        store.put(KEY_HASH, &[0u8; 32]).unwrap();
        assert!(matches!(
            CredentialRecord::load(&store),
            Err(SecurityError::CorruptStore(_))
        ));

        store.put(KEY_SALT, &[0u8; 16]).unwrap();
        store.put(KEY_HASH, &[0u8; 31]).unwrap();
        assert!(matches!(
            CredentialRecord::load(&store),
            Err(SecurityError::CorruptStore(_))
        ));
    }

    #[test]
    fn test_record_load_rejects_half_record() {
        let mut store = MemoryStore::new();
        store.put(KEY_SALT, &[0u8; 16]).unwrap();
        assert!(matches!(
            CredentialRecord::load(&store),
            Err(SecurityError::CorruptStore(_))
        ));
    }

    #[test]
    fn test_wrapped_key_storage() {
        let mut store = MemoryStore::new();
        assert!(load_wrapped_key(&store).unwrap().is_none());

        save_wrapped_key(&mut store, &[7u8; WRAPPED_KEY_LEN]).unwrap();
        assert_eq!(
            load_wrapped_key(&store).unwrap(),
            Some(vec![7u8; WRAPPED_KEY_LEN])
        );

        remove_wrapped_key(&mut store).unwrap();
        assert!(load_wrapped_key(&store).unwrap().is_none());
    }

    #[test]
    fn test_wrapped_key_wrong_length_is_corrupt() {
        let mut store = MemoryStore::new();
        // The 32-byte layout without a stored nonce is rejected.
        save_wrapped_key(&mut store, &[7u8; 32]).unwrap();
        assert!(matches!(
            load_wrapped_key(&store),
            Err(SecurityError::CorruptStore(_))
        ));
    }
}
