//! Cryptographic primitives for LoComm nodes.
//!
//! This module provides the salted password hash, PBKDF2 wrapping key
//! derivation, group-key wrapping at rest, and the device-to-device (D2D)
//! authenticated encryption used on the radio link.
//!
//! Every function that needs randomness takes the RNG as a parameter so that
//! production code can pass `OsRng` and tests can pass a seeded generator.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ProtocolError, Result};

/// Length of the password salt in bytes.
pub const SALT_LEN: usize = 16;

/// Length of the salted password hash (SHA-256 output).
pub const PASSWORD_HASH_LEN: usize = 32;

/// Length of the password-derived wrapping key.
pub const WRAPPING_KEY_LEN: usize = 32;

/// Length of the shared group key.
pub const GROUP_KEY_LEN: usize = 16;

/// Length of an AES-GCM nonce.
pub const NONCE_LEN: usize = 12;

/// Length of an AES-GCM authentication tag.
pub const TAG_LEN: usize = 16;

/// Bytes added by [`seal`]: nonce plus tag.
pub const D2D_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Length of a wrapped group key blob: nonce, ciphertext, tag.
pub const WRAPPED_KEY_LEN: usize = NONCE_LEN + GROUP_KEY_LEN + TAG_LEN;

/// Default PBKDF2 iteration count.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 10_000;

/// Lowest accepted PBKDF2 iteration count for production configuration.
pub const MIN_PBKDF2_ITERATIONS: u32 = 10_000;

/// Associated data bound to every wrapped group key.
const WRAP_AAD: &[u8] = b"locomm-group-key-v1";

/// A random password salt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Salt(pub [u8; SALT_LEN]);

impl Salt {
    /// Draw a fresh salt from `rng`.
    pub fn generate<R: RngCore + CryptoRng + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; SALT_LEN];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Build a salt from a stored slice, `None` if the length is wrong.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LEN] {
        &self.0
    }
}

/// `SHA-256(salt ++ password)`.
#[derive(Clone, Copy)]
pub struct PasswordHash(pub [u8; PASSWORD_HASH_LEN]);

impl PasswordHash {
    /// Build a hash from a stored slice, `None` if the length is wrong.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; PASSWORD_HASH_LEN] {
        &self.0
    }

    /// Constant-time comparison.
    pub fn matches(&self, other: &PasswordHash) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PasswordHash").field(&"[REDACTED]").finish()
    }
}

/// Compute the salted password hash.
pub fn hash_password(password: &[u8], salt: &Salt) -> PasswordHash {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password);
    PasswordHash(hasher.finalize().into())
}

/// Key derived from the user password; only ever used to wrap the group key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WrappingKey([u8; WRAPPING_KEY_LEN]);

impl WrappingKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; WRAPPING_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for WrappingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WrappingKey").field(&"[REDACTED]").finish()
    }
}

/// Derive the wrapping key with PBKDF2-HMAC-SHA256.
pub fn derive_wrapping_key(password: &[u8], salt: &Salt, iterations: u32) -> Result<WrappingKey> {
    if iterations == 0 {
        return Err(ProtocolError::KeyDerivation(
            "iteration count must be non-zero".to_string(),
        ));
    }
    let mut key = [0u8; WRAPPING_KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt.as_bytes(), iterations, &mut key);
    let wrapping = WrappingKey(key);
    key.zeroize();
    Ok(wrapping)
}

/// Shared symmetric key for D2D traffic.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct GroupKey([u8; GROUP_KEY_LEN]);

impl GroupKey {
    /// Draw a fresh group key from `rng`.
    pub fn generate<R: RngCore + CryptoRng + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; GROUP_KEY_LEN];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap existing key bytes.
    pub fn from_bytes(bytes: [u8; GROUP_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; GROUP_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("GroupKey").field(&"[REDACTED]").finish()
    }
}

/// Encrypt the group key under the wrapping key for storage.
///
/// Output is `nonce(12) ++ ciphertext(16) ++ tag(16)` with a fresh random
/// nonce on every call.
pub fn wrap_group_key<R: RngCore + CryptoRng + ?Sized>(
    wrapping: &WrappingKey,
    group: &GroupKey,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(wrapping.as_bytes())
        .map_err(|e| ProtocolError::Encryption(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload {
                msg: group.as_bytes(),
                aad: WRAP_AAD,
            },
        )
        .map_err(|e| ProtocolError::Encryption(e.to_string()))?;

    let mut blob = Vec::with_capacity(WRAPPED_KEY_LEN);
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a stored group key blob.
///
/// Any length or authentication mismatch yields [`ProtocolError::Decryption`].
pub fn unwrap_group_key(wrapping: &WrappingKey, blob: &[u8]) -> Result<GroupKey> {
    if blob.len() != WRAPPED_KEY_LEN {
        return Err(ProtocolError::Decryption);
    }
    let cipher =
        Aes256Gcm::new_from_slice(wrapping.as_bytes()).map_err(|_| ProtocolError::Decryption)?;
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

    let mut plaintext = cipher.decrypt(
        Nonce::from_slice(nonce),
        Payload {
            msg: ciphertext,
            aad: WRAP_AAD,
        },
    )?;

    let key = <[u8; GROUP_KEY_LEN]>::try_from(plaintext.as_slice())
        .map(GroupKey)
        .map_err(|_| ProtocolError::Decryption);
    plaintext.zeroize();
    key
}

/// Encrypt a D2D message: `nonce(12) ++ ciphertext ++ tag(16)`.
pub fn seal<R: RngCore + CryptoRng + ?Sized>(
    key: &GroupKey,
    plaintext: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>> {
    let cipher = Aes128Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| ProtocolError::Encryption(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|e| ProtocolError::Encryption(e.to_string()))?;

    let mut out = Vec::with_capacity(plaintext.len() + D2D_OVERHEAD);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a D2D message produced by [`seal`].
///
/// Fails closed: no plaintext is returned on any length or tag mismatch.
pub fn open(key: &GroupKey, framed: &[u8]) -> Result<Vec<u8>> {
    if framed.len() < D2D_OVERHEAD {
        return Err(ProtocolError::Decryption);
    }
    let cipher =
        Aes128Gcm::new_from_slice(key.as_bytes()).map_err(|_| ProtocolError::Decryption)?;
    let (nonce, ciphertext) = framed.split_at(NONCE_LEN);
    Ok(cipher.decrypt(Nonce::from_slice(nonce), ciphertext)?)
}
