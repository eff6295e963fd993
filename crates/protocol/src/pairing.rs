//! Printable pairing codes for manual group-key transcription.
//!
//! A 16-byte group key is rendered as 20 characters from the Z85 alphabet:
//! each 4-byte big-endian word becomes 5 base-85 digits, most significant
//! first.

use std::fmt;
use std::str::FromStr;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{GroupKey, GROUP_KEY_LEN};
use crate::error::{ProtocolError, Result};

/// Number of characters in a pairing code.
pub const PAIRING_CODE_LEN: usize = GROUP_KEY_LEN / 4 * 5;

/// The Z85 alphabet.
pub const ALPHABET: &[u8; 85] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ.-:+=^!/*?&<>()[]{}@%$#";

fn digit_value(c: u8) -> Option<u32> {
    ALPHABET.iter().position(|&a| a == c).map(|i| i as u32)
}

/// A validated 20-character pairing code.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PairingCode([u8; PAIRING_CODE_LEN]);

impl PairingCode {
    /// Encode a group key.
    pub fn encode(key: &GroupKey) -> Self {
        let mut out = [0u8; PAIRING_CODE_LEN];
        for (word, chunk) in key.as_bytes().chunks_exact(4).zip(out.chunks_exact_mut(5)) {
            let mut value = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
            for slot in chunk.iter_mut().rev() {
                *slot = ALPHABET[(value % 85) as usize];
                value /= 85;
            }
        }
        Self(out)
    }

    /// Validate raw bytes as a pairing code.
    ///
    /// Rejects the wrong length, characters outside the alphabet, and groups
    /// whose value does not fit in 32 bits.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() != PAIRING_CODE_LEN {
            return Err(ProtocolError::InvalidPairingCode(format!(
                "expected {} characters, got {}",
                PAIRING_CODE_LEN,
                raw.len()
            )));
        }
        for (index, group) in raw.chunks_exact(5).enumerate() {
            let mut value: u64 = 0;
            for &c in group {
                let digit = digit_value(c).ok_or_else(|| {
                    ProtocolError::InvalidPairingCode(format!(
                        "character {:#04x} is outside the alphabet",
                        c
                    ))
                })?;
                value = value * 85 + u64::from(digit);
            }
            if value > u64::from(u32::MAX) {
                return Err(ProtocolError::InvalidPairingCode(format!(
                    "group {} overflows 32 bits",
                    index
                )));
            }
        }
        let mut out = [0u8; PAIRING_CODE_LEN];
        out.copy_from_slice(raw);
        Ok(Self(out))
    }

    /// Decode back into the group key.
    pub fn to_group_key(&self) -> GroupKey {
        let mut bytes = [0u8; GROUP_KEY_LEN];
        for (group, word) in self.0.chunks_exact(5).zip(bytes.chunks_exact_mut(4)) {
            // Validated in `parse`/`encode`, so every digit is known and fits.
            let value = group.iter().fold(0u32, |acc, &c| {
                acc.wrapping_mul(85)
                    .wrapping_add(digit_value(c).unwrap_or(0))
            });
            word.copy_from_slice(&value.to_be_bytes());
        }
        let key = GroupKey::from_bytes(bytes);
        bytes.zeroize();
        key
    }

    /// The code as ASCII bytes.
    pub fn as_bytes(&self) -> &[u8; PAIRING_CODE_LEN] {
        &self.0
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        // The alphabet is pure ASCII.
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl FromStr for PairingCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s.as_bytes())
    }
}

impl fmt::Display for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PairingCode").field(&"[REDACTED]").finish()
    }
}
