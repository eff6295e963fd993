//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    // Frame errors
    /// Start or end marker does not match the fixed constant.
    #[error("bad frame marker: expected {expected:#06x}, got {got:#06x}")]
    BadMarker {
        /// Expected marker value.
        expected: u16,
        /// Actual marker value received.
        got: u16,
    },

    /// The length field disagrees with the number of bytes received.
    #[error("length mismatch: frame declares {declared} bytes, received {actual}")]
    LengthMismatch {
        /// Length declared in the frame header.
        declared: usize,
        /// Number of bytes actually supplied.
        actual: usize,
    },

    /// The trailing checksum does not match the recomputed one.
    #[error("checksum mismatch: frame carries {received:#06x}, computed {computed:#06x}")]
    ChecksumMismatch {
        /// Checksum carried by the frame.
        received: u16,
        /// Checksum computed over the frame contents.
        computed: u16,
    },

    /// Fewer bytes than the smallest possible frame.
    #[error("truncated frame: need at least {need} bytes, have {have}")]
    Truncated {
        /// Minimum number of bytes required.
        need: usize,
        /// Number of bytes available.
        have: usize,
    },

    /// Frame exceeds maximum allowed size.
    #[error("frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    // Payload errors
    /// A payload read ran past the end of the payload.
    #[error("payload underrun: need {need} bytes, {remaining} remaining")]
    PayloadUnderrun {
        /// Bytes requested by the reader.
        need: usize,
        /// Bytes left in the payload.
        remaining: usize,
    },

    /// The 4-byte message type is not in the registry.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// A pairing code is malformed (length or alphabet).
    #[error("invalid pairing code: {0}")]
    InvalidPairingCode(String),

    // Cryptographic errors
    /// Encryption operation failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption or authentication failed. Carries no detail on purpose.
    #[error("decryption failed")]
    Decryption,

    /// Password-based key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

impl ProtocolError {
    /// Returns true for errors raised while validating a frame.
    ///
    /// These are always dropped silently by the dispatcher.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::BadMarker { .. }
                | ProtocolError::LengthMismatch { .. }
                | ProtocolError::ChecksumMismatch { .. }
                | ProtocolError::Truncated { .. }
                | ProtocolError::FrameTooLarge { .. }
        )
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<aes_gcm::Error> for ProtocolError {
    fn from(_: aes_gcm::Error) -> Self {
        ProtocolError::Decryption
    }
}
