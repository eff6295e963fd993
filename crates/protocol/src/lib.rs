//! # LoComm Protocol Library
//!
//! This crate provides the wire format and cryptographic primitives shared by
//! every LoComm node and host.
//!
//! ## Overview
//!
//! - **Frame Codec**: marker-delimited frames with a CRC-16/CCITT-FALSE checksum
//! - **Message Registry**: 4-byte ASCII type codes and their acknowledgements
//! - **Payload Reader**: bounds-checked cursor over fixed-offset payloads
//! - **Crypto**: salted password hash, PBKDF2 wrapping key, group-key wrap, D2D AEAD
//! - **Pairing Codes**: 20-character Z85 rendering of the group key
//!
//! ## Frame Layout
//!
//! ```text
//! ┌────────┬────────┬──────────┬──────────┬─────────┬────────┬────────┐
//! │ 0x1234 │ length │   type   │   tag    │ payload │ CRC-16 │ 0x5678 │
//! │  2 B   │  2 B   │   4 B    │   4 B    │   N B   │  2 B   │  2 B   │
//! └────────┴────────┴──────────┴──────────┴─────────┴────────┴────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{CorrelationTag, FrameCodec, MessageType, Status};
//!
//! let codec = FrameCodec::new();
//! let tag = CorrelationTag::from_u32(0xdead_beef);
//! let bytes = codec
//!     .encode_parts(MessageType::PasswordAck.code(), tag, Status::Okay.as_bytes())
//!     .unwrap();
//!
//! let frame = codec.decode(&bytes).unwrap();
//! assert_eq!(frame.tag(), tag);
//! assert_eq!(Status::from_payload(frame.payload()), Some(Status::Okay));
//! ```
//!
//! ## Modules
//!
//! - [`framing`]: Frame codec and checksum
//! - [`messages`]: Message types, status tokens, payload parsing
//! - [`crypto`]: Password hashing, key wrapping, D2D encryption
//! - [`pairing`]: Pairing code alphabet
//! - [`error`]: Error types

pub mod crypto;
pub mod error;
pub mod framing;
pub mod messages;
pub mod pairing;

pub use crypto::{
    GroupKey, PasswordHash, Salt, WrappingKey, D2D_OVERHEAD, GROUP_KEY_LEN, SALT_LEN,
    WRAPPED_KEY_LEN,
};
pub use error::{ProtocolError, Result};
pub use framing::{
    crc16, CorrelationTag, Frame, FrameCodec, TypeCode, FRAME_OVERHEAD, MAX_FRAME_SIZE,
    MAX_PAYLOAD_SIZE,
};
pub use messages::{MessageType, PayloadReader, Status};
pub use pairing::{PairingCode, PAIRING_CODE_LEN};
