//! Frame codec for the marker-delimited, checksummed LoComm wire format.
//!
//! # Frame Format
//!
//! All multi-byte fields are big-endian.
//!
//! ```text
//! offset 0   : 2 bytes  start marker     (0x12 0x34)
//! offset 2   : 2 bytes  total length     (whole frame, markers included)
//! offset 4   : 4 bytes  message type     (ASCII, e.g. "PASS")
//! offset 8   : 4 bytes  correlation tag  (opaque, echoed in reply)
//! offset 12  : N bytes  payload
//! offset 12+N: 2 bytes  checksum         (CRC-16 over bytes [2 .. 12+N))
//! offset 14+N: 2 bytes  end marker       (0x56 0x78)
//! ```
//!
//! A frame must arrive as one complete read; there is no reassembly here.

use std::fmt;

use crate::error::{ProtocolError, Result};

/// Start marker, first two bytes of every frame.
pub const START_MARKER: u16 = 0x1234;

/// End marker, last two bytes of every frame.
pub const END_MARKER: u16 = 0x5678;

/// Bytes before the payload: marker + length + type + tag.
pub const FRAME_HEADER_SIZE: usize = 12;

/// Bytes after the payload: checksum + marker.
pub const FRAME_TRAILER_SIZE: usize = 4;

/// Size of a frame with an empty payload.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + FRAME_TRAILER_SIZE;

/// Maximum frame size accepted on either channel.
pub const MAX_FRAME_SIZE: usize = 1056;

/// Largest payload that fits in a frame of `MAX_FRAME_SIZE`.
pub const MAX_PAYLOAD_SIZE: usize = MAX_FRAME_SIZE - FRAME_OVERHEAD;

/// CRC-16 with polynomial 0x1021, initial value 0, MSB first, no final XOR.
///
/// This is the checksum existing peers compute, so it must not change.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0x0000;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// The 4-byte ASCII message type carried at offset 4.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeCode(pub [u8; 4]);

impl TypeCode {
    /// Creates a type code from raw bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeCode(\"{}\")", self)
    }
}

/// Opaque 4-byte value copied from a request into its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CorrelationTag(pub [u8; 4]);

impl CorrelationTag {
    /// Creates a correlation tag from raw bytes.
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Creates a correlation tag from a big-endian integer.
    pub fn from_u32(value: u32) -> Self {
        Self(value.to_be_bytes())
    }

    /// Returns the tag as a big-endian integer.
    pub fn as_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl fmt::Display for CorrelationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.as_u32())
    }
}

/// A validated, read-only protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    type_code: TypeCode,
    tag: CorrelationTag,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame.
    pub fn new(type_code: TypeCode, tag: CorrelationTag, payload: Vec<u8>) -> Self {
        Self {
            type_code,
            tag,
            payload,
        }
    }

    /// The 4-byte message type.
    pub fn type_code(&self) -> TypeCode {
        self.type_code
    }

    /// The correlation tag.
    pub fn tag(&self) -> CorrelationTag {
        self.tag
    }

    /// The type-specific payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total encoded size of this frame.
    pub fn encoded_len(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }

    /// Consumes the frame and returns its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// Encoder and decoder for frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Largest frame this codec will produce or accept.
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a codec limited to `MAX_FRAME_SIZE`.
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with a custom size limit.
    ///
    /// The limit is clamped to what the 16-bit length field can express.
    pub fn with_max_frame_size(max: usize) -> Self {
        Self {
            max_frame_size: max.clamp(FRAME_OVERHEAD, u16::MAX as usize),
        }
    }

    /// The largest frame this codec accepts.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a frame into bytes.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        self.encode_parts(frame.type_code, frame.tag, &frame.payload)
    }

    /// Encode a frame from its parts without building a `Frame` first.
    pub fn encode_parts(
        &self,
        type_code: TypeCode,
        tag: CorrelationTag,
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        let total = FRAME_OVERHEAD + payload.len();
        if total > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: total,
                max: self.max_frame_size,
            });
        }

        let mut output = Vec::with_capacity(total);
        output.extend_from_slice(&START_MARKER.to_be_bytes());
        output.extend_from_slice(&(total as u16).to_be_bytes());
        output.extend_from_slice(type_code.as_bytes());
        output.extend_from_slice(&tag.0);
        output.extend_from_slice(payload);

        let crc = crc16(&output[2..]);
        output.extend_from_slice(&crc.to_be_bytes());
        output.extend_from_slice(&END_MARKER.to_be_bytes());

        Ok(output)
    }

    /// Decode and validate one complete frame.
    ///
    /// Checks, in order: minimum size, start marker, declared length against
    /// the bytes supplied, checksum, end marker.
    pub fn decode(&self, data: &[u8]) -> Result<Frame> {
        if data.len() < FRAME_OVERHEAD {
            return Err(ProtocolError::Truncated {
                need: FRAME_OVERHEAD,
                have: data.len(),
            });
        }

        if data.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: data.len(),
                max: self.max_frame_size,
            });
        }

        let start = u16::from_be_bytes([data[0], data[1]]);
        if start != START_MARKER {
            return Err(ProtocolError::BadMarker {
                expected: START_MARKER,
                got: start,
            });
        }

        let declared = u16::from_be_bytes([data[2], data[3]]) as usize;
        if declared != data.len() {
            return Err(ProtocolError::LengthMismatch {
                declared,
                actual: data.len(),
            });
        }

        let crc_offset = declared - FRAME_TRAILER_SIZE;
        let received = u16::from_be_bytes([data[crc_offset], data[crc_offset + 1]]);
        let computed = crc16(&data[2..crc_offset]);
        if received != computed {
            return Err(ProtocolError::ChecksumMismatch { received, computed });
        }

        let end = u16::from_be_bytes([data[declared - 2], data[declared - 1]]);
        if end != END_MARKER {
            return Err(ProtocolError::BadMarker {
                expected: END_MARKER,
                got: end,
            });
        }

        let mut type_code = [0u8; 4];
        type_code.copy_from_slice(&data[4..8]);
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&data[8..12]);

        Ok(Frame {
            type_code: TypeCode(type_code),
            tag: CorrelationTag(tag),
            payload: data[FRAME_HEADER_SIZE..crc_offset].to_vec(),
        })
    }
}
