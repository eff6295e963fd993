//! Message type registry, status tokens, and payload parsing for LoComm.
//!
//! Every request type has exactly one acknowledgement type. Payloads are raw
//! bytes at fixed offsets; [`PayloadReader`] walks them and fails closed when
//! a read would run past the end.

use crate::error::{ProtocolError, Result};
use crate::framing::TypeCode;

/// Length of a status token (`OKAY` / `FAIL`).
pub const STATUS_LEN: usize = 4;

/// Length of the zero-padded device name carried by `SNOD`.
pub const DEVICE_NAME_LEN: usize = 32;

/// Length of the peer bitmap carried by `SCAK`.
pub const PEER_BITMAP_LEN: usize = 32;

/// Node identifier used as a relay destination meaning "every peer".
pub const BROADCAST_NODE_ID: u8 = 0xff;

/// All message types known to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Connect, carries a clock-sync epoch.
    Connect,
    /// Reply to `Connect`.
    ConnectAck,
    /// Login attempt.
    Password,
    /// Reply to `Password`.
    PasswordAck,
    /// Provision (set or factory-reset) the password.
    SetPassword,
    /// Reply to `SetPassword`.
    SetPasswordAck,
    /// Authenticated password change.
    ChangePassword,
    /// Reply to `ChangePassword`.
    ChangePasswordAck,
    /// Log out and wipe session secrets.
    Disconnect,
    /// Reply to `Disconnect`.
    DisconnectAck,
    /// Relay a payload to the device channel.
    Send,
    /// Reply to `Send`.
    SendAck,
    /// Set the device name.
    SetName,
    /// Reply to `SetName`.
    SetNameAck,
    /// Import a transcribed group key.
    EnterPairingKey,
    /// Reply to `EnterPairingKey`.
    EnterPairingKeyAck,
    /// Enumerate known peer IDs.
    Scan,
    /// Reply to `Scan`.
    ScanAck,
    /// Export the current group key for display.
    GetPairingKey,
    /// Reply to `GetPairingKey`.
    GetPairingKeyAck,
    /// Generate a fresh group key.
    NewPairingKey,
    /// Reply to `NewPairingKey`.
    NewPairingKeyAck,
    /// Forget the group key.
    ResetPairing,
    /// Reply to `ResetPairing`.
    ResetPairingAck,
    /// Payload received from a peer, forwarded to the computer.
    Receive,
    /// Generic failure reply for unrecognised requests.
    Fail,
}

/// Static mapping between message types and their wire codes.
const REGISTRY: &[(MessageType, [u8; 4])] = &[
    (MessageType::Connect, *b"CONN"),
    (MessageType::ConnectAck, *b"CACK"),
    (MessageType::Password, *b"PASS"),
    (MessageType::PasswordAck, *b"PWAK"),
    (MessageType::SetPassword, *b"STPW"),
    (MessageType::SetPasswordAck, *b"SPAK"),
    (MessageType::ChangePassword, *b"CHPW"),
    (MessageType::ChangePasswordAck, *b"CPAK"),
    (MessageType::Disconnect, *b"DCON"),
    (MessageType::DisconnectAck, *b"DCAK"),
    (MessageType::Send, *b"SEND"),
    (MessageType::SendAck, *b"SACK"),
    (MessageType::SetName, *b"SNOD"),
    (MessageType::SetNameAck, *b"SNAK"),
    (MessageType::EnterPairingKey, *b"EPAR"),
    (MessageType::EnterPairingKeyAck, *b"EPAK"),
    (MessageType::Scan, *b"SCAN"),
    (MessageType::ScanAck, *b"SCAK"),
    (MessageType::GetPairingKey, *b"GPKY"),
    (MessageType::GetPairingKeyAck, *b"GPAK"),
    (MessageType::NewPairingKey, *b"NKEY"),
    (MessageType::NewPairingKeyAck, *b"NKAK"),
    (MessageType::ResetPairing, *b"RSPR"),
    (MessageType::ResetPairingAck, *b"RPAK"),
    (MessageType::Receive, *b"RECV"),
    (MessageType::Fail, *b"FAIL"),
];

impl MessageType {
    /// The 4-byte wire code for this type.
    pub fn code(self) -> TypeCode {
        REGISTRY
            .iter()
            .find(|(ty, _)| *ty == self)
            .map(|(_, code)| TypeCode::new(*code))
            .unwrap_or(TypeCode::new(*b"FAIL"))
    }

    /// Look up a message type by its wire code.
    pub fn from_code(code: TypeCode) -> Option<Self> {
        REGISTRY
            .iter()
            .find(|(_, c)| c == code.as_bytes())
            .map(|(ty, _)| *ty)
    }

    /// Like [`MessageType::from_code`] but returns an error for unknown codes.
    pub fn try_from_code(code: TypeCode) -> Result<Self> {
        Self::from_code(code).ok_or_else(|| ProtocolError::UnknownMessageType(code.to_string()))
    }

    /// The acknowledgement type for a request, `None` for non-requests.
    pub fn ack(self) -> Option<Self> {
        use MessageType::*;
        match self {
            Connect => Some(ConnectAck),
            Password => Some(PasswordAck),
            SetPassword => Some(SetPasswordAck),
            ChangePassword => Some(ChangePasswordAck),
            Disconnect => Some(DisconnectAck),
            Send => Some(SendAck),
            SetName => Some(SetNameAck),
            EnterPairingKey => Some(EnterPairingKeyAck),
            Scan => Some(ScanAck),
            GetPairingKey => Some(GetPairingKeyAck),
            NewPairingKey => Some(NewPairingKeyAck),
            ResetPairing => Some(ResetPairingAck),
            _ => None,
        }
    }

    /// Whether this type is a request that expects an acknowledgement.
    pub fn is_request(self) -> bool {
        self.ack().is_some()
    }
}

/// Binary outcome carried as a 4-byte ASCII token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// `OKAY`
    Okay,
    /// `FAIL`
    Fail,
}

impl Status {
    /// The wire token.
    pub fn as_bytes(self) -> &'static [u8; STATUS_LEN] {
        match self {
            Status::Okay => b"OKAY",
            Status::Fail => b"FAIL",
        }
    }

    /// Parse a token from the start of a payload.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        match payload.get(..STATUS_LEN)? {
            b"OKAY" => Some(Status::Okay),
            b"FAIL" => Some(Status::Fail),
            _ => None,
        }
    }

    /// `Okay` when `ok` is true.
    pub fn from_bool(ok: bool) -> Self {
        if ok {
            Status::Okay
        } else {
            Status::Fail
        }
    }

    /// Whether this is `Okay`.
    pub fn is_okay(self) -> bool {
        self == Status::Okay
    }
}

/// Cursor over a payload slice that tracks the remaining length.
///
/// Every read checks bounds first and returns `PayloadUnderrun` instead of
/// indexing out of range.
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> PayloadReader<'a> {
    /// Create a reader positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Whether every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Read exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(ProtocolError::PayloadUnderrun {
                need: len,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    /// Read a fixed-size array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Read a big-endian u16.
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    /// Read a big-endian u32.
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    /// Consume and return everything left.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.position..];
        self.position = self.data.len();
        slice
    }
}

/// `CONN` payload: the host's current Unix time in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Seconds since the Unix epoch.
    pub epoch: u32,
}

impl ConnectRequest {
    /// Parse from a `CONN` payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PayloadReader::new(payload);
        Ok(Self {
            epoch: reader.read_u32()?,
        })
    }

    /// Encode as a `CONN` payload.
    pub fn to_payload(&self) -> Vec<u8> {
        self.epoch.to_be_bytes().to_vec()
    }
}

/// `CHPW` payload: `old_len(1) new_len(1) old new`.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordChange<'a> {
    /// Current password.
    pub old: &'a [u8],
    /// Replacement password.
    pub new: &'a [u8],
}

impl<'a> PasswordChange<'a> {
    /// Parse from a `CHPW` payload. Trailing bytes are rejected.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let mut reader = PayloadReader::new(payload);
        let old_len = reader.read_u8()? as usize;
        let new_len = reader.read_u8()? as usize;
        let old = reader.read_bytes(old_len)?;
        let new = reader.read_bytes(new_len)?;
        if !reader.is_empty() {
            return Err(ProtocolError::PayloadUnderrun {
                need: 0,
                remaining: reader.remaining(),
            });
        }
        Ok(Self { old, new })
    }

    /// Encode as a `CHPW` payload. Passwords longer than 255 bytes are rejected.
    pub fn to_payload(&self) -> Option<Vec<u8>> {
        let old_len = u8::try_from(self.old.len()).ok()?;
        let new_len = u8::try_from(self.new.len()).ok()?;
        let mut out = Vec::with_capacity(2 + self.old.len() + self.new.len());
        out.push(old_len);
        out.push(new_len);
        out.extend_from_slice(self.old);
        out.extend_from_slice(self.new);
        Some(out)
    }
}

impl std::fmt::Debug for PasswordChange<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordChange")
            .field("old", &"[REDACTED]")
            .field("new", &"[REDACTED]")
            .finish()
    }
}

/// Leading fields of a `SEND` sub-frame.
///
/// The host lays the body out as
/// `destination(1) total_chunks(2) chunk_no(2) name_len(1) text_len(2) name text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendHeader {
    /// Destination node, or [`BROADCAST_NODE_ID`].
    pub destination: u8,
    /// Chunk number echoed in `SACK`, when the body is long enough to carry one.
    pub chunk: Option<u16>,
}

impl SendHeader {
    /// Parse the leading fields of a `SEND` payload.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PayloadReader::new(payload);
        let destination = reader.read_u8()?;
        let chunk = match reader.read_u16() {
            Ok(_total) => reader.read_u16().ok(),
            Err(_) => None,
        };
        Ok(Self { destination, chunk })
    }
}

/// Trim the zero padding from a fixed-width name field.
pub fn trim_name(raw: &[u8]) -> &[u8] {
    let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &raw[..end]
}

/// Set bit `id` in a peer bitmap, most significant bit first.
pub fn bitmap_set(bitmap: &mut [u8; PEER_BITMAP_LEN], id: u8) {
    bitmap[(id / 8) as usize] |= 0x80 >> (id % 8);
}

/// List the IDs set in a peer bitmap, in ascending order.
pub fn bitmap_ids(bitmap: &[u8; PEER_BITMAP_LEN]) -> Vec<u8> {
    (0..=u8::MAX)
        .filter(|&id| bitmap[(id / 8) as usize] & (0x80 >> (id % 8)) != 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_registry_codes_roundtrip() {
        for (ty, code) in REGISTRY {
            assert_eq!(ty.code().as_bytes(), code);
            assert_eq!(MessageType::from_code(TypeCode::new(*code)), Some(*ty));
        }
    }

    #[test]
    fn test_registry_codes_unique() {
        for (i, (_, a)) in REGISTRY.iter().enumerate() {
            for (_, b) in &REGISTRY[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_every_request_has_one_ack() {
        let requests: Vec<_> = REGISTRY
            .iter()
            .map(|(ty, _)| *ty)
            .filter(|ty| ty.is_request())
            .collect();
        assert_eq!(requests.len(), 12);

        let acks: Vec<_> = requests.iter().filter_map(|ty| ty.ack()).collect();
        assert_eq!(acks.len(), requests.len());
        let distinct: HashSet<_> = acks.iter().map(|ack| ack.code()).collect();
        assert_eq!(distinct.len(), acks.len());
        for ack in acks {
            assert!(!ack.is_request());
        }
    }

    #[test]
    fn test_known_pairs() {
        assert_eq!(MessageType::Connect.ack(), Some(MessageType::ConnectAck));
        assert_eq!(MessageType::Password.ack().unwrap().code().as_bytes(), b"PWAK");
        assert_eq!(MessageType::GetPairingKey.ack().unwrap().code().as_bytes(), b"GPAK");
        assert_eq!(MessageType::Receive.ack(), None);
    }

    #[test]
    fn test_unknown_code() {
        assert_eq!(MessageType::from_code(TypeCode::new(*b"ZZZZ")), None);
        assert_eq!(
            MessageType::try_from_code(TypeCode::new(*b"ZZZZ")).unwrap_err(),
            ProtocolError::UnknownMessageType("ZZZZ".to_string())
        );
    }

    #[test]
    fn test_status_tokens() {
        assert_eq!(Status::Okay.as_bytes(), b"OKAY");
        assert_eq!(Status::Fail.as_bytes(), b"FAIL");
        assert_eq!(Status::from_payload(b"OKAY\x00\x01"), Some(Status::Okay));
        assert_eq!(Status::from_payload(b"FAIL"), Some(Status::Fail));
        assert_eq!(Status::from_payload(b"OK"), None);
        assert_eq!(Status::from_payload(b"NOPE"), None);
        assert!(Status::from_bool(true).is_okay());
    }

    #[test]
    fn test_reader_sequential_reads() {
        let data = [0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03, b'x', b'y'];
        let mut reader = PayloadReader::new(&data);
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.read_u16().unwrap(), 2);
        assert_eq!(reader.read_u32().unwrap(), 3);
        assert_eq!(reader.remaining(), 2);
        assert_eq!(reader.read_rest(), b"xy");
        assert!(reader.is_empty());
    }

    #[test]
    fn test_reader_underrun_does_not_advance() {
        let data = [0x01, 0x02];
        let mut reader = PayloadReader::new(&data);
        assert_eq!(
            reader.read_u32().unwrap_err(),
            ProtocolError::PayloadUnderrun {
                need: 4,
                remaining: 2
            }
        );
        assert_eq!(reader.read_u16().unwrap(), 0x0102);
    }

    #[test]
    fn test_connect_request() {
        let req = ConnectRequest { epoch: 1_700_000_000 };
        assert_eq!(ConnectRequest::parse(&req.to_payload()).unwrap(), req);
        assert!(ConnectRequest::parse(&[0x01, 0x02]).is_err());
    }

    #[test]
    fn test_password_change_parse() {
        let change = PasswordChange {
            old: b"password",
            new: b"hunter22",
        };
        let payload = change.to_payload().unwrap();
        assert_eq!(payload[0], 8);
        assert_eq!(payload[1], 8);
        assert_eq!(PasswordChange::parse(&payload).unwrap(), change);
    }

    #[test]
    fn test_password_change_rejects_bad_lengths() {
        // Declares a 10-byte old password but carries 3.
        assert!(PasswordChange::parse(&[10, 1, b'a', b'b', b'c']).is_err());
        // Trailing garbage.
        assert!(PasswordChange::parse(&[1, 1, b'a', b'b', b'c']).is_err());
        assert!(PasswordChange::parse(&[]).is_err());
    }

    #[test]
    fn test_password_change_debug_redacts() {
        let change = PasswordChange {
            old: b"secret-old",
            new: b"secret-new",
        };
        let debug = format!("{:?}", change);
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_send_header() {
        let payload = [7, 0x00, 0x02, 0x00, 0x01, 5];
        let header = SendHeader::parse(&payload).unwrap();
        assert_eq!(header.destination, 7);
        assert_eq!(header.chunk, Some(1));

        let short = SendHeader::parse(&[BROADCAST_NODE_ID]).unwrap();
        assert_eq!(short.destination, BROADCAST_NODE_ID);
        assert_eq!(short.chunk, None);

        assert!(SendHeader::parse(&[]).is_err());
    }

    #[test]
    fn test_trim_name() {
        let mut raw = [0u8; DEVICE_NAME_LEN];
        raw[..5].copy_from_slice(b"caleb");
        assert_eq!(trim_name(&raw), b"caleb");
        assert_eq!(trim_name(&[0u8; 4]), b"");
    }

    #[test]
    fn test_bitmap_layout() {
        let mut bitmap = [0u8; PEER_BITMAP_LEN];
        bitmap_set(&mut bitmap, 0);
        bitmap_set(&mut bitmap, 9);
        bitmap_set(&mut bitmap, 255);
        assert_eq!(bitmap[0], 0x80);
        assert_eq!(bitmap[1], 0x40);
        assert_eq!(bitmap[31], 0x01);
        assert_eq!(bitmap_ids(&bitmap), vec![0, 9, 255]);
    }
}
