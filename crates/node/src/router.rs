//! Message router for dispatching inbound frames to their handlers.
//!
//! This module provides the `MessageRouter` struct that validates raw frames
//! from either link, routes them by message type to the security module, the
//! relay queue or the peer table, and queues exactly one reply per request.
//!
//! The router is synchronous: every handler runs to completion once its frame
//! is available. The service loops share one router behind a single lock.

use std::collections::VecDeque;
use std::time::Instant;

use protocol::messages::{
    trim_name, ConnectRequest, PasswordChange, SendHeader, BROADCAST_NODE_ID, DEVICE_NAME_LEN,
};
use protocol::{
    CorrelationTag, Frame, FrameCodec, MessageType, PayloadReader, ProtocolError, Status,
    TypeCode,
};
use tracing::{debug, info, trace, warn};

use crate::devices::PeerTable;
use crate::relay::{RelayFrame, RelayQueue};
use crate::security::{SecurityError, SecurityModule};

/// Errors that can occur while handling a frame.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The bytes did not form a valid frame; dropped without reply.
    #[error("invalid frame: {0}")]
    Framing(ProtocolError),

    /// A payload field could not be read.
    #[error("malformed payload: {0}")]
    Payload(ProtocolError),

    /// Request rejected before reaching a subsystem.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Credential, session or secure channel failure.
    #[error("security error: {0}")]
    Security(#[from] SecurityError),

    /// The relay queue did not accept the frame.
    #[error("relay queue rejected frame for node {0}")]
    RelayRejected(u8),

    /// A reply or relayed frame could not be encoded.
    #[error("failed to encode frame: {0}")]
    Encode(ProtocolError),
}

/// Result type for router operations.
pub type RouterResult<T> = Result<T, RouterError>;

/// Which link a frame arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// The host computer (serial, stdio or TCP).
    Computer,
    /// The radio link to peer nodes.
    Device,
}

/// Per-channel dispatch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Idle, waiting for the next complete frame.
    AwaitingFrame,
    /// A handler is running for a frame from this channel.
    Dispatching,
}

/// Default number of peer messages held for the computer link.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 5;

/// Router settings taken from the node configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterOptions {
    /// Identifier prefixed to relayed payloads.
    pub node_id: u8,
    /// Seal relayed payloads with the group key.
    pub encrypt_relay: bool,
    /// Peer messages held for the computer link before new ones are dropped.
    pub outbound_capacity: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            node_id: 1,
            encrypt_relay: true,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// Message router that dispatches frames to the appropriate handlers.
///
/// Replies for the computer link are queued and collected with
/// [`take_outbound`](Self::take_outbound); frames for the radio go through the
/// [`RelayQueue`] and are collected with [`take_relay`](Self::take_relay).
///
/// Replies are always queued. Forwarded peer messages are dropped once
/// `outbound_capacity` frames are waiting, so a node with no computer
/// attached does not accumulate radio traffic.
pub struct MessageRouter {
    /// Credentials, session and secure channel.
    security: SecurityModule,
    /// Queue of frames bound for the radio.
    relay: Box<dyn RelayQueue>,
    /// Peers heard on the radio.
    peers: PeerTable,
    /// Frame codec.
    codec: FrameCodec,
    /// Node settings.
    options: RouterOptions,
    /// Encoded frames bound for the computer.
    outbound: VecDeque<Vec<u8>>,
    computer_state: ChannelState,
    device_state: ChannelState,
    started_at: Instant,
    /// Unix time at boot, learned from `CONN`.
    epoch_at_boot: Option<u64>,
}

impl MessageRouter {
    /// Create a new router over an initialised security module.
    pub fn new(
        security: SecurityModule,
        relay: Box<dyn RelayQueue>,
        options: RouterOptions,
    ) -> Self {
        Self {
            security,
            relay,
            peers: PeerTable::new(),
            codec: FrameCodec::new(),
            options,
            outbound: VecDeque::new(),
            computer_state: ChannelState::AwaitingFrame,
            device_state: ChannelState::AwaitingFrame,
            started_at: Instant::now(),
            epoch_at_boot: None,
        }
    }

    /// Validate and dispatch one complete frame read from `channel`.
    ///
    /// Framing errors drop the frame without a reply. Every valid frame from
    /// the computer produces exactly one queued reply.
    pub fn handle_inbound_frame(&mut self, channel: Channel, bytes: &[u8]) -> RouterResult<()> {
        let frame = match self.codec.decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(?channel, len = bytes.len(), error = %e, "Dropping invalid frame");
                return Err(RouterError::Framing(e));
            }
        };

        trace!(
            ?channel,
            message_type = %frame.type_code(),
            tag = %frame.tag(),
            payload_len = frame.payload().len(),
            "Dispatching frame"
        );

        self.set_state(channel, ChannelState::Dispatching);
        let result = match channel {
            Channel::Computer => self.dispatch_computer(&frame),
            Channel::Device => self.dispatch_device(&frame),
        };
        self.set_state(channel, ChannelState::AwaitingFrame);
        result
    }

    /// Take the oldest frame waiting for the computer link.
    pub fn take_outbound(&mut self) -> Option<Vec<u8>> {
        self.outbound.pop_front()
    }

    /// Number of frames waiting for the computer link.
    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    /// Take the oldest frame waiting for the radio.
    pub fn take_relay(&mut self) -> Option<RelayFrame> {
        self.relay.dequeue()
    }

    /// Dispatch state of `channel`.
    pub fn state(&self, channel: Channel) -> ChannelState {
        match channel {
            Channel::Computer => self.computer_state,
            Channel::Device => self.device_state,
        }
    }

    /// The security module.
    pub fn security(&self) -> &SecurityModule {
        &self.security
    }

    /// The security module, mutably.
    pub fn security_mut(&mut self) -> &mut SecurityModule {
        &mut self.security
    }

    /// Peers heard on the radio.
    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// Router settings.
    pub fn options(&self) -> RouterOptions {
        self.options
    }

    /// Unix time at boot, once a `CONN` has set the clock.
    pub fn epoch_at_boot(&self) -> Option<u64> {
        self.epoch_at_boot
    }

    /// Current Unix time by the node's clock, once set.
    pub fn current_epoch(&self) -> Option<u64> {
        self.epoch_at_boot
            .map(|boot| boot + self.started_at.elapsed().as_secs())
    }

    /// Wipe session secrets.
    pub fn shutdown(&mut self) {
        self.security.shutdown();
    }

    fn set_state(&mut self, channel: Channel, state: ChannelState) {
        match channel {
            Channel::Computer => self.computer_state = state,
            Channel::Device => self.device_state = state,
        }
    }

    fn dispatch_computer(&mut self, frame: &Frame) -> RouterResult<()> {
        let (reply_type, payload) = self.route(frame);
        let bytes = self
            .codec
            .encode_parts(reply_type, frame.tag(), &payload)
            .map_err(RouterError::Encode)?;
        self.outbound.push_back(bytes);
        Ok(())
    }

    fn dispatch_device(&mut self, frame: &Frame) -> RouterResult<()> {
        match MessageType::from_code(frame.type_code()) {
            Some(MessageType::Send) => self.handle_peer_send(frame),
            _ => {
                debug!(
                    message_type = %frame.type_code(),
                    "Ignoring non-SEND frame from radio"
                );
                Ok(())
            }
        }
    }

    /// Route a computer frame and build its reply type and payload.
    fn route(&mut self, frame: &Frame) -> (TypeCode, Vec<u8>) {
        let payload = frame.payload();

        match MessageType::from_code(frame.type_code()) {
            // Session messages
            Some(MessageType::Connect) => (
                MessageType::ConnectAck.code(),
                self.handle_connect(payload),
            ),
            Some(MessageType::Password) => (
                MessageType::PasswordAck.code(),
                self.handle_password(payload),
            ),
            Some(MessageType::SetPassword) => (
                MessageType::SetPasswordAck.code(),
                self.handle_set_password(payload),
            ),
            Some(MessageType::ChangePassword) => (
                MessageType::ChangePasswordAck.code(),
                self.handle_change_password(payload),
            ),
            Some(MessageType::Disconnect) => (
                MessageType::DisconnectAck.code(),
                self.handle_disconnect(),
            ),

            // Relay and node messages
            Some(MessageType::Send) => (
                MessageType::SendAck.code(),
                self.handle_send(frame.tag(), payload),
            ),
            Some(MessageType::SetName) => (
                MessageType::SetNameAck.code(),
                self.handle_set_name(payload),
            ),
            Some(MessageType::Scan) => (MessageType::ScanAck.code(), self.handle_scan()),

            // Pairing messages
            Some(MessageType::EnterPairingKey) => (
                MessageType::EnterPairingKeyAck.code(),
                self.handle_enter_pairing_key(payload),
            ),
            Some(MessageType::GetPairingKey) => (
                MessageType::GetPairingKeyAck.code(),
                self.handle_get_pairing_key(),
            ),
            Some(MessageType::NewPairingKey) => (
                MessageType::NewPairingKeyAck.code(),
                self.handle_new_pairing_key(),
            ),
            Some(MessageType::ResetPairing) => (
                MessageType::ResetPairingAck.code(),
                self.handle_reset_pairing(),
            ),

            // Acknowledgements and forwards are never valid requests
            Some(_) | None => self.handle_unknown(frame),
        }
    }

    fn status_payload(request: MessageType, result: RouterResult<()>) -> Vec<u8> {
        match result {
            Ok(()) => Status::Okay.as_bytes().to_vec(),
            Err(e) => {
                debug!(?request, error = %e, "Request failed");
                Status::Fail.as_bytes().to_vec()
            }
        }
    }

    fn status_with_code(
        request: MessageType,
        result: Result<protocol::PairingCode, SecurityError>,
    ) -> Vec<u8> {
        match result {
            Ok(code) => {
                let mut payload = Status::Okay.as_bytes().to_vec();
                payload.extend_from_slice(code.as_bytes());
                payload
            }
            Err(e) => Self::status_payload(request, Err(e.into())),
        }
    }

    fn check_password_len(&self, password: &[u8]) -> RouterResult<()> {
        let max = self.security.options().max_password_len;
        if password.len() > max {
            return Err(RouterError::InvalidRequest(format!(
                "password is {} bytes, maximum is {}",
                password.len(),
                max
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Session Handlers
    // =========================================================================

    fn handle_connect(&mut self, payload: &[u8]) -> Vec<u8> {
        let result = ConnectRequest::parse(payload)
            .map_err(RouterError::Payload)
            .map(|req| {
                let uptime = self.started_at.elapsed().as_secs();
                let boot = u64::from(req.epoch).saturating_sub(uptime);
                self.epoch_at_boot = Some(boot);
                info!(epoch = req.epoch, epoch_at_boot = boot, "Host connected, clock set");
            });
        Self::status_payload(MessageType::Connect, result)
    }

    fn handle_password(&mut self, payload: &[u8]) -> Vec<u8> {
        let result = self
            .check_password_len(payload)
            .and_then(|()| Ok(self.security.login(payload)?));
        Self::status_payload(MessageType::Password, result)
    }

    fn handle_set_password(&mut self, payload: &[u8]) -> Vec<u8> {
        let result = self.security.provision(payload).map_err(RouterError::from);
        Self::status_payload(MessageType::SetPassword, result)
    }

    fn handle_change_password(&mut self, payload: &[u8]) -> Vec<u8> {
        let result = PasswordChange::parse(payload)
            .map_err(RouterError::Payload)
            .and_then(|change| {
                self.check_password_len(change.old)?;
                Ok(self.security.change_password(change.old, change.new)?)
            });
        Self::status_payload(MessageType::ChangePassword, result)
    }

    fn handle_disconnect(&mut self) -> Vec<u8> {
        self.security.logout();
        Self::status_payload(MessageType::Disconnect, Ok(()))
    }

    // =========================================================================
    // Relay and Node Handlers
    // =========================================================================

    fn handle_send(&mut self, tag: CorrelationTag, payload: &[u8]) -> Vec<u8> {
        let header = SendHeader::parse(payload).map_err(RouterError::Payload);
        let chunk = header.as_ref().ok().and_then(|h| h.chunk);

        let result = header.and_then(|h| self.relay_to_device(tag, payload, h.destination));

        let mut reply = Self::status_payload(MessageType::Send, result);
        if let Some(chunk) = chunk {
            reply.extend_from_slice(&chunk.to_be_bytes());
        }
        reply
    }

    fn relay_to_device(
        &mut self,
        tag: CorrelationTag,
        payload: &[u8],
        destination: u8,
    ) -> RouterResult<()> {
        let body = if self.options.encrypt_relay {
            self.security.encrypt_message(payload)?
        } else {
            payload.to_vec()
        };

        let mut relayed = Vec::with_capacity(1 + body.len());
        relayed.push(self.options.node_id);
        relayed.extend_from_slice(&body);

        let bytes = self
            .codec
            .encode_parts(MessageType::Send.code(), tag, &relayed)
            .map_err(RouterError::Encode)?;

        if !self.relay.enqueue_outbound(bytes, destination) {
            return Err(RouterError::RelayRejected(destination));
        }
        debug!(destination, %tag, len = relayed.len(), "Queued frame for radio");
        Ok(())
    }

    fn handle_set_name(&mut self, payload: &[u8]) -> Vec<u8> {
        let result = if payload.len() > DEVICE_NAME_LEN {
            Err(RouterError::InvalidRequest(format!(
                "device name is {} bytes, maximum is {}",
                payload.len(),
                DEVICE_NAME_LEN
            )))
        } else {
            let name = trim_name(payload);
            self.security
                .set_device_name(name)
                .map(|()| info!(name = %String::from_utf8_lossy(name), "Device name set"))
                .map_err(RouterError::from)
        };
        Self::status_payload(MessageType::SetName, result)
    }

    fn handle_scan(&self) -> Vec<u8> {
        debug!(peers = self.peers.len(), "Reporting known peers");
        self.peers.bitmap().to_vec()
    }

    /// A `SEND` frame heard on the radio.
    fn handle_peer_send(&mut self, frame: &Frame) -> RouterResult<()> {
        let mut reader = PayloadReader::new(frame.payload());
        let sender = reader.read_u8().map_err(RouterError::Payload)?;
        let body = reader.read_rest();

        if sender == self.options.node_id {
            trace!("Ignoring our own relayed frame");
            return Ok(());
        }
        if self.peers.record(sender, self.options.node_id) {
            info!(sender, "New peer heard");
        }

        let plaintext = if self.options.encrypt_relay {
            match self.security.decrypt_message(body) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    warn!(sender, tag = %frame.tag(), error = %e, "Dropping peer frame that failed to open");
                    return Err(e.into());
                }
            }
        } else {
            body.to_vec()
        };

        match plaintext.first() {
            Some(&dest) if dest == self.options.node_id || dest == BROADCAST_NODE_ID => {}
            Some(&dest) => {
                trace!(sender, destination = dest, "Frame addressed to another node");
                return Ok(());
            }
            None => {
                return Err(RouterError::InvalidRequest(
                    "peer frame carries no destination".to_string(),
                ))
            }
        }

        let mut forward = Vec::with_capacity(1 + plaintext.len());
        forward.push(sender);
        forward.extend_from_slice(&plaintext);

        if self.outbound.len() >= self.options.outbound_capacity {
            warn!(
                sender,
                tag = %frame.tag(),
                pending = self.outbound.len(),
                "Computer queue full, dropping peer message"
            );
            return Ok(());
        }

        let bytes = self
            .codec
            .encode_parts(MessageType::Receive.code(), frame.tag(), &forward)
            .map_err(RouterError::Encode)?;
        self.outbound.push_back(bytes);
        debug!(sender, len = plaintext.len(), "Forwarded peer message to computer");
        Ok(())
    }

    // =========================================================================
    // Pairing Handlers
    // =========================================================================

    fn handle_enter_pairing_key(&mut self, payload: &[u8]) -> Vec<u8> {
        let result = self.security.import_key(payload).map_err(RouterError::from);
        Self::status_payload(MessageType::EnterPairingKey, result)
    }

    fn handle_get_pairing_key(&self) -> Vec<u8> {
        Self::status_with_code(
            MessageType::GetPairingKey,
            self.security.export_existing_key(),
        )
    }

    fn handle_new_pairing_key(&mut self) -> Vec<u8> {
        Self::status_with_code(MessageType::NewPairingKey, self.security.generate_key())
    }

    fn handle_reset_pairing(&mut self) -> Vec<u8> {
        let result = self.security.reset_pairing().map_err(RouterError::from);
        Self::status_payload(MessageType::ResetPairing, result)
    }

    // =========================================================================
    // Control Handlers
    // =========================================================================

    fn handle_unknown(&self, frame: &Frame) -> (TypeCode, Vec<u8>) {
        warn!(
            message_type = %frame.type_code(),
            tag = %frame.tag(),
            "Unknown message type, replying FAIL"
        );
        (
            MessageType::Fail.code(),
            frame.type_code().as_bytes().to_vec(),
        )
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("options", &self.options)
            .field("security", &self.security)
            .field("peers", &self.peers.len())
            .field("outbound", &self.outbound.len())
            .field("relay", &self.relay.len())
            .finish()
    }
}
