//! Transports carrying frames to the computer and across the radio.
//!
//! The computer link is a byte stream (stdio or TCP), so [`FrameAssembler`]
//! splits it into whole frames using the start marker and length field before
//! anything reaches the router. The radio link is datagram based: each UDP
//! datagram carries exactly one frame, like one radio packet.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use protocol::framing::START_MARKER;
use protocol::{FRAME_OVERHEAD, MAX_FRAME_SIZE};
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, trace, warn};

const MARKER: [u8; 2] = START_MARKER.to_be_bytes();

/// Splits a byte stream into candidate frames.
///
/// Only the start marker and length field are inspected; checksum and end
/// marker validation stay with the codec. Bytes that cannot begin a frame are
/// skipped until the next start marker.
#[derive(Debug)]
pub struct FrameAssembler {
    buf: Vec<u8>,
    max_frame_size: usize,
    discarded: usize,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    /// Create an assembler for frames up to [`MAX_FRAME_SIZE`].
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create an assembler with a custom frame size limit.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_frame_size),
            max_frame_size,
            discarded: 0,
        }
    }

    /// Append bytes read from the stream.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Total bytes skipped while resynchronising.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Take the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.buf.windows(2).position(|w| w == MARKER) {
                Some(0) => {}
                Some(offset) => self.discard(offset),
                None => {
                    // A trailing first marker byte may be completed by the next read.
                    let keep = usize::from(self.buf.last() == Some(&MARKER[0]));
                    self.discard(self.buf.len() - keep);
                    return None;
                }
            }

            if self.buf.len() < 4 {
                return None;
            }
            let len = usize::from(u16::from_be_bytes([self.buf[2], self.buf[3]]));
            if !(FRAME_OVERHEAD..=self.max_frame_size).contains(&len) {
                trace!(len, "Implausible frame length, resynchronising");
                self.discard(1);
                continue;
            }
            if self.buf.len() < len {
                return None;
            }
            return Some(self.buf.drain(..len).collect());
        }
    }

    fn discard(&mut self, count: usize) {
        if count > 0 {
            debug!(count, "Discarding bytes outside a frame");
            self.buf.drain(..count);
            self.discarded += count;
        }
    }
}

/// UDP stand-in for the radio link.
///
/// Every relayed frame is sent to each configured peer; the destination node
/// ID travels inside the frame and is filtered by the receiving node.
#[derive(Debug)]
pub struct RadioLink {
    socket: UdpSocket,
    peers: Vec<SocketAddr>,
}

impl RadioLink {
    /// Bind the radio socket and resolve the peer list.
    pub async fn bind(bind_addr: &str, peers: &[String]) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind radio socket on {}", bind_addr))?;

        let mut resolved = Vec::with_capacity(peers.len());
        for peer in peers {
            let addrs = lookup_host(peer.as_str())
                .await
                .with_context(|| format!("Failed to resolve radio peer {}", peer))?;
            resolved.extend(addrs.take(1));
        }

        debug!(
            bind_addr,
            peers = resolved.len(),
            "Radio link bound"
        );
        Ok(Self {
            socket,
            peers: resolved,
        })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Resolved peer addresses.
    pub fn peers(&self) -> &[SocketAddr] {
        &self.peers
    }

    /// Add a peer after binding.
    pub fn add_peer(&mut self, addr: SocketAddr) {
        if !self.peers.contains(&addr) {
            self.peers.push(addr);
        }
    }

    /// Wait for the next datagram. Returns its length and sender.
    pub async fn recv_frame(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buf).await?)
    }

    /// Send one frame to every peer. Returns how many sends succeeded.
    pub async fn broadcast(&self, bytes: &[u8]) -> usize {
        let mut sent = 0;
        for peer in &self.peers {
            match self.socket.send_to(bytes, peer).await {
                Ok(_) => sent += 1,
                Err(e) => warn!(%peer, error = %e, "Failed to send radio frame"),
            }
        }
        sent
    }
}
