//! Table of peer nodes heard on the radio link.

use std::collections::BTreeMap;
use std::time::Instant;

use protocol::messages::{bitmap_set, BROADCAST_NODE_ID, PEER_BITMAP_LEN};

/// What the node knows about one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    /// Node identifier.
    pub node_id: u8,
    /// When a frame from this peer was last accepted.
    pub last_seen: Instant,
    /// Frames received from this peer.
    pub frames: u64,
}

impl PeerInfo {
    /// Seconds since the peer was last heard.
    pub fn age_secs(&self) -> u64 {
        self.last_seen.elapsed().as_secs()
    }
}

/// Peers keyed by node ID.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: BTreeMap<u8, PeerInfo>,
}

impl PeerTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a frame from `node_id`. Broadcast and `own_id` are never recorded.
    ///
    /// Returns true the first time a peer is seen.
    pub fn record(&mut self, node_id: u8, own_id: u8) -> bool {
        if node_id == BROADCAST_NODE_ID || node_id == own_id {
            return false;
        }
        let now = Instant::now();
        match self.peers.get_mut(&node_id) {
            Some(info) => {
                info.last_seen = now;
                info.frames += 1;
                false
            }
            None => {
                self.peers.insert(
                    node_id,
                    PeerInfo {
                        node_id,
                        last_seen: now,
                        frames: 1,
                    },
                );
                true
            }
        }
    }

    /// Whether `node_id` has been heard.
    pub fn contains(&self, node_id: u8) -> bool {
        self.peers.contains_key(&node_id)
    }

    /// Details for one peer.
    pub fn get(&self, node_id: u8) -> Option<&PeerInfo> {
        self.peers.get(&node_id)
    }

    /// Known peer IDs in ascending order.
    pub fn ids(&self) -> Vec<u8> {
        self.peers.keys().copied().collect()
    }

    /// Known peers as the `SCAK` bitmap.
    pub fn bitmap(&self) -> [u8; PEER_BITMAP_LEN] {
        let mut bitmap = [0u8; PEER_BITMAP_LEN];
        for &id in self.peers.keys() {
            bitmap_set(&mut bitmap, id);
        }
        bitmap
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer has been heard.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Forget every peer.
    pub fn clear(&mut self) {
        self.peers.clear();
    }
}
