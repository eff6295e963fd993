//! Outbound queue for frames relayed onto the radio link.

use std::collections::VecDeque;

use tracing::warn;

/// One complete frame waiting for the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFrame {
    /// Destination node ID, or broadcast.
    pub destination: u8,
    /// Encoded frame bytes.
    pub bytes: Vec<u8>,
}

/// Queue between the dispatcher and the radio writer.
///
/// Frames are handed off whole; capacity and backpressure policy belong to
/// the implementation.
pub trait RelayQueue: Send {
    /// Queue one encoded frame. Returns false if it was not accepted.
    fn enqueue_outbound(&mut self, bytes: Vec<u8>, destination: u8) -> bool;

    /// Take the oldest queued frame.
    fn dequeue(&mut self) -> Option<RelayFrame>;

    /// Frames currently queued.
    fn len(&self) -> usize;

    /// Whether nothing is queued.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed-capacity FIFO that rejects frames once full.
#[derive(Debug)]
pub struct BoundedRelayQueue {
    frames: VecDeque<RelayFrame>,
    capacity: usize,
}

impl BoundedRelayQueue {
    /// Create a queue holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum number of queued frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether another frame would be rejected.
    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }
}

impl RelayQueue for BoundedRelayQueue {
    fn enqueue_outbound(&mut self, bytes: Vec<u8>, destination: u8) -> bool {
        if self.is_full() {
            warn!(
                destination,
                capacity = self.capacity,
                "Relay queue full, rejecting frame"
            );
            return false;
        }
        self.frames.push_back(RelayFrame { destination, bytes });
        true
    }

    fn dequeue(&mut self) -> Option<RelayFrame> {
        self.frames.pop_front()
    }

    fn len(&self) -> usize {
        self.frames.len()
    }
}
