//! Peer device tracking.
//!
//! This module records which node IDs have been heard on the radio link so
//! that `SCAN` can report them.

pub mod peer_table;

pub use peer_table::{PeerInfo, PeerTable};
