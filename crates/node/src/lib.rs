//! # LoComm Node Library
//!
//! This crate provides the node-side functionality of a LoComm field radio:
//! it accepts frames from a host computer, authenticates the operator, keeps
//! the group key sealed at rest, and relays encrypted messages to peer nodes
//! over the radio.
//!
//! ## Overview
//!
//! - **Credential Store**: salted password hash and the wrapped group key
//! - **Session Manager**: login/logout with secrets wiped on every exit path
//! - **Secure Channel**: group key generation, pairing codes, D2D encryption
//! - **Message Router**: one handler and one reply per request frame
//! - **Transports**: stdio/TCP host link and a UDP stand-in for the radio
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        Node Service                       │
//! ├───────────────────────────────────────────────────────────┤
//! │  ┌────────────────────┐          ┌──────────────────────┐ │
//! │  │  Computer loop     │          │  Radio loop          │ │
//! │  │  (stdio / TCP)     │          │  (UDP)               │ │
//! │  └─────────┬──────────┘          └──────────┬───────────┘ │
//! │            └───────────┐  ┌─────────────────┘             │
//! │                 ┌──────▼──▼───────┐                       │
//! │                 │  Message Router │  (one mutex)          │
//! │                 └──────┬──────────┘                       │
//! │      ┌─────────────────┼──────────────┬────────────┐      │
//! │  ┌───▼──────┐  ┌───────▼──────┐  ┌────▼─────┐ ┌────▼────┐ │
//! │  │ Security │  │ Relay queue  │  │  Peers   │ │  Codec  │ │
//! │  └───┬──────┘  └──────────────┘  └──────────┘ └─────────┘ │
//! │  ┌───▼──────────────┐                                     │
//! │  │ Key-value store  │                                     │
//! │  └──────────────────┘                                     │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use node::{Config, NodeService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let service = NodeService::new(config)?;
//!
//!     let token = service.shutdown_token();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         token.cancel();
//!     });
//!
//!     service.run().await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`store`]: Persistent key-value store
//! - [`security`]: Credential store, session manager and secure channel
//! - [`devices`]: Peers heard on the radio
//! - [`relay`]: Outbound radio queue
//! - [`router`]: Message routing to handlers
//! - [`transport`]: Stream reassembly and the radio socket
//! - [`service`]: Service loops

pub mod config;
pub mod devices;
pub mod relay;
pub mod router;
pub mod security;
pub mod service;
pub mod store;
pub mod transport;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{ComputerTransport, Config, ConfigError};

// Re-export store types for convenience
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreOp, NAMESPACE};

// Re-export security types for convenience
pub use security::{SecureRng, SecurityError, SecurityModule, SecurityOptions, Session};

// Re-export device types for convenience
pub use devices::{PeerInfo, PeerTable};

// Re-export relay types for convenience
pub use relay::{BoundedRelayQueue, RelayFrame, RelayQueue};

// Re-export router types for convenience
pub use router::{Channel, ChannelState, MessageRouter, RouterError, RouterOptions, RouterResult};

// Re-export service types for convenience
pub use service::{build_router, NodeService, SharedRouter};
pub use transport::{FrameAssembler, RadioLink};
