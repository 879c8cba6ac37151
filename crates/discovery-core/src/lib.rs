//! discovery-core: Shared building blocks for LAN cluster discovery.
//!
//! This crate provides the runtime-independent parts of the protocol:
//! - Fixed-size wire framing for beacons, responses, leave notices and user messages
//! - The `PeerTable` with per-peer response-chance counters
//! - `EventNotifier` for found/lost/user-message listeners
//! - Configuration, validation and the `DatagramTransport` trait abstraction

pub mod config;
pub mod error;
pub mod events;
pub mod peers;
pub mod protocol;
pub mod transport;

pub use config::{ClusterName, DiscoveryConfig, ValidatedConfig, DEFAULT_PORT};
pub use error::{ConfigError, DiscoveryError};
pub use events::{
    ClusterView, DiscoveryEvent, DiscoveryListener, EventNotifier, NodeLostReason, Subscription,
};
pub use peers::{PeerNode, PeerTable, Upsert};
pub use protocol::{Announcement, Message, UserPayload, WireError};
pub use transport::{DatagramTransport, TransportError, TransportFactory};
