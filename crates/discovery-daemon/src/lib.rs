//! discovery-daemon: tokio runtime for LAN cluster discovery.
//!
//! Wires the runtime-independent pieces of `discovery-core` to UDP sockets
//! and two worker loops, exposed through `DiscoveryService`. The binary in
//! `main.rs` runs one node from the command line.

pub mod broadcaster;
pub mod node;
pub mod receiver;
pub mod service;
pub mod settings;
pub mod stats;
pub mod udp;

// Re-export key types for convenience
pub use broadcaster::LoopState;
pub use service::DiscoveryService;
pub use settings::load_config;
pub use stats::StatsSnapshot;
pub use udp::{UdpTransport, UdpTransportFactory};
