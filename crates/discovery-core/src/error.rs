//! Error types shared by the discovery service.

use crate::transport::TransportError;
use thiserror::Error;

/// Invalid configuration or call arguments. Raised at the call site, never
/// by the worker loops.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Cluster name cannot be empty")]
    EmptyClusterName,

    #[error("Cluster name is {len} bytes, at most {max} are allowed")]
    ClusterNameTooLong { len: usize, max: usize },

    #[error("Cluster name cannot contain NUL bytes")]
    InvalidClusterName,

    #[error("Beacon interval must be greater than zero")]
    ZeroRequestInterval,

    #[error("Receive timeout must be greater than zero")]
    ZeroReceiveTimeout,

    #[error("Response chances must be at least 1")]
    ZeroResponseChances,

    #[error("Message type {msg_type} is reserved, user messages start at {min}")]
    ReservedMessageType { msg_type: u16, min: u16 },

    #[error("User payload is {size} bytes, at most {max} are allowed")]
    PayloadTooLarge { size: usize, max: usize },
}

/// Errors returned by the discovery service facade.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Discovery service is already running")]
    AlreadyRunning,

    #[error("Peer index {index} out of range (known peers: {count})")]
    PeerIndexOutOfRange { index: usize, count: usize },
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
