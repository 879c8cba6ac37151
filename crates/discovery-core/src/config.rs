//! Service configuration.
//!
//! `DiscoveryConfig` is the user-facing, serde-friendly form. It is turned into a
//! `ValidatedConfig` exactly once per `start()` (and per user-message send), so
//! the worker loops never see an invalid value.

use crate::error::ConfigError;
use crate::protocol::MAX_NAME_LEN;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Default UDP port for discovery beacons, responses and leave notices.
pub const DEFAULT_PORT: u16 = 28_181;

/// Default interval between two beacons.
pub const DEFAULT_REQUEST_INTERVAL_MS: u64 = 10_000;

/// Default number of beacon cycles a peer may stay silent.
pub const DEFAULT_RESPONSE_CHANCES: u32 = 1;

/// Default upper bound for one receive attempt of the receiver loop.
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 500;

/// Name of the cluster a node belongs to.
///
/// Only nodes with byte-identical names interact. The name must fit the
/// fixed-size name field of the wire envelope and cannot contain NUL bytes,
/// since the zero padding terminates it on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterName(String);

impl ClusterName {
    /// Validate and wrap a cluster name.
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::EmptyClusterName);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(ConfigError::ClusterNameTooLong {
                len: name.len(),
                max: MAX_NAME_LEN,
            });
        }
        if name.bytes().any(|b| b == 0) {
            return Err(ConfigError::InvalidClusterName);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Display for ClusterName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClusterName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for ClusterName {
    type Error = ConfigError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

/// Configuration of one discovery node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Cluster identifier; only nodes with the same name see each other
    pub cluster_name: String,

    /// Application-level callback address advertised to peers
    pub response_addr: SocketAddr,

    /// Broadcast address of the subnet (beacons and leave notices go here)
    pub broadcast_addr: IpAddr,

    /// Local interface for the discovery socket
    #[serde(default = "default_bind_ip")]
    pub bind_ip: IpAddr,

    /// Port of the discovery socket
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Destination port for broadcasts (defaults to `bind_port`)
    #[serde(default)]
    pub broadcast_port: Option<u16>,

    /// Interval between two beacons in milliseconds
    #[serde(default = "default_request_interval_ms")]
    pub request_interval_ms: u64,

    /// Beacon cycles a peer may stay silent before it is evicted
    #[serde(default = "default_response_chances")]
    pub response_chances: u32,

    /// Upper bound of a single receive attempt in milliseconds
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// Announce departure to peers when the service stops
    #[serde(default = "default_true")]
    pub send_leave_on_stop: bool,
}

fn whole_millis(duration: Duration) -> u64 {
    let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    if millis == 0 && !duration.is_zero() { 1 } else { millis }
}

fn default_bind_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_bind_port() -> u16 {
    DEFAULT_PORT
}

fn default_request_interval_ms() -> u64 {
    DEFAULT_REQUEST_INTERVAL_MS
}

fn default_response_chances() -> u32 {
    DEFAULT_RESPONSE_CHANCES
}

fn default_receive_timeout_ms() -> u64 {
    DEFAULT_RECEIVE_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

impl DiscoveryConfig {
    /// Create a configuration with default port, interval and response chances.
    pub fn new(
        cluster_name: impl Into<String>,
        response_addr: SocketAddr,
        broadcast_addr: IpAddr,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            response_addr,
            broadcast_addr,
            bind_ip: default_bind_ip(),
            bind_port: default_bind_port(),
            broadcast_port: None,
            request_interval_ms: default_request_interval_ms(),
            response_chances: default_response_chances(),
            receive_timeout_ms: default_receive_timeout_ms(),
            send_leave_on_stop: true,
        }
    }

    pub fn with_bind(mut self, ip: IpAddr, port: u16) -> Self {
        self.bind_ip = ip;
        self.bind_port = port;
        self
    }

    pub fn with_broadcast_port(mut self, port: u16) -> Self {
        self.broadcast_port = Some(port);
        self
    }

    /// Set the beacon interval, stored in whole milliseconds.
    ///
    /// Non-zero durations below one millisecond round up to one.
    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval_ms = whole_millis(interval);
        self
    }

    pub fn with_response_chances(mut self, chances: u32) -> Self {
        self.response_chances = chances;
        self
    }

    /// Set the receive timeout, stored in whole milliseconds.
    ///
    /// Non-zero durations below one millisecond round up to one.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout_ms = whole_millis(timeout);
        self
    }

    pub fn with_leave_on_stop(mut self, send_leave: bool) -> Self {
        self.send_leave_on_stop = send_leave;
        self
    }

    /// Check every field and resolve derived values.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let cluster_name = ClusterName::new(self.cluster_name.as_str())?;

        if self.request_interval_ms == 0 {
            return Err(ConfigError::ZeroRequestInterval);
        }
        if self.receive_timeout_ms == 0 {
            return Err(ConfigError::ZeroReceiveTimeout);
        }
        if self.response_chances == 0 {
            return Err(ConfigError::ZeroResponseChances);
        }

        let broadcast_port = self.broadcast_port.unwrap_or(self.bind_port);

        Ok(ValidatedConfig {
            cluster_name,
            response_addr: self.response_addr,
            bind_addr: SocketAddr::new(self.bind_ip, self.bind_port),
            broadcast_addr: SocketAddr::new(self.broadcast_addr, broadcast_port),
            request_interval: Duration::from_millis(self.request_interval_ms),
            receive_timeout: Duration::from_millis(self.receive_timeout_ms),
            response_chances: self.response_chances,
            send_leave_on_stop: self.send_leave_on_stop,
        })
    }
}

/// Configuration after validation, in the units the loops use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedConfig {
    pub cluster_name: ClusterName,
    pub response_addr: SocketAddr,
    pub bind_addr: SocketAddr,
    pub broadcast_addr: SocketAddr,
    pub request_interval: Duration,
    pub receive_timeout: Duration,
    pub response_chances: u32,
    pub send_leave_on_stop: bool,
}
