//! Table of known cluster peers.
//!
//! Provides `PeerTable`, the registry shared by the broadcaster and receiver
//! loops, and `PeerNode` for per-peer state. Every operation takes the lock
//! for the mutation only and returns owned copies, so callers never hold the
//! lock while doing I/O or notifying listeners.

use crate::error::DiscoveryError;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Mutex;

/// A discovered cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerNode {
    /// Source address of the peer's discovery traffic (identity key)
    pub discovery_addr: SocketAddr,
    /// Application-level callback address the peer advertises
    pub response_addr: SocketAddr,
    /// Beacon cycles left before the peer is evicted
    pub response_chances: u32,
}

/// Outcome of [`PeerTable::upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upsert {
    /// The peer was not known before
    Discovered(PeerNode),
    /// The peer was known; its counter was reset
    Refreshed(PeerNode),
}

impl Upsert {
    pub fn peer(&self) -> &PeerNode {
        match self {
            Self::Discovered(peer) | Self::Refreshed(peer) => peer,
        }
    }

    pub fn is_discovered(&self) -> bool {
        matches!(self, Self::Discovered(_))
    }
}

/// Ordered, lock-protected collection of peers.
///
/// Holds at most one entry per discovery address. Wrap in `Arc` for sharing.
pub struct PeerTable {
    max_chances: u32,
    peers: Mutex<Vec<PeerNode>>,
}

impl PeerTable {
    /// Create an empty table whose peers start with `max_chances` response chances.
    pub fn new(max_chances: u32) -> Self {
        Self {
            max_chances,
            peers: Mutex::new(Vec::new()),
        }
    }

    /// Insert a new peer or reset the counter of a known one.
    pub fn upsert(&self, discovery_addr: SocketAddr, response_addr: SocketAddr) -> Upsert {
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(duplicate) = peers
            .iter()
            .find(|p| p.response_addr == response_addr && p.discovery_addr != discovery_addr)
        {
            tracing::warn!(
                "Response address {} advertised by both {} and {}",
                response_addr,
                duplicate.discovery_addr,
                discovery_addr
            );
        }

        if let Some(peer) = peers.iter_mut().find(|p| p.discovery_addr == discovery_addr) {
            if peer.response_addr != response_addr {
                tracing::debug!(
                    "Peer {} changed response address {} -> {}",
                    discovery_addr,
                    peer.response_addr,
                    response_addr
                );
                peer.response_addr = response_addr;
            }
            peer.response_chances = self.max_chances;
            return Upsert::Refreshed(peer.clone());
        }

        let peer = PeerNode {
            discovery_addr,
            response_addr,
            response_chances: self.max_chances,
        };
        peers.push(peer.clone());
        Upsert::Discovered(peer)
    }

    /// Remove peers whose counter is already zero, decrement all others.
    ///
    /// Called once per broadcaster cycle, before the beacon is sent. A peer
    /// thus survives `max_chances` unanswered beacons.
    pub fn age_and_collect_expired(&self) -> Vec<PeerNode> {
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());

        let mut expired = Vec::new();
        peers.retain_mut(|peer| {
            if peer.response_chances == 0 {
                expired.push(peer.clone());
                false
            } else {
                peer.response_chances -= 1;
                true
            }
        });
        expired
    }

    /// Remove a peer by discovery address. Returns the removed entry, if any.
    pub fn remove(&self, discovery_addr: SocketAddr) -> Option<PeerNode> {
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        let idx = peers
            .iter()
            .position(|p| p.discovery_addr == discovery_addr)?;
        Some(peers.remove(idx))
    }

    /// Remove all peers, returning them.
    pub fn clear(&self) -> Vec<PeerNode> {
        let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *peers)
    }

    pub fn count(&self) -> usize {
        self.peers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Peer at position `index`, in insertion order.
    pub fn by_index(&self, index: usize) -> Result<PeerNode, DiscoveryError> {
        let peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
        peers
            .get(index)
            .cloned()
            .ok_or(DiscoveryError::PeerIndexOutOfRange {
                index,
                count: peers.len(),
            })
    }

    pub fn by_discovery_addr(&self, addr: SocketAddr) -> Option<PeerNode> {
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|p| p.discovery_addr == addr)
            .cloned()
    }

    pub fn by_response_addr(&self, addr: SocketAddr) -> Option<PeerNode> {
        self.peers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|p| p.response_addr == addr)
            .cloned()
    }

    /// Resolve the origin of a datagram that may come from a peer's send socket.
    ///
    /// Matches the exact discovery address first. Otherwise falls back to the
    /// IP alone, but only if exactly one known peer uses that IP.
    pub fn resolve_sender(&self, source: SocketAddr) -> Option<PeerNode> {
        let peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(peer) = peers.iter().find(|p| p.discovery_addr == source) {
            return Some(peer.clone());
        }

        let mut same_ip = peers
            .iter()
            .filter(|p| p.discovery_addr.ip() == source.ip());
        match (same_ip.next(), same_ip.next()) {
            (Some(peer), None) => Some(peer.clone()),
            _ => None,
        }
    }

    /// Copy of all peers, in insertion order.
    pub fn snapshot(&self) -> Vec<PeerNode> {
        self.peers.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
