//! Traffic counters for one service instance.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    beacons_sent: AtomicU64,
    responses_sent: AtomicU64,
    user_messages_sent: AtomicU64,
    send_failures: AtomicU64,
    receive_failures: AtomicU64,
    datagrams_received: AtomicU64,
    datagrams_dropped: AtomicU64,
}

/// Point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub beacons_sent: u64,
    pub responses_sent: u64,
    pub user_messages_sent: u64,
    pub send_failures: u64,
    pub receive_failures: u64,
    pub datagrams_received: u64,
    /// Foreign, malformed or unresolvable datagrams
    pub datagrams_dropped: u64,
}

impl Stats {
    pub fn beacon_sent(&self) {
        self.beacons_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_sent(&self) {
        self.responses_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn user_message_sent(&self) {
        self.user_messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_failed(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn receive_failed(&self) {
        self.receive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn datagram_received(&self) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn datagram_dropped(&self) {
        self.datagrams_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            beacons_sent: self.beacons_sent.load(Ordering::Relaxed),
            responses_sent: self.responses_sent.load(Ordering::Relaxed),
            user_messages_sent: self.user_messages_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            receive_failures: self.receive_failures.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            datagrams_dropped: self.datagrams_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = Stats::default();
        stats.beacon_sent();
        stats.beacon_sent();
        stats.datagram_dropped();

        let snap = stats.snapshot();
        assert_eq!(snap.beacons_sent, 2);
        assert_eq!(snap.datagrams_dropped, 1);
        assert_eq!(snap.send_failures, 0);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let json = serde_json::to_string(&StatsSnapshot::default()).unwrap();
        assert!(json.contains("\"beaconsSent\":0"));
        assert!(json.contains("\"datagramsDropped\":0"));
    }
}
