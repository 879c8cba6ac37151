//! Receiver loop: answers beacons, tracks responses and leave notices,
//! and forwards user messages from known peers.
//!
//! Datagrams that are malformed, belong to another cluster, or come from an
//! unknown sender are dropped at `trace` level. Nothing a foreign host sends
//! can stop the loop.

use crate::node::Node;
use discovery_core::protocol::MESSAGE_SIZE;
use discovery_core::{Announcement, ClusterView, Message};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Run until `shutdown` flips to `true` (or its sender goes away).
pub async fn run(node: Arc<Node>, mut shutdown: watch::Receiver<bool>) {
    // One spare byte so oversized datagrams are detected instead of truncated to fit
    let mut buf = vec![0u8; MESSAGE_SIZE + 1];
    let timeout = node.config.receive_timeout;

    loop {
        let received = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            result = node.transport.recv_from(&mut buf, timeout) => result,
        };

        match received {
            Ok(Some((len, source))) => {
                node.stats.datagram_received();
                handle_datagram(&node, &buf[..len], source).await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Receive failed: {}", e);
                node.stats.receive_failed();
            }
        }
    }

    debug!("Receiver stopped");
}

/// Dispatch one received datagram.
pub(crate) async fn handle_datagram(node: &Node, data: &[u8], source: SocketAddr) {
    let message = match Message::decode(data) {
        Ok(message) => message,
        Err(e) => {
            trace!("Dropping datagram from {}: {}", source, e);
            node.stats.datagram_dropped();
            return;
        }
    };

    match message {
        Message::Beacon(announcement) => {
            if !same_cluster(node, &announcement, source, "beacon") {
                return;
            }
            let response = Message::Response(node.announcement());
            if node.send(&response, source).await {
                node.stats.response_sent();
            }
            node.record_peer(source, announcement.response_addr);
        }
        Message::Response(announcement) => {
            if !same_cluster(node, &announcement, source, "response") {
                return;
            }
            node.record_peer(source, announcement.response_addr);
        }
        Message::Leave(announcement) => {
            if !same_cluster(node, &announcement, source, "leave") {
                return;
            }
            node.forget_peer(source);
        }
        Message::User { msg_type, payload } => match node.table.resolve_sender(source) {
            Some(peer) => {
                node.notifier
                    .user_message(node, peer.discovery_addr, msg_type, payload.as_bytes());
            }
            None => {
                trace!("Dropping user message {} from unknown sender {}", msg_type, source);
                node.stats.datagram_dropped();
            }
        },
    }
}

fn same_cluster(node: &Node, announcement: &Announcement, source: SocketAddr, kind: &str) -> bool {
    if announcement.cluster == *node.cluster_name() {
        return true;
    }
    trace!(
        "Dropping {} from {} for cluster {}",
        kind,
        source,
        announcement.cluster
    );
    node.stats.datagram_dropped();
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testing::MemoryTransport;
    use crate::stats::Stats;
    use discovery_core::protocol::{MAX_USER_DATA, MSG_TYPE_RESPONSE};
    use discovery_core::{
        ClusterName, DiscoveryConfig, DiscoveryEvent, EventNotifier, NodeLostReason, Subscription,
    };
    use std::sync::Mutex;
    use std::time::Duration;

    struct Harness {
        node: Arc<Node>,
        transport: Arc<MemoryTransport>,
        events: Arc<Mutex<Vec<DiscoveryEvent>>>,
        _sub: Subscription,
    }

    fn harness() -> Harness {
        let config = DiscoveryConfig::new(
            "testnet",
            "10.0.0.9:7000".parse().unwrap(),
            "10.0.0.255".parse().unwrap(),
        )
        .with_receive_timeout(Duration::from_millis(10))
        .validate()
        .unwrap();
        let transport = Arc::new(MemoryTransport::new("10.0.0.9:28181"));
        let notifier = Arc::new(EventNotifier::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let sub = notifier.subscribe_fn(move |event| {
            events_clone.lock().unwrap().push(event.clone());
        });
        let node = Arc::new(Node::new(
            config,
            transport.local,
            Arc::clone(&transport) as Arc<dyn discovery_core::DatagramTransport>,
            notifier,
            Arc::new(Stats::default()),
        ));
        Harness {
            node,
            transport,
            events,
            _sub: sub,
        }
    }

    fn announce(cluster: &str, response: &str) -> Announcement {
        Announcement::new(ClusterName::new(cluster).unwrap(), response.parse().unwrap())
    }

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    // ========================================================================
    // Beacons and responses
    // ========================================================================

    #[tokio::test]
    async fn test_beacon_gets_response_and_fires_found_once() {
        let h = harness();
        let beacon = Message::Beacon(announce("testnet", "10.0.0.1:7000")).encode();

        handle_datagram(&h.node, &beacon, addr("10.0.0.1:28181")).await;
        handle_datagram(&h.node, &beacon, addr("10.0.0.1:28181")).await;

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, addr("10.0.0.1:28181"));
        match Message::decode(&sent[0].0).unwrap() {
            Message::Response(a) => {
                assert_eq!(a.cluster.as_str(), "testnet");
                assert_eq!(a.response_addr, addr("10.0.0.9:7000"));
            }
            other => panic!("Expected response, got {:?}", other),
        }
        assert_eq!(u16::from_be_bytes([sent[0].0[2], sent[0].0[3]]), MSG_TYPE_RESPONSE);

        let events = h.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            DiscoveryEvent::NodeFound { peer } => {
                assert_eq!(peer.discovery_addr, addr("10.0.0.1:28181"));
                assert_eq!(peer.response_addr, addr("10.0.0.1:7000"));
            }
            other => panic!("Expected NodeFound, got {:?}", other),
        }
        assert_eq!(h.node.stats.snapshot().responses_sent, 2);
    }

    #[tokio::test]
    async fn test_response_registers_peer_without_reply() {
        let h = harness();
        let response = Message::Response(announce("testnet", "10.0.0.2:7000")).encode();

        handle_datagram(&h.node, &response, addr("10.0.0.2:28181")).await;

        assert!(h.transport.sent().is_empty());
        assert_eq!(h.node.count_peers(), 1);
        assert_eq!(h.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_cluster_is_ignored() {
        let h = harness();
        let beacon = Message::Beacon(announce("othernet", "10.0.0.1:7000")).encode();

        handle_datagram(&h.node, &beacon, addr("10.0.0.1:28181")).await;

        assert!(h.transport.sent().is_empty());
        assert_eq!(h.node.count_peers(), 0);
        assert!(h.events.lock().unwrap().is_empty());
        assert_eq!(h.node.stats.snapshot().datagrams_dropped, 1);
    }

    #[tokio::test]
    async fn test_malformed_datagrams_are_dropped() {
        let h = harness();
        let mut bad_magic = Message::Beacon(announce("testnet", "10.0.0.1:7000")).encode();
        bad_magic[0] ^= 0xFF;

        handle_datagram(&h.node, &bad_magic, addr("10.0.0.1:28181")).await;
        handle_datagram(&h.node, b"hello", addr("10.0.0.1:28181")).await;
        handle_datagram(&h.node, &[0u8; MESSAGE_SIZE + 1], addr("10.0.0.1:28181")).await;

        assert_eq!(h.node.count_peers(), 0);
        assert_eq!(h.node.stats.snapshot().datagrams_dropped, 3);
    }

    // ========================================================================
    // Leave notices
    // ========================================================================

    #[tokio::test]
    async fn test_leave_removes_peer_and_fires_explicit_lost() {
        let h = harness();
        let source = addr("10.0.0.3:28181");
        let response = Message::Response(announce("testnet", "10.0.0.3:7000")).encode();
        let leave = Message::Leave(announce("testnet", "10.0.0.3:7000")).encode();

        handle_datagram(&h.node, &response, source).await;
        handle_datagram(&h.node, &leave, source).await;
        handle_datagram(&h.node, &leave, source).await;

        assert_eq!(h.node.count_peers(), 0);
        let events = h.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            DiscoveryEvent::NodeLost {
                reason: NodeLostReason::Explicit,
                ..
            }
        ));
    }

    // ========================================================================
    // User messages
    // ========================================================================

    #[tokio::test]
    async fn test_user_message_from_known_peer_send_socket() {
        let h = harness();
        let response = Message::Response(announce("testnet", "10.0.0.4:7000")).encode();
        handle_datagram(&h.node, &response, addr("10.0.0.4:28181")).await;

        let user = Message::user(20, b"hello").unwrap().encode();
        handle_datagram(&h.node, &user, addr("10.0.0.4:40000")).await;

        let events = h.events.lock().unwrap();
        match &events[1] {
            DiscoveryEvent::UserMessage {
                sender,
                msg_type,
                payload,
            } => {
                assert_eq!(*sender, addr("10.0.0.4:28181"));
                assert_eq!(*msg_type, 20);
                assert_eq!(payload.len(), MAX_USER_DATA);
                assert_eq!(&payload[..5], b"hello");
            }
            other => panic!("Expected UserMessage, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_user_message_from_unknown_sender_dropped() {
        let h = harness();
        let user = Message::user(16, b"hi").unwrap().encode();

        handle_datagram(&h.node, &user, addr("10.0.0.5:40000")).await;

        assert!(h.events.lock().unwrap().is_empty());
        assert_eq!(h.node.stats.snapshot().datagrams_dropped, 1);
    }

    // ========================================================================
    // Loop
    // ========================================================================

    #[tokio::test]
    async fn test_loop_processes_inbox_and_stops() {
        let h = harness();
        h.transport.inbox.lock().unwrap().push_back((
            Message::Beacon(announce("testnet", "10.0.0.6:7000"))
                .encode()
                .to_vec(),
            addr("10.0.0.6:28181"),
        ));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run(Arc::clone(&h.node), rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("receiver should stop promptly")
            .unwrap();

        assert_eq!(h.node.count_peers(), 1);
        assert_eq!(h.node.stats.snapshot().datagrams_received, 1);
    }
}
