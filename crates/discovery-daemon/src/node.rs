//! State shared by the broadcaster and receiver loops of one running service.
//!
//! A `Node` lives from `start()` to `stop()`. It owns the bound discovery
//! transport and the peer table, and is the `ClusterView` listeners see as
//! the source of every event.

use crate::broadcaster::LoopState;
use crate::stats::Stats;
use discovery_core::{
    Announcement, ClusterName, ClusterView, DatagramTransport, DiscoveryError, EventNotifier,
    Message, NodeLostReason, PeerNode, PeerTable, Upsert, ValidatedConfig,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub struct Node {
    pub(crate) config: ValidatedConfig,
    /// Address the discovery socket is actually bound to
    pub(crate) bind_addr: SocketAddr,
    pub(crate) transport: Arc<dyn DatagramTransport>,
    pub(crate) table: PeerTable,
    pub(crate) notifier: Arc<EventNotifier>,
    pub(crate) stats: Arc<Stats>,
    /// Serializes table mutation with the events it implies
    sequencing: Mutex<()>,
    broadcaster_state: Mutex<LoopState>,
}

impl Node {
    pub fn new(
        config: ValidatedConfig,
        bind_addr: SocketAddr,
        transport: Arc<dyn DatagramTransport>,
        notifier: Arc<EventNotifier>,
        stats: Arc<Stats>,
    ) -> Self {
        let table = PeerTable::new(config.response_chances);
        Self {
            config,
            bind_addr,
            transport,
            table,
            notifier,
            stats,
            sequencing: Mutex::new(()),
            broadcaster_state: Mutex::new(LoopState::Idle),
        }
    }

    pub fn broadcaster_state(&self) -> LoopState {
        *self
            .broadcaster_state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_broadcaster_state(&self, state: LoopState) {
        debug!("Broadcaster {:?}", state);
        *self
            .broadcaster_state
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Our own announcement, as carried by beacons, responses and leave notices.
    pub(crate) fn announcement(&self) -> Announcement {
        Announcement::new(self.config.cluster_name.clone(), self.config.response_addr)
    }

    /// Send one discovery message from the discovery socket.
    ///
    /// Failures are logged and counted, never raised.
    pub(crate) async fn send(&self, message: &Message, target: SocketAddr) -> bool {
        match self.transport.send_to(&message.encode(), target).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to send {} to {}: {}", message.kind(), target, e);
                self.stats.send_failed();
                false
            }
        }
    }

    /// Insert or refresh a peer, firing `node_found` for new ones.
    pub(crate) fn record_peer(&self, discovery_addr: SocketAddr, response_addr: SocketAddr) {
        let _seq = self.sequencing.lock().unwrap_or_else(|e| e.into_inner());
        match self.table.upsert(discovery_addr, response_addr) {
            Upsert::Discovered(peer) => self.notifier.node_found(self, &peer),
            Upsert::Refreshed(peer) => {
                debug!("Refreshed peer {}", peer.discovery_addr);
            }
        }
    }

    /// Remove a peer that announced its departure.
    pub(crate) fn forget_peer(&self, discovery_addr: SocketAddr) {
        let _seq = self.sequencing.lock().unwrap_or_else(|e| e.into_inner());
        match self.table.remove(discovery_addr) {
            Some(peer) => self
                .notifier
                .node_lost(self, &peer, NodeLostReason::Explicit),
            None => debug!("Leave from unknown node {}", discovery_addr),
        }
    }

    /// Age all peers and report the ones that ran out of chances.
    pub(crate) fn expire_silent_peers(&self) {
        let _seq = self.sequencing.lock().unwrap_or_else(|e| e.into_inner());
        for peer in self.table.age_and_collect_expired() {
            self.notifier
                .node_lost(self, &peer, NodeLostReason::Timeout);
        }
    }
}

impl ClusterView for Node {
    fn cluster_name(&self) -> &ClusterName {
        &self.config.cluster_name
    }

    fn response_addr(&self) -> SocketAddr {
        self.config.response_addr
    }

    fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    fn count_peers(&self) -> usize {
        self.table.count()
    }

    fn peer(&self, index: usize) -> Result<PeerNode, DiscoveryError> {
        self.table.by_index(index)
    }

    fn peers(&self) -> Vec<PeerNode> {
        self.table.snapshot()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport for driving the loops without sockets.

    use async_trait::async_trait;
    use discovery_core::transport::{DatagramTransport, Result, TransportError};
    use std::collections::VecDeque;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::Duration;

    pub struct MemoryTransport {
        pub local: SocketAddr,
        pub sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
        pub inbox: Mutex<VecDeque<(Vec<u8>, SocketAddr)>>,
        pub fail_sends: bool,
    }

    impl MemoryTransport {
        pub fn new(local: &str) -> Self {
            Self {
                local: local.parse().unwrap(),
                sent: Mutex::new(Vec::new()),
                inbox: Mutex::new(VecDeque::new()),
                fail_sends: false,
            }
        }

        pub fn sent(&self) -> Vec<(Vec<u8>, SocketAddr)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DatagramTransport for MemoryTransport {
        fn local_addr(&self) -> Result<SocketAddr> {
            Ok(self.local)
        }

        fn enable_broadcast(&self) -> Result<()> {
            Ok(())
        }

        async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<usize> {
            if self.fail_sends {
                return Err(TransportError::Send {
                    target,
                    reason: "unreachable".into(),
                });
            }
            self.sent.lock().unwrap().push((data.to_vec(), target));
            Ok(data.len())
        }

        async fn recv_from(
            &self,
            buf: &mut [u8],
            timeout: Duration,
        ) -> Result<Option<(usize, SocketAddr)>> {
            let next = self.inbox.lock().unwrap().pop_front();
            match next {
                Some((data, from)) => {
                    let len = data.len().min(buf.len());
                    buf[..len].copy_from_slice(&data[..len]);
                    Ok(Some((len, from)))
                }
                None => {
                    tokio::time::sleep(timeout).await;
                    Ok(None)
                }
            }
        }
    }
}
