//! `DiscoveryService`: the public facade over one discovery node.
//!
//! Owns the configuration, the listener registry and the traffic counters
//! for its whole lifetime. Everything tied to a bound discovery socket lives
//! in a `Node` that exists only between `start()` and `stop()`.

use crate::broadcaster::{self, LoopState};
use crate::node::Node;
use crate::receiver;
use crate::stats::{Stats, StatsSnapshot};
use crate::udp::UdpTransportFactory;
use discovery_core::{
    ClusterView, DatagramTransport, DiscoveryConfig, DiscoveryError, DiscoveryEvent,
    DiscoveryListener, EventNotifier, Message, PeerNode, Subscription, TransportFactory,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{watch, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

type Result<T> = std::result::Result<T, DiscoveryError>;

/// Handles of a running node.
struct Running {
    shutdown_tx: watch::Sender<bool>,
    broadcaster: JoinHandle<()>,
    receiver: JoinHandle<()>,
}

pub struct DiscoveryService {
    config: DiscoveryConfig,
    factory: Arc<dyn TransportFactory>,
    notifier: Arc<EventNotifier>,
    stats: Arc<Stats>,
    /// Current node, readable without awaiting
    node: RwLock<Option<Arc<Node>>>,
    /// Serializes start and stop
    running: Mutex<Option<Running>>,
    /// Send socket for user messages, bound on first use
    user_socket: OnceCell<Arc<dyn DatagramTransport>>,
    started: AtomicBool,
}

impl DiscoveryService {
    /// Create a stopped service using UDP sockets.
    pub fn new(config: DiscoveryConfig) -> Self {
        Self::with_transport_factory(config, Arc::new(UdpTransportFactory))
    }

    pub fn with_transport_factory(
        config: DiscoveryConfig,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            config,
            factory,
            notifier: Arc::new(EventNotifier::new()),
            stats: Arc::new(Stats::default()),
            node: RwLock::new(None),
            running: Mutex::new(None),
            user_socket: OnceCell::new(),
            started: AtomicBool::new(false),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Bind the discovery socket and start both loops.
    ///
    /// On error nothing is left running.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(DiscoveryError::AlreadyRunning);
        }

        let config = self.config.validate()?;
        let transport = self.factory.bind(config.bind_addr).await?;
        transport.enable_broadcast()?;
        let bind_addr = transport.local_addr()?;

        info!(
            "Starting discovery for cluster '{}' on {} (broadcast {})",
            config.cluster_name, bind_addr, config.broadcast_addr
        );

        let node = Arc::new(Node::new(
            config,
            bind_addr,
            transport,
            Arc::clone(&self.notifier),
            Arc::clone(&self.stats),
        ));
        *self.node.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&node));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let broadcaster = tokio::spawn(broadcaster::run(Arc::clone(&node), shutdown_rx.clone()));
        let receiver = tokio::spawn(receiver::run(node, shutdown_rx));

        *running = Some(Running {
            shutdown_tx,
            broadcaster,
            receiver,
        });
        self.started.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Stop both loops and wait for them to finish.
    ///
    /// Returns `false` if a loop panicked. Stopping a stopped service is a
    /// no-op that returns `true`. The peer table is discarded without
    /// firing lost events.
    pub async fn stop(&self) -> bool {
        let mut running = self.running.lock().await;
        let Some(Running {
            shutdown_tx,
            broadcaster,
            receiver,
        }) = running.take()
        else {
            return true;
        };

        let _ = shutdown_tx.send(true);
        let (broadcaster, receiver) = tokio::join!(broadcaster, receiver);

        let mut clean = true;
        if let Err(e) = broadcaster {
            error!("Broadcaster terminated abnormally: {}", e);
            clean = false;
        }
        if let Err(e) = receiver {
            error!("Receiver terminated abnormally: {}", e);
            clean = false;
        }

        if let Some(node) = self.node.write().unwrap_or_else(|e| e.into_inner()).take() {
            let dropped = node.table.clear();
            debug!("Discarded {} peer(s)", dropped.len());
        }

        info!("Discovery stopped");
        clean
    }

    pub fn is_running(&self) -> bool {
        self.current().is_some()
    }

    /// State of the broadcaster loop; `Idle` before the first start.
    pub fn broadcaster_state(&self) -> LoopState {
        match self.current() {
            Some(node) => node.broadcaster_state(),
            None if self.started.load(Ordering::Relaxed) => LoopState::Stopped,
            None => LoopState::Idle,
        }
    }

    // ========================================================================
    // User messages
    // ========================================================================

    /// Broadcast a user message to the whole subnet.
    ///
    /// Returns the number of failed transmissions.
    pub async fn send_user_message(&self, msg_type: u16, body: &[u8]) -> Result<u32> {
        let target = self.config.validate()?.broadcast_addr;
        let message = Message::user(msg_type, body)?;
        Ok(self.transmit(&message, target).await)
    }

    /// Send a user message to one node.
    ///
    /// `target` is matched against the response addresses of known peers
    /// first. Otherwise it is used as a discovery address as given.
    pub async fn send_user_message_to(
        &self,
        target: SocketAddr,
        msg_type: u16,
        body: &[u8],
    ) -> Result<u32> {
        self.config.validate()?;
        let message = Message::user(msg_type, body)?;
        let destination = self
            .peer_by_response_addr(target)
            .map(|peer| peer.discovery_addr)
            .unwrap_or(target);
        Ok(self.transmit(&message, destination).await)
    }

    async fn transmit(&self, message: &Message, target: SocketAddr) -> u32 {
        let socket = match self.user_socket().await {
            Ok(socket) => socket,
            Err(e) => {
                error!("Cannot open user message socket: {}", e);
                self.stats.send_failed();
                return 1;
            }
        };

        match socket.send_to(&message.encode(), target).await {
            Ok(_) => {
                self.stats.user_message_sent();
                debug!("User message {} sent to {}", message.msg_type(), target);
                0
            }
            Err(e) => {
                error!("Failed to send user message to {}: {}", target, e);
                self.stats.send_failed();
                1
            }
        }
    }

    async fn user_socket(&self) -> Result<&Arc<dyn DatagramTransport>> {
        self.user_socket
            .get_or_try_init(|| async {
                let addr = SocketAddr::new(self.config.bind_ip, 0);
                let socket = self.factory.bind(addr).await?;
                socket.enable_broadcast()?;
                debug!("User message socket bound to {}", socket.local_addr()?);
                Ok(socket)
            })
            .await
    }

    // ========================================================================
    // Peers and listeners
    // ========================================================================

    fn current(&self) -> Option<Arc<Node>> {
        self.node.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of known peers. Zero while stopped.
    pub fn count_peers(&self) -> usize {
        self.current().map_or(0, |node| node.count_peers())
    }

    /// Peer at `index`, in discovery order.
    pub fn peer(&self, index: usize) -> Result<PeerNode> {
        match self.current() {
            Some(node) => node.peer(index),
            None => Err(DiscoveryError::PeerIndexOutOfRange { index, count: 0 }),
        }
    }

    pub fn peers(&self) -> Vec<PeerNode> {
        self.current().map(|node| node.peers()).unwrap_or_default()
    }

    pub fn peer_by_response_addr(&self, addr: SocketAddr) -> Option<PeerNode> {
        self.current()?.table.by_response_addr(addr)
    }

    pub fn subscribe(&self, listener: Arc<dyn DiscoveryListener>) -> Subscription {
        self.notifier.subscribe(listener)
    }

    pub fn subscribe_fn(
        &self,
        callback: impl Fn(&DiscoveryEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.notifier.subscribe_fn(callback)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn cluster_name(&self) -> &str {
        &self.config.cluster_name
    }

    pub fn response_addr(&self) -> SocketAddr {
        self.config.response_addr
    }

    /// Bound discovery address while running.
    pub fn bind_addr(&self) -> Option<SocketAddr> {
        self.current().map(|node| node.bind_addr)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.shutdown_tx.send(true);
            running.broadcaster.abort();
            running.receiver.abort();
        }
    }
}
