//! Membership event notification.
//!
//! Provides the `DiscoveryListener` trait, the `DiscoveryEvent` value type for
//! closure subscribers, and `EventNotifier` which fans events out to every
//! registered listener.
//!
//! Delivery is synchronous on whichever loop detected the event (broadcaster
//! or receiver), so listeners may be called concurrently from two tasks.
//! Implementations must be reentrant or hand work off themselves.

use crate::config::ClusterName;
use crate::error::DiscoveryError;
use crate::peers::PeerNode;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Why a peer left the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeLostReason {
    /// Peer used up its response chances
    Timeout,
    /// Peer sent a leave notice
    Explicit,
}

/// Membership events as plain values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DiscoveryEvent {
    /// A peer answered for the first time.
    NodeFound { peer: PeerNode },
    /// A peer was evicted or left.
    NodeLost {
        peer: PeerNode,
        reason: NodeLostReason,
    },
    /// A known peer sent a user message.
    UserMessage {
        /// Discovery address of the sending peer
        sender: SocketAddr,
        #[serde(rename = "messageType")]
        msg_type: u16,
        /// Full zero-padded payload
        payload: Vec<u8>,
    },
}

/// Read access to the service that raised an event.
pub trait ClusterView: Send + Sync {
    fn cluster_name(&self) -> &ClusterName;

    fn response_addr(&self) -> SocketAddr;

    /// Address the discovery socket is bound to.
    fn bind_addr(&self) -> SocketAddr;

    fn count_peers(&self) -> usize;

    /// Peer at `index`, or a range error outside `[0, count_peers())`.
    fn peer(&self, index: usize) -> Result<PeerNode, DiscoveryError>;

    fn peers(&self) -> Vec<PeerNode>;
}

/// Observer for membership changes and user messages.
///
/// All methods default to doing nothing.
pub trait DiscoveryListener: Send + Sync {
    fn on_node_found(&self, _source: &dyn ClusterView, _peer: &PeerNode) {}

    fn on_node_lost(&self, _source: &dyn ClusterView, _peer: &PeerNode, _reason: NodeLostReason) {}

    fn on_user_message(
        &self,
        _source: &dyn ClusterView,
        _sender: SocketAddr,
        _msg_type: u16,
        _payload: &[u8],
    ) {
    }
}

/// Adapts a closure over `DiscoveryEvent` to the listener trait.
struct FnListener<F>(F);

impl<F> DiscoveryListener for FnListener<F>
where
    F: Fn(&DiscoveryEvent) + Send + Sync,
{
    fn on_node_found(&self, _source: &dyn ClusterView, peer: &PeerNode) {
        (self.0)(&DiscoveryEvent::NodeFound { peer: peer.clone() });
    }

    fn on_node_lost(&self, _source: &dyn ClusterView, peer: &PeerNode, reason: NodeLostReason) {
        (self.0)(&DiscoveryEvent::NodeLost {
            peer: peer.clone(),
            reason,
        });
    }

    fn on_user_message(
        &self,
        _source: &dyn ClusterView,
        sender: SocketAddr,
        msg_type: u16,
        payload: &[u8],
    ) {
        (self.0)(&DiscoveryEvent::UserMessage {
            sender,
            msg_type,
            payload: payload.to_vec(),
        });
    }
}

/// Subscription handle that unregisters its listener when dropped.
///
/// Hold this value to keep receiving events, drop it (or call
/// [`Subscription::unsubscribe`]) to stop.
pub struct Subscription {
    notifier: Weak<EventNotifier>,
    id: usize,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(notifier) = self.notifier.upgrade() {
            notifier.unsubscribe(self.id);
        }
    }
}

/// Fan-out of events to registered listeners.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct EventNotifier {
    listeners: RwLock<Vec<(usize, Arc<dyn DiscoveryListener>)>>,
    next_id: AtomicUsize,
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Returns `Subscription` that unregisters on drop.
    pub fn subscribe(self: &Arc<Self>, listener: Arc<dyn DiscoveryListener>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        Subscription {
            notifier: Arc::downgrade(self),
            id,
        }
    }

    /// Register a closure receiving every event as a `DiscoveryEvent`.
    pub fn subscribe_fn(
        self: &Arc<Self>,
        callback: impl Fn(&DiscoveryEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe(Arc::new(FnListener(callback)))
    }

    fn unsubscribe(&self, id: usize) {
        // emit holds the read lock only while cloning, never across callbacks
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(i, _)| *i != id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Clone the listener list so callbacks may subscribe or unsubscribe.
    fn snapshot(&self) -> Vec<Arc<dyn DiscoveryListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }

    pub fn node_found(&self, source: &dyn ClusterView, peer: &PeerNode) {
        tracing::info!(
            "Node found: {} (response address {})",
            peer.discovery_addr,
            peer.response_addr
        );
        for listener in self.snapshot() {
            listener.on_node_found(source, peer);
        }
    }

    pub fn node_lost(&self, source: &dyn ClusterView, peer: &PeerNode, reason: NodeLostReason) {
        tracing::info!("Node lost: {} ({:?})", peer.discovery_addr, reason);
        for listener in self.snapshot() {
            listener.on_node_lost(source, peer, reason);
        }
    }

    pub fn user_message(
        &self,
        source: &dyn ClusterView,
        sender: SocketAddr,
        msg_type: u16,
        payload: &[u8],
    ) {
        tracing::debug!("User message {} from {}", msg_type, sender);
        for listener in self.snapshot() {
            listener.on_user_message(source, sender, msg_type, payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StaticView {
        name: ClusterName,
    }

    impl ClusterView for StaticView {
        fn cluster_name(&self) -> &ClusterName {
            &self.name
        }

        fn response_addr(&self) -> SocketAddr {
            "127.0.0.1:12345".parse().unwrap()
        }

        fn bind_addr(&self) -> SocketAddr {
            "127.0.0.1:28181".parse().unwrap()
        }

        fn count_peers(&self) -> usize {
            0
        }

        fn peer(&self, index: usize) -> Result<PeerNode, DiscoveryError> {
            Err(DiscoveryError::PeerIndexOutOfRange { index, count: 0 })
        }

        fn peers(&self) -> Vec<PeerNode> {
            Vec::new()
        }
    }

    fn view() -> StaticView {
        StaticView {
            name: ClusterName::new("testnet").unwrap(),
        }
    }

    fn peer() -> PeerNode {
        PeerNode {
            discovery_addr: "10.0.0.1:28181".parse().unwrap(),
            response_addr: "10.0.0.1:12345".parse().unwrap(),
            response_chances: 1,
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        calls: Mutex<Vec<String>>,
    }

    impl DiscoveryListener for RecordingListener {
        fn on_node_found(&self, source: &dyn ClusterView, peer: &PeerNode) {
            self.calls.lock().unwrap().push(format!(
                "found {} in {}",
                peer.discovery_addr,
                source.cluster_name()
            ));
        }

        fn on_node_lost(&self, _source: &dyn ClusterView, peer: &PeerNode, reason: NodeLostReason) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("lost {} {:?}", peer.discovery_addr, reason));
        }
    }

    #[test]
    fn test_listener_receives_each_event_once() {
        let notifier = Arc::new(EventNotifier::new());
        let listener = Arc::new(RecordingListener::default());
        let _sub = notifier.subscribe(listener.clone());

        notifier.node_found(&view(), &peer());
        notifier.node_lost(&view(), &peer(), NodeLostReason::Timeout);

        let calls = listener.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                "found 10.0.0.1:28181 in testnet".to_string(),
                "lost 10.0.0.1:28181 Timeout".to_string(),
            ]
        );
    }

    #[test]
    fn test_default_methods_ignore_user_messages() {
        let notifier = Arc::new(EventNotifier::new());
        let listener = Arc::new(RecordingListener::default());
        let _sub = notifier.subscribe(listener.clone());

        notifier.user_message(&view(), peer().discovery_addr, 16, b"hello");

        assert!(listener.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let notifier = Arc::new(EventNotifier::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        {
            let _sub = notifier.subscribe_fn(move |_event| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            });
            notifier.node_found(&view(), &peer());
            assert_eq!(count.load(Ordering::Relaxed), 1);
        }

        notifier.node_found(&view(), &peer());
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(notifier.listener_count(), 0);
    }

    #[test]
    fn test_partial_unsubscribe() {
        let notifier = Arc::new(EventNotifier::new());
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        let count1_clone = Arc::clone(&count1);
        let count2_clone = Arc::clone(&count2);

        let sub1 = notifier.subscribe_fn(move |_| {
            count1_clone.fetch_add(1, Ordering::Relaxed);
        });
        let _sub2 = notifier.subscribe_fn(move |_| {
            count2_clone.fetch_add(1, Ordering::Relaxed);
        });

        notifier.node_found(&view(), &peer());
        sub1.unsubscribe();
        notifier.node_found(&view(), &peer());

        assert_eq!(count1.load(Ordering::Relaxed), 1);
        assert_eq!(count2.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_closure_receives_event_values() {
        let notifier = Arc::new(EventNotifier::new());
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);

        let _sub = notifier.subscribe_fn(move |event| {
            events_clone.lock().unwrap().push(event.clone());
        });

        notifier.node_lost(&view(), &peer(), NodeLostReason::Explicit);
        notifier.user_message(&view(), peer().discovery_addr, 17, b"hi");

        let events = events.lock().unwrap();
        assert_eq!(
            events[0],
            DiscoveryEvent::NodeLost {
                peer: peer(),
                reason: NodeLostReason::Explicit
            }
        );
        assert_eq!(
            events[1],
            DiscoveryEvent::UserMessage {
                sender: peer().discovery_addr,
                msg_type: 17,
                payload: b"hi".to_vec()
            }
        );
    }

    #[test]
    fn test_unsubscribe_is_not_lost_under_concurrent_reads() {
        let notifier = Arc::new(EventNotifier::new());
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let reader = {
            let notifier = Arc::clone(&notifier);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    notifier.node_found(&view(), &peer());
                    let _ = notifier.listener_count();
                }
            })
        };

        for _ in 0..20_000 {
            let sub = notifier.subscribe_fn(|_| {});
            drop(sub);
        }
        done.store(true, Ordering::Relaxed);
        reader.join().unwrap();

        assert_eq!(notifier.listener_count(), 0);
    }

    #[test]
    fn test_listener_may_unsubscribe_during_emit() {
        let notifier = Arc::new(EventNotifier::new());
        let held: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let held_clone = Arc::clone(&held);

        let sub = notifier.subscribe_fn(move |_| {
            held_clone.lock().unwrap().take();
        });
        *held.lock().unwrap() = Some(sub);

        notifier.node_found(&view(), &peer());
        assert_eq!(notifier.listener_count(), 0);
    }

    #[test]
    fn test_listener_may_subscribe_during_emit() {
        let notifier = Arc::new(EventNotifier::new());
        let inner = Arc::clone(&notifier);
        let subs = Arc::new(Mutex::new(Vec::new()));
        let subs_clone = Arc::clone(&subs);

        let _sub = notifier.subscribe_fn(move |_| {
            subs_clone.lock().unwrap().push(inner.subscribe_fn(|_| {}));
        });

        notifier.node_found(&view(), &peer());
        assert_eq!(notifier.listener_count(), 2);
    }

    #[test]
    fn test_event_serialization() {
        let event = DiscoveryEvent::NodeLost {
            peer: peer(),
            reason: NodeLostReason::Timeout,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"nodeLost\""));
        assert!(json.contains("\"reason\":\"timeout\""));
        assert!(json.contains("\"discoveryAddr\":\"10.0.0.1:28181\""));

        let event = DiscoveryEvent::UserMessage {
            sender: peer().discovery_addr,
            msg_type: 16,
            payload: vec![1, 2],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"messageType\":16"));
        assert!(json.contains("\"payload\":[1,2]"));
    }
}
