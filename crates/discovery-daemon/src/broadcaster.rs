//! Broadcaster loop: ages the peer table, sends beacons, says goodbye.

use crate::node::Node;
use discovery_core::Message;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Lifecycle of the broadcaster loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Run until `shutdown` flips to `true` (or its sender goes away).
///
/// Each cycle first evicts peers that used up their response chances, then
/// broadcasts one beacon, then sleeps for the request interval. The sleep
/// is raced against the shutdown signal.
pub async fn run(node: Arc<Node>, mut shutdown: watch::Receiver<bool>) {
    node.set_broadcaster_state(LoopState::Running);
    let interval = node.config.request_interval;
    let target = node.config.broadcast_addr;
    let beacon = Message::Beacon(node.announcement());

    loop {
        if *shutdown.borrow() {
            break;
        }

        node.expire_silent_peers();

        if node.send(&beacon, target).await {
            node.stats.beacon_sent();
            debug!("Beacon sent to {}", target);
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }

    node.set_broadcaster_state(LoopState::Stopping);
    if node.config.send_leave_on_stop {
        let leave = Message::Leave(node.announcement());
        if node.send(&leave, target).await {
            info!("Sent leave notice to {}", target);
        }
    }
    node.set_broadcaster_state(LoopState::Stopped);
}
