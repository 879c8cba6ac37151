//! discovery-daemon: Runs one LAN discovery node until Ctrl+C.
//!
//! Membership changes and user messages are printed to stdout, either as
//! readable lines or as JSON (`--json`).

use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use discovery_core::{
    ClusterView, DiscoveryConfig, DiscoveryListener, NodeLostReason, PeerNode, Subscription,
};
use discovery_daemon::{load_config, DiscoveryService};

#[derive(Parser, Debug)]
#[command(name = "discovery-daemon")]
#[command(about = "LAN cluster discovery node")]
struct Args {
    /// JSON configuration file (flags override its values)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cluster name
    #[arg(short, long)]
    name: Option<String>,

    /// Response address advertised to peers (IP:port)
    #[arg(short, long)]
    response: Option<SocketAddr>,

    /// Broadcast address of the subnet
    #[arg(short, long)]
    broadcast: Option<IpAddr>,

    /// Discovery port
    #[arg(short, long)]
    port: Option<u16>,

    /// Local address to bind the discovery socket to
    #[arg(long)]
    bind_ip: Option<IpAddr>,

    /// Interval between beacons in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Beacon cycles a silent peer survives
    #[arg(long)]
    chances: Option<u32>,

    /// Do not send a leave notice on shutdown
    #[arg(long)]
    no_leave: bool,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

impl Args {
    /// Merge the config file (if any) with command-line overrides.
    fn discovery_config(&self) -> Result<DiscoveryConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => DiscoveryConfig::new(
                self.name.clone().context("--name is required without --config")?,
                self.response
                    .context("--response is required without --config")?,
                self.broadcast
                    .context("--broadcast is required without --config")?,
            ),
        };

        if let Some(name) = &self.name {
            config.cluster_name = name.clone();
        }
        if let Some(response) = self.response {
            config.response_addr = response;
        }
        if let Some(broadcast) = self.broadcast {
            config.broadcast_addr = broadcast;
        }
        if let Some(port) = self.port {
            config.bind_port = port;
        }
        if let Some(ip) = self.bind_ip {
            config.bind_ip = ip;
        }
        if let Some(ms) = self.interval_ms {
            config = config.with_request_interval(Duration::from_millis(ms));
        }
        if let Some(chances) = self.chances {
            config = config.with_response_chances(chances);
        }
        if self.no_leave {
            config = config.with_leave_on_stop(false);
        }
        Ok(config)
    }
}

/// Prints events as readable lines.
struct ConsoleListener;

impl DiscoveryListener for ConsoleListener {
    fn on_node_found(&self, source: &dyn ClusterView, peer: &PeerNode) {
        println!(
            "[{}] found {} (responds at {}), {} known",
            source.cluster_name(),
            peer.discovery_addr,
            peer.response_addr,
            source.count_peers()
        );
    }

    fn on_node_lost(&self, source: &dyn ClusterView, peer: &PeerNode, reason: NodeLostReason) {
        let why = match reason {
            NodeLostReason::Timeout => "timed out",
            NodeLostReason::Explicit => "left",
        };
        println!(
            "[{}] lost {} ({}), {} known",
            source.cluster_name(),
            peer.discovery_addr,
            why,
            source.count_peers()
        );
    }

    fn on_user_message(
        &self,
        source: &dyn ClusterView,
        sender: SocketAddr,
        msg_type: u16,
        payload: &[u8],
    ) {
        let end = payload.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        println!(
            "[{}] message {} from {}: {}",
            source.cluster_name(),
            msg_type,
            sender,
            String::from_utf8_lossy(&payload[..end])
        );
    }
}

fn subscribe_output(service: &DiscoveryService, json: bool) -> Subscription {
    if json {
        service.subscribe_fn(|event| match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to serialize event: {}", e),
        })
    } else {
        service.subscribe(Arc::new(ConsoleListener))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,discovery_daemon=debug,discovery_core=debug"
    } else {
        "info,discovery_daemon=info,discovery_core=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = args.discovery_config()?;
    info!("Cluster: {}", config.cluster_name);
    info!("Response address: {}", config.response_addr);

    let service = DiscoveryService::new(config);
    let _subscription = subscribe_output(&service, args.json);

    service
        .start()
        .await
        .context("Failed to start discovery")?;

    info!("Discovery running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    if !service.stop().await {
        warn!("Discovery loops did not shut down cleanly");
    }

    let stats = service.stats();
    info!(
        "Sent {} beacon(s) and {} response(s), dropped {} datagram(s)",
        stats.beacons_sent, stats.responses_sent, stats.datagrams_dropped
    );
    Ok(())
}
