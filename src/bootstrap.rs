use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use structopt::StructOpt;
use tokio::sync::watch;
use tonic::transport::Server;

use chat_proto::chat::chat_client_service_server::ChatClientServiceServer;
use chat_proto::chat::election_service_server::ElectionServiceServer;
use chat_proto::chat::sync_service_server::SyncServiceServer;

use crate::broadcast::BroadcastEngine;
use crate::clock::LamportClock;
use crate::election::ElectionEngine;
use crate::error::{ChatError, Result};
use crate::failure_detector::FailureDetector;
use crate::registry::{PeerAddress, PeerRegistry, ServerId};
use crate::rpc::{ChatService, TonicPeerTransport};
use crate::subscriber::SubscriberRegistry;
use crate::timing::Timing;
use crate::transport::PeerTransport;

/// Startup configuration: own server identifier, own listen port, and the
/// peer list string. Parsing the peer list belongs to this collaborator,
/// not the Peer Registry.
#[derive(Debug, StructOpt)]
#[structopt(name = "bullychat-server", about = "Replicated broadcast chat cluster replica")]
pub struct Opt {
    /// Unique server identifier. Used as the Bully tie-breaker: the
    /// highest live id always wins an election.
    #[structopt(long)]
    pub id: ServerId,

    /// Port this replica listens on.
    #[structopt(long, default_value = "50051")]
    pub port: u16,

    /// Host this replica advertises to peers and clients. The listener
    /// itself binds `0.0.0.0:<port>`; this is only the address handed out
    /// in `GetLeader`/`REDIRECT` responses and peer lookups.
    #[structopt(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Peer list: "id:host:port[,id:host:port]*". Entries matching --id
    /// are dropped.
    #[structopt(long, default_value = "")]
    pub peers: String,

    /// Override the reference `heartbeat_interval` (default 2s) so tests
    /// and demos can run the protocol faster than real time.
    #[structopt(long)]
    pub heartbeat_interval_ms: Option<u64>,

    /// Override the reference `election_timeout` (default 3s).
    #[structopt(long)]
    pub election_timeout_ms: Option<u64>,

    /// Override the reference `coordinator_timeout` (default 5s).
    #[structopt(long)]
    pub coordinator_timeout_ms: Option<u64>,
}

fn timing_from_opt(opt: &Opt) -> Timing {
    let mut timing = Timing::default();
    if let Some(ms) = opt.heartbeat_interval_ms {
        timing.heartbeat_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = opt.election_timeout_ms {
        timing.election_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = opt.coordinator_timeout_ms {
        timing.coordinator_timeout = Duration::from_millis(ms);
    }
    timing
}

/// Parses `"id:host:port[,id:host:port]*"`, dropping any entry whose id
/// matches `self_id`. Malformed entries are logged at `warn!` and skipped;
/// they do not abort startup.
pub fn parse_peers(peers_str: &str, self_id: ServerId) -> HashMap<ServerId, PeerAddress> {
    let mut peers = HashMap::new();
    if peers_str.trim().is_empty() {
        return peers;
    }
    for entry in peers_str.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let parts: Vec<&str> = entry.splitn(3, ':').collect();
        if parts.len() != 3 {
            warn!("skipping malformed peer entry {:?}: expected id:host:port", entry);
            continue;
        }
        let id: ServerId = match parts[0].parse() {
            Ok(id) => id,
            Err(_) => {
                warn!("skipping malformed peer entry {:?}: non-numeric id", entry);
                continue;
            }
        };
        if id == self_id {
            continue;
        }
        peers.insert(id, format!("{}:{}", parts[1], parts[2]));
    }
    peers
}

/// Constructs the shared core state, launches the failure-detector and
/// initial-election background tasks, and serves the three RPC service
/// groups until shutdown.
pub struct Supervisor {
    stop_tx: watch::Sender<bool>,
}

impl Supervisor {
    /// Runs the server to completion: blocks until Ctrl-C (or another
    /// process-level shutdown trigger), then drains the heartbeat loop and
    /// every subscription stream via the shared stop signal.
    pub async fn run(opt: Opt) -> Result<()> {
        let self_id = opt.id;
        let timing = timing_from_opt(&opt);
        let self_address = format!("{}:{}", opt.host, opt.port);
        let peers = parse_peers(&opt.peers, self_id);

        info!("server {}: peers {:?}", self_id, peers);

        let registry = Arc::new(PeerRegistry::new(self_id, self_address.clone(), peers));
        let clock = Arc::new(LamportClock::new());
        let transport: Arc<dyn PeerTransport> = Arc::new(TonicPeerTransport::new(registry.clone()));
        let election = ElectionEngine::new(self_id, registry.clone(), clock.clone(), transport.clone(), timing.clone());
        election.set_on_leader_change(move |leader| {
            info!("server {}: cluster leader is now {}", self_id, leader);
        });

        let subscribers = Arc::new(SubscriberRegistry::new());
        let broadcast = Arc::new(BroadcastEngine::new(clock.clone(), subscribers.clone()));

        let (stop_tx, stop_rx) = watch::channel(false);

        let detector = FailureDetector::new(registry.clone(), election.clone(), transport, timing.clone());
        tokio::spawn(detector.run(stop_rx.clone()));

        {
            // Initial election on join: give the listener a moment to come
            // up before challenging peers.
            let election = election.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                election.start_election().await;
            });
        }

        let service = ChatService::new(
            election,
            registry,
            subscribers,
            broadcast,
            clock,
            timing,
            stop_rx,
        );

        let addr: SocketAddr = format!("0.0.0.0:{}", opt.port)
            .parse()
            .map_err(|e| ChatError::Protocol(format!("invalid listen port {}: {}", opt.port, e)))?;

        info!("server {}: listening on {} (advertised as {})", self_id, addr, self_address);

        Server::builder()
            .add_service(ChatClientServiceServer::new(service.clone()))
            .add_service(ElectionServiceServer::new(service.clone()))
            .add_service(SyncServiceServer::new(service))
            .serve_with_shutdown(addr, async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("server {}: shutting down", self_id);
                let _ = stop_tx.send(true);
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_peer_list() {
        let peers = parse_peers("1:127.0.0.1:9001,2:127.0.0.1:9002", 3);
        assert_eq!(peers.len(), 2);
        assert_eq!(peers.get(&1), Some(&"127.0.0.1:9001".to_string()));
        assert_eq!(peers.get(&2), Some(&"127.0.0.1:9002".to_string()));
    }

    #[test]
    fn drops_entry_matching_self_id() {
        let peers = parse_peers("1:127.0.0.1:9001,3:127.0.0.1:9003", 3);
        assert_eq!(peers.len(), 1);
        assert!(!peers.contains_key(&3));
    }

    #[test]
    fn empty_peer_string_yields_empty_map() {
        assert!(parse_peers("", 1).is_empty());
    }

    #[test]
    fn malformed_entry_is_skipped_not_fatal() {
        let peers = parse_peers("oops,1:127.0.0.1:9001", 3);
        assert_eq!(peers.len(), 1);
    }
}
