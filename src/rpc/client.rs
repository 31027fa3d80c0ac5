use std::sync::Arc;

use async_trait::async_trait;
use tonic::transport::Channel;

use chat_proto::chat::election_service_client::ElectionServiceClient;
use chat_proto::chat::{CoordinatorRequest, ElectionRequest, HeartbeatRequest};

use crate::error::{ChatError, Result};
use crate::registry::{PeerRegistry, ServerId};
use crate::transport::PeerTransport;

/// Backs `transport::PeerTransport` with real `tonic` client connections.
/// Replicas are independent OS processes, so each call dials out over
/// HTTP2. A fresh connection per call keeps this simple and matches the
/// reference server, which opens a new channel per RPC rather than pooling
/// connections.
pub struct TonicPeerTransport {
    registry: Arc<PeerRegistry>,
}

impl TonicPeerTransport {
    pub fn new(registry: Arc<PeerRegistry>) -> Self {
        TonicPeerTransport { registry }
    }

    async fn connect(&self, peer: ServerId) -> Result<ElectionServiceClient<Channel>> {
        let addr = self
            .registry
            .address_of(peer)
            .ok_or_else(|| ChatError::Protocol(format!("no known address for peer {}", peer)))?;
        let endpoint = format!("http://{}", addr);
        Ok(ElectionServiceClient::connect(endpoint).await?)
    }
}

#[async_trait]
impl PeerTransport for TonicPeerTransport {
    async fn election(&self, peer: ServerId, candidate: ServerId, ts: u64) -> Result<(bool, u64)> {
        let mut client = self.connect(peer).await?;
        let response = client
            .election(ElectionRequest { candidate_id: candidate, lamport_timestamp: ts })
            .await?
            .into_inner();
        Ok((response.ok, response.lamport_timestamp))
    }

    async fn coordinator(&self, peer: ServerId, leader: ServerId, ts: u64) -> Result<()> {
        let mut client = self.connect(peer).await?;
        client
            .coordinator(CoordinatorRequest { leader_id: leader, lamport_timestamp: ts })
            .await?;
        Ok(())
    }

    async fn heartbeat(&self, peer: ServerId, self_id: ServerId) -> Result<bool> {
        let mut client = self.connect(peer).await?;
        let response = client
            .heartbeat(HeartbeatRequest { server_id: self_id, lamport_timestamp: 0 })
            .await?
            .into_inner();
        Ok(response.alive)
    }
}
