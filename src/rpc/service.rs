use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use log::{info, warn};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use chat_proto::chat::chat_client_service_server::ChatClientService;
use chat_proto::chat::election_service_server::ElectionService;
use chat_proto::chat::sync_service_server::SyncService;
use chat_proto::chat::{
    CoordinatorRequest, CoordinatorResponse, ElectionRequest, ElectionResponse, GetLeaderRequest,
    GetLeaderResponse, HeartbeatRequest, HeartbeatResponse, StatusResponse, SubscribeRequest,
    SyncStateRequest, SyncStateResponse, TextMessage as WireTextMessage,
};

use crate::broadcast::BroadcastEngine;
use crate::clock::LamportClock;
use crate::election::ElectionEngine;
use crate::registry::PeerRegistry;
use crate::subscriber::{self, SubscriberRegistry, CONTROL_SENDER};
use crate::timing::Timing;

/// Outbound channel depth for a single subscription stream's gRPC
/// transport; distinct from `SubscriberRegistry`'s internal queue (spec
/// §4.6 is silent on this, it's purely plumbing between the domain queue
/// and the `tonic` stream).
const STREAM_CHANNEL_CAPACITY: usize = 8;

/// Single type implementing all three RPC service groups
/// (`ChatClientService`, `ElectionService`, `SyncService`).
/// `tonic::Server::builder().add_service(...)` is called once per service
/// group against clones of this struct (cheap: every field is an `Arc`).
#[derive(Clone)]
pub struct ChatService {
    election: Arc<ElectionEngine>,
    registry: Arc<PeerRegistry>,
    subscribers: Arc<SubscriberRegistry>,
    broadcast: Arc<BroadcastEngine>,
    clock: Arc<LamportClock>,
    timing: Timing,
    stop_rx: watch::Receiver<bool>,
}

impl ChatService {
    pub fn new(
        election: Arc<ElectionEngine>,
        registry: Arc<PeerRegistry>,
        subscribers: Arc<SubscriberRegistry>,
        broadcast: Arc<BroadcastEngine>,
        clock: Arc<LamportClock>,
        timing: Timing,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        ChatService { election, registry, subscribers, broadcast, clock, timing, stop_rx }
    }

    fn leader_address(&self) -> Option<String> {
        self.election
            .current_leader()
            .and_then(|id| self.registry.address_of(id).cloned())
    }
}

type ResponseStream =
    Pin<Box<dyn Stream<Item = std::result::Result<WireTextMessage, Status>> + Send + 'static>>;

#[tonic::async_trait]
impl ChatClientService for ChatService {
    async fn get_leader(
        &self,
        _request: Request<GetLeaderRequest>,
    ) -> std::result::Result<Response<GetLeaderResponse>, Status> {
        let leader = self.election.current_leader();
        let (leader_id, leader_address, is_known) = match leader {
            Some(id) => (id, self.registry.address_of(id).cloned().unwrap_or_default(), true),
            None => (0, String::new(), false),
        };
        Ok(Response::new(GetLeaderResponse { leader_id, leader_address, is_known }))
    }

    type SubscribeToServerEventsStream = ResponseStream;

    /// A non-leader yields exactly one `REDIRECT:<address>` control
    /// message and closes; the leader assigns a `ClientId`, yields
    /// `ID Atribuido:<id>`, then streams the subscriber's queue until the
    /// connection dies.
    async fn subscribe_to_server_events(
        &self,
        _request: Request<SubscribeRequest>,
    ) -> std::result::Result<Response<Self::SubscribeToServerEventsStream>, Status> {
        if !self.election.is_leader() {
            let content = match self.leader_address() {
                Some(addr) => subscriber::redirect_content(&addr),
                None => subscriber::redirect_content(""),
            };
            let ts = self.clock.read();
            let (tx, rx) = mpsc::channel(1);
            let _ = tx
                .send(Ok(WireTextMessage {
                    client_id_from: CONTROL_SENDER,
                    content,
                    lamport_timestamp: ts,
                }))
                .await;
            return Ok(Response::new(Box::pin(ReceiverStream::new(rx)) as ResponseStream));
        }

        let (client_id, mut queue_rx) = self.subscribers.register();
        // Equivalent to a tick: there is no remote timestamp to compare
        // against on subscribe, so observing 0 always advances by one.
        let assigned_ts = self.clock.observe(0);
        let assigned_content = subscriber::assigned_id_content(client_id);

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let subscribers = self.subscribers.clone();
        let poll_interval = self.timing.subscriber_poll_interval;
        let mut stop_rx = self.stop_rx.clone();

        tokio::spawn(async move {
            if tx
                .send(Ok(WireTextMessage {
                    client_id_from: CONTROL_SENDER,
                    content: assigned_content,
                    lamport_timestamp: assigned_ts,
                }))
                .await
                .is_err()
            {
                subscribers.unregister(client_id);
                return;
            }

            loop {
                tokio::select! {
                    item = queue_rx.recv() => {
                        match item {
                            Some(msg) => {
                                let wire = WireTextMessage {
                                    client_id_from: msg.client_id_from,
                                    content: msg.content,
                                    lamport_timestamp: msg.lamport_timestamp,
                                };
                                if tx.send(Ok(wire)).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = tokio::time::sleep(poll_interval) => {
                        if tx.is_closed() {
                            break;
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            subscribers.unregister(client_id);
            info!("client {}: subscription stream closed", client_id);
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx)) as ResponseStream))
    }

    /// Accepted only on the leader. A non-leader returns a transport-level
    /// error rather than forwarding, so the client's usual
    /// reconnect-and-rediscover path kicks in.
    async fn send_message_to_server(
        &self,
        request: Request<WireTextMessage>,
    ) -> std::result::Result<Response<StatusResponse>, Status> {
        if !self.election.is_leader() {
            return Err(crate::error::ChatError::NotLeader.into());
        }
        let msg = request.into_inner();
        let accepted = self.broadcast.accept(msg.client_id_from, msg.content, msg.lamport_timestamp);
        Ok(Response::new(StatusResponse {
            success: true,
            client_id: accepted.client_id_from,
            message: "Pushed".to_string(),
        }))
    }
}

#[tonic::async_trait]
impl ElectionService for ChatService {
    async fn election(
        &self,
        request: Request<ElectionRequest>,
    ) -> std::result::Result<Response<ElectionResponse>, Status> {
        let req = request.into_inner();
        let (ok, responder_id) = self.election.on_election(req.candidate_id, req.lamport_timestamp).await;
        Ok(Response::new(ElectionResponse { ok, responder_id, lamport_timestamp: self.clock.read() }))
    }

    async fn coordinator(
        &self,
        request: Request<CoordinatorRequest>,
    ) -> std::result::Result<Response<CoordinatorResponse>, Status> {
        let req = request.into_inner();
        self.election.on_coordinator(req.leader_id, req.lamport_timestamp).await;
        Ok(Response::new(CoordinatorResponse { acknowledged: true, lamport_timestamp: self.clock.read() }))
    }

    /// Ping/pong only: never ticks or observes the clock, and the
    /// response body's timestamp is always `0`.
    async fn heartbeat(
        &self,
        request: Request<HeartbeatRequest>,
    ) -> std::result::Result<Response<HeartbeatResponse>, Status> {
        let _req = request.into_inner();
        Ok(Response::new(HeartbeatResponse {
            alive: true,
            leader_id: self.election.current_leader().unwrap_or(0),
            lamport_timestamp: 0,
        }))
    }
}

#[tonic::async_trait]
impl SyncService for ChatService {
    /// Never invoked by the core; reserved for replica catch-up. Returns
    /// history entries newer than `last_timestamp`.
    async fn sync_state(
        &self,
        request: Request<SyncStateRequest>,
    ) -> std::result::Result<Response<SyncStateResponse>, Status> {
        let req = request.into_inner();
        let messages = self
            .broadcast
            .history_since(req.last_timestamp)
            .into_iter()
            .map(|m| WireTextMessage {
                client_id_from: m.client_id_from,
                content: m.content,
                lamport_timestamp: m.lamport_timestamp,
            })
            .collect();
        let ts = self.clock.observe(req.last_timestamp);
        Ok(Response::new(SyncStateResponse { messages, lamport_timestamp: ts }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PeerRegistry;
    use crate::transport::PeerTransport;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct NeverRespondsTransport;

    #[async_trait]
    impl PeerTransport for NeverRespondsTransport {
        async fn election(&self, _: u32, _: u32, _: u64) -> crate::Result<(bool, u64)> {
            Ok((false, 0))
        }
        async fn coordinator(&self, _: u32, _: u32, _: u64) -> crate::Result<()> {
            Ok(())
        }
        async fn heartbeat(&self, _: u32, _: u32) -> crate::Result<bool> {
            Ok(true)
        }
    }

    fn service_on(self_id: u32, leader: Option<u32>) -> ChatService {
        let registry = Arc::new(PeerRegistry::new(self_id, "127.0.0.1:1".to_string(), HashMap::new()));
        let clock = Arc::new(LamportClock::new());
        let transport: Arc<dyn PeerTransport> = Arc::new(NeverRespondsTransport);
        let election = ElectionEngine::new(self_id, registry.clone(), clock.clone(), transport, Timing::default());
        if let Some(leader) = leader {
            futures::executor::block_on(election.on_coordinator(leader, 1));
        }
        let subscribers = Arc::new(SubscriberRegistry::new());
        let broadcast = Arc::new(BroadcastEngine::new(clock.clone(), subscribers.clone()));
        let (_stop_tx, stop_rx) = watch::channel(false);
        ChatService::new(election, registry, subscribers, broadcast, clock, Timing::default(), stop_rx)
    }

    #[tokio::test]
    async fn get_leader_reports_unknown_before_election() {
        let service = service_on(1, None);
        let resp = service
            .get_leader(Request::new(GetLeaderRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert!(!resp.is_known);
    }

    #[tokio::test]
    async fn send_message_on_non_leader_fails_precondition() {
        let service = service_on(1, Some(2));
        let result = service
            .send_message_to_server(Request::new(WireTextMessage {
                client_id_from: 9,
                content: "hi".to_string(),
                lamport_timestamp: 0,
            }))
            .await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code(), tonic::Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn heartbeat_never_touches_the_clock() {
        let service = service_on(1, Some(2));
        let before = service.clock.read();
        service
            .heartbeat(Request::new(HeartbeatRequest { server_id: 2, lamport_timestamp: 0 }))
            .await
            .unwrap();
        assert_eq!(service.clock.read(), before);
    }
}
