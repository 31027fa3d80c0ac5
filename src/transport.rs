use async_trait::async_trait;

use crate::registry::ServerId;
use crate::Result;

/// Outbound peer-to-peer RPC surface used by the election engine and the
/// failure detector.
///
/// A small async trait the rest of the engine programs against, so the
/// election/failure-detector logic can be unit tested against an
/// in-memory fake instead of real sockets. The production implementation
/// (`rpc::TonicPeerTransport`) backs it with real `tonic` client
/// connections, since replicas here are independent OS processes rather
/// than threads in one test harness.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Returns `(ok, responder_timestamp)` or an error if the RPC itself
    /// failed or timed out (counted as "no ok from that peer").
    async fn election(
        &self,
        peer: ServerId,
        candidate: ServerId,
        ts: u64,
    ) -> Result<(bool, u64)>;

    /// Failures are logged and ignored by the caller; this just reports
    /// success/failure.
    async fn coordinator(&self, peer: ServerId, leader: ServerId, ts: u64) -> Result<()>;

    /// Returns whether the probe succeeded. `ts` is always `0`: heartbeats
    /// are not logical events and carry no real timestamp.
    async fn heartbeat(&self, peer: ServerId, self_id: ServerId) -> Result<bool>;
}
