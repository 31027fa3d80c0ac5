use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::watch;

use crate::election::ElectionEngine;
use crate::registry::PeerRegistry;
use crate::timing::Timing;
use crate::transport::PeerTransport;

/// Periodic heartbeat prober against the current leader. A single
/// long-running task; one failed heartbeat triggers an election, with no
/// retry on that tick — elections are themselves idempotent (single-flight
/// in `ElectionEngine::start_election`), so duplicate triggers are safe.
pub struct FailureDetector {
    registry: Arc<PeerRegistry>,
    election: Arc<ElectionEngine>,
    transport: Arc<dyn PeerTransport>,
    timing: Timing,
}

impl FailureDetector {
    pub fn new(
        registry: Arc<PeerRegistry>,
        election: Arc<ElectionEngine>,
        transport: Arc<dyn PeerTransport>,
        timing: Timing,
    ) -> Self {
        FailureDetector { registry, election, transport, timing }
    }

    /// Runs until `stop` is set. Intended to be handed to `tokio::spawn`.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.timing.heartbeat_interval) => {}
                _ = stop.changed() => {
                    if *stop.borrow() {
                        debug!("server {}: failure detector stopping", self.election.self_id());
                        return;
                    }
                }
            }
            if *stop.borrow() {
                return;
            }
            self.tick().await;
        }
    }

    async fn tick(&self) {
        let leader = match self.election.current_leader() {
            Some(id) => id,
            None => return,
        };
        if leader == self.election.self_id() {
            return;
        }
        if self.registry.address_of(leader).is_none() {
            warn!(
                "server {}: leader {} has no known address, skipping heartbeat",
                self.election.self_id(),
                leader
            );
            return;
        }

        let self_id = self.election.self_id();
        let result = tokio::time::timeout(
            self.timing.heartbeat_timeout,
            self.transport.heartbeat(leader, self_id),
        )
        .await;

        let alive = matches!(result, Ok(Ok(true)));
        if !alive {
            warn!(
                "server {}: heartbeat to leader {} failed, triggering election",
                self_id, leader
            );
            let election = self.election.clone();
            tokio::spawn(async move {
                election.start_election().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::LamportClock;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct CountingTransport {
        heartbeats: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl PeerTransport for CountingTransport {
        async fn election(
            &self,
            _peer: crate::registry::ServerId,
            _candidate: crate::registry::ServerId,
            _ts: u64,
        ) -> crate::Result<(bool, u64)> {
            Ok((false, 0))
        }

        async fn coordinator(
            &self,
            _peer: crate::registry::ServerId,
            _leader: crate::registry::ServerId,
            _ts: u64,
        ) -> crate::Result<()> {
            Ok(())
        }

        async fn heartbeat(&self, _peer: crate::registry::ServerId, _self_id: crate::registry::ServerId) -> crate::Result<bool> {
            self.heartbeats.fetch_add(1, Ordering::SeqCst);
            Ok(!self.fail)
        }
    }

    fn registry_with_leader(leader: u32) -> Arc<PeerRegistry> {
        let mut peers = HashMap::new();
        peers.insert(leader, "127.0.0.1:1".to_string());
        Arc::new(PeerRegistry::new(1, "127.0.0.1:1".to_string(), peers))
    }

    #[tokio::test]
    async fn heartbeat_never_touches_the_clock() {
        let registry = registry_with_leader(2);
        let clock = Arc::new(LamportClock::new());
        let transport = Arc::new(CountingTransport { heartbeats: AtomicU32::new(0), fail: false });
        let election = ElectionEngine::new(1, registry.clone(), clock.clone(), transport.clone(), Timing::default());
        election.on_coordinator(2, 5).await;
        assert_eq!(clock.read(), 6);

        let mut timing = Timing::default();
        timing.heartbeat_interval = Duration::from_millis(10);
        timing.heartbeat_timeout = Duration::from_millis(50);
        let detector = FailureDetector::new(registry, election, transport.clone(), timing);
        detector.tick().await;
        detector.tick().await;

        assert_eq!(clock.read(), 6, "heartbeats must not tick or observe the clock");
        assert_eq!(transport.heartbeats.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_heartbeat_triggers_election() {
        let registry = registry_with_leader(2);
        let clock = Arc::new(LamportClock::new());
        let transport = Arc::new(CountingTransport { heartbeats: AtomicU32::new(0), fail: true });
        let election = ElectionEngine::new(1, registry.clone(), clock, transport.clone(), Timing::default());
        election.on_coordinator(2, 1).await;
        assert_eq!(election.current_leader(), Some(2));

        let timing = Timing::default();
        let detector = FailureDetector::new(registry, election.clone(), transport, timing);
        detector.tick().await;

        // The election this triggers runs as its own spawned task; give it
        // a moment to declare self leader (no higher peers configured).
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(election.current_leader(), Some(1));
    }
}
