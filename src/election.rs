use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};

use crate::clock::LamportClock;
use crate::registry::{PeerRegistry, ServerId};
use crate::timing::Timing;
use crate::transport::PeerTransport;

/// Per-server state machine position. `Unknown` and `Electing` are
/// distinguished from `Follower`/`Leader` purely for observability — the
/// engine's actual state is `(leader_id: Option<ServerId>, in_progress:
/// bool)`; this is a projection of that pair for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Unknown,
    Electing,
    Follower,
    Leader,
}

/// Drives the Bully algorithm and keeps `LeaderState` consistent. Election
/// tasks borrow an `Arc<ElectionEngine>` so re-entrant elections (triggered
/// by a timed-out `start_election` or by `on_election` responding to a
/// lower candidate) can spawn without threading extra state through.
pub struct ElectionEngine {
    self_id: ServerId,
    registry: Arc<PeerRegistry>,
    clock: Arc<LamportClock>,
    transport: Arc<dyn PeerTransport>,
    timing: Timing,
    leader: Mutex<Option<ServerId>>,
    election_in_progress: AtomicBool,
    on_leader_change: Mutex<Option<Box<dyn Fn(ServerId) + Send + Sync>>>,
}

impl ElectionEngine {
    pub fn new(
        self_id: ServerId,
        registry: Arc<PeerRegistry>,
        clock: Arc<LamportClock>,
        transport: Arc<dyn PeerTransport>,
        timing: Timing,
    ) -> Arc<Self> {
        Arc::new(ElectionEngine {
            self_id,
            registry,
            clock,
            transport,
            timing,
            leader: Mutex::new(None),
            election_in_progress: AtomicBool::new(false),
            on_leader_change: Mutex::new(None),
        })
    }

    /// Installs a callback invoked exactly once per actual leader-identity
    /// change. Invoked outside the election mutex; a callback that issues
    /// further RPCs is therefore safe and will not deadlock against
    /// `on_coordinator`.
    pub fn set_on_leader_change(&self, f: impl Fn(ServerId) + Send + Sync + 'static) {
        *self.on_leader_change.lock().unwrap() = Some(Box::new(f));
    }

    pub fn self_id(&self) -> ServerId {
        self.self_id
    }

    pub fn current_leader(&self) -> Option<ServerId> {
        *self.leader.lock().unwrap()
    }

    pub fn is_leader(&self) -> bool {
        self.current_leader() == Some(self.self_id)
    }

    pub fn state(&self) -> ServerState {
        if self.election_in_progress.load(Ordering::SeqCst) {
            return ServerState::Electing;
        }
        match self.current_leader() {
            None => ServerState::Unknown,
            Some(id) if id == self.self_id => ServerState::Leader,
            Some(_) => ServerState::Follower,
        }
    }

    /// Sets `leader` to `new_leader`, and — only if the identity actually
    /// changed — invokes the leader-change observer after releasing the
    /// lock.
    fn set_leader(&self, new_leader: ServerId) {
        let changed = {
            let mut guard = self.leader.lock().unwrap();
            let changed = *guard != Some(new_leader);
            *guard = Some(new_leader);
            changed
        };
        if changed {
            info!(
                "server {}: new leader is {}",
                self.self_id, new_leader
            );
            if let Some(cb) = self.on_leader_change.lock().unwrap().as_ref() {
                cb(new_leader);
            }
        }
    }

    /// Starts an election. Single-flight: concurrent callers that lose the
    /// test-and-set return immediately rather than queueing another attempt,
    /// so at most one election is in progress per server at any instant.
    ///
    /// A restart after a coordinator-less timeout is implemented as a loop
    /// in this same call rather than by spawning a fresh task on every
    /// timeout: the in-progress flag is cleared before the loop repeats, so
    /// at any instant there is still at most one election live for this
    /// server.
    pub async fn start_election(self: &Arc<Self>) {
        if self
            .election_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("server {}: election already in progress, ignoring", self.self_id);
            return;
        }

        loop {
            let ts = self.clock.tick();
            let higher = self.registry.higher_ids();

            if higher.is_empty() {
                self.become_leader().await;
                self.election_in_progress.store(false, Ordering::SeqCst);
                return;
            }

            let any_ok = self.challenge_higher_peers(&higher, ts).await;

            if !any_ok {
                self.become_leader().await;
                self.election_in_progress.store(false, Ordering::SeqCst);
                return;
            }

            tokio::time::sleep(self.timing.coordinator_timeout).await;

            if self.current_leader().is_some() {
                self.election_in_progress.store(false, Ordering::SeqCst);
                return;
            }

            // Higher candidate promised to take over but never broadcast
            // Coordinator (e.g. it crashed mid-election). Clear the flag
            // and loop back into step 1 rather than spawning a new task.
            warn!(
                "server {}: no coordinator observed after election timeout, retrying",
                self.self_id
            );
            self.election_in_progress.store(false, Ordering::SeqCst);
            if self
                .election_in_progress
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                // Someone else's election (e.g. a fresh Election/Coordinator
                // arrival) is now in flight; let it run instead of racing it.
                return;
            }
        }
    }

    /// Issues `Election(candidateId=self, ts)` to every higher peer
    /// concurrently with a bounded timeout, observing the timestamp of
    /// every `ok` reply. Returns whether at least one peer replied ok.
    async fn challenge_higher_peers(&self, higher: &[ServerId], ts: u64) -> bool {
        let self_id = self.self_id;
        let calls = higher.iter().map(|&peer| {
            let transport = self.transport.clone();
            let timeout = self.timing.election_timeout;
            async move { tokio::time::timeout(timeout, transport.election(peer, self_id, ts)).await }
        });
        let results = futures::future::join_all(calls).await;
        let mut any_ok = false;
        for result in results {
            match result {
                Ok(Ok((ok, responder_ts))) => {
                    if ok {
                        self.clock.observe(responder_ts);
                        any_ok = true;
                    }
                }
                Ok(Err(e)) => {
                    warn!("server {}: election rpc failed: {}", self.self_id, e);
                }
                Err(_) => {
                    warn!("server {}: election rpc timed out", self.self_id);
                }
            }
        }
        any_ok
    }

    /// Set self as leader, tick, and fan out `Coordinator` to every peer
    /// with a short timeout. Peer failures are logged and ignored.
    async fn become_leader(&self) {
        self.set_leader(self.self_id);
        let ts = self.clock.tick();

        let peers: Vec<ServerId> = self.registry.peer_ids().collect();
        let broadcasts = peers.into_iter().map(|peer| {
            let transport = self.transport.clone();
            let timeout = self.timing.coordinator_broadcast_timeout;
            let self_id = self.self_id;
            async move {
                let res = tokio::time::timeout(timeout, transport.coordinator(peer, self_id, ts)).await;
                if let Err(_) | Ok(Err(_)) = res {
                    warn!("server {}: coordinator broadcast to {} failed", self_id, peer);
                }
            }
        });
        futures::future::join_all(broadcasts).await;
    }

    /// Handles an incoming `Election` challenge. Always observes `ts`. If
    /// the candidate has a lower id, replies ok and asynchronously
    /// schedules its own election (racing to become leader); otherwise
    /// declines — the candidate already has equal or greater right to
    /// proceed.
    pub async fn on_election(self: &Arc<Self>, candidate: ServerId, ts: u64) -> (bool, ServerId) {
        self.clock.observe(ts);
        if candidate < self.self_id {
            let engine = self.clone();
            tokio::spawn(async move {
                engine.start_election().await;
            });
            (true, self.self_id)
        } else {
            (false, self.self_id)
        }
    }

    /// Handles an incoming `Coordinator` announcement: unconditionally
    /// accept, observe the timestamp, invoke the leader-change observer if
    /// the identity changed.
    pub async fn on_coordinator(&self, leader: ServerId, ts: u64) {
        self.clock.observe(ts);
        self.set_leader(leader);
    }
}
