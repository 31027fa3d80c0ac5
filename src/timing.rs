use std::time::Duration;

/// Reference timing constants, factored out so tests (and the `--*-ms` CLI
/// overrides in `bootstrap`) can run the whole protocol faster than real
/// time without touching the algorithm itself.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Bounded timeout on a single outbound `Election` RPC (reference 3s).
    pub election_timeout: Duration,
    /// Wait for a `Coordinator` broadcast after at least one `ok` (reference 5s).
    pub coordinator_timeout: Duration,
    /// Bounded timeout on a single outbound `Coordinator` RPC (reference 2s).
    pub coordinator_broadcast_timeout: Duration,
    /// Interval between heartbeat probes against the leader (reference 2s).
    pub heartbeat_interval: Duration,
    /// Bounded timeout on a single `Heartbeat` RPC (reference 2s).
    pub heartbeat_timeout: Duration,
    /// Bounded wait when polling a subscriber's outbound queue (reference 1s).
    pub subscriber_poll_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            election_timeout: Duration::from_secs(3),
            coordinator_timeout: Duration::from_secs(5),
            coordinator_broadcast_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(2),
            heartbeat_timeout: Duration::from_secs(2),
            subscriber_poll_interval: Duration::from_secs(1),
        }
    }
}
