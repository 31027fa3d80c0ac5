//! Replicated broadcast chat cluster: Bully leader election, a heartbeat
//! failure detector, and a leader-only Lamport-ordered broadcast plane.
//! See `DESIGN.md` for the grounding ledger.

pub use error::{ChatError, Result};

pub mod bootstrap;
pub mod broadcast;
pub mod clock;
mod error;
pub mod election;
pub mod failure_detector;
pub mod registry;
pub mod rpc;
pub mod subscriber;
pub mod timing;
pub mod transport;
