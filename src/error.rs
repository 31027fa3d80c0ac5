use thiserror::Error;

/// Errors recognized by the cluster core.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Transport failure: timeout, connection refused, stream broken.
    /// Recovered at a higher level (election re-trigger, client retry);
    /// never propagated past the task that issued the RPC.
    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Malformed peer config or an unknown leader id. Logged at warning,
    /// operation skipped.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Called on a replica that is not currently the leader.
    #[error("not leader")]
    NotLeader,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChatError>;

/// Maps the core's error kinds onto the status codes the RPC surface
/// returns to callers. `NotLeader` becomes `failed_precondition` so a
/// client's transport-error path treats it the same way it would any
/// other leader-side rejection (spec §4.7).
impl From<ChatError> for tonic::Status {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::NotLeader => tonic::Status::failed_precondition("this replica is not the leader"),
            ChatError::Rpc(status) => status,
            ChatError::Protocol(msg) => tonic::Status::invalid_argument(msg),
            ChatError::Transport(e) => tonic::Status::unavailable(e.to_string()),
            ChatError::Io(e) => tonic::Status::internal(e.to_string()),
        }
    }
}
