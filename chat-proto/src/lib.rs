//! Generated RPC types and service traits for the chat cluster's three
//! service groups (client-facing, election plane, sync hook).

pub mod chat {
    tonic::include_proto!("bullychat");
}
