//! The RPC surface: the three `tonic` service groups the rest of the core
//! is programmed against, plus the peer-side client that backs
//! `transport::PeerTransport` over real TCP/HTTP2 connections.

pub mod client;
pub mod service;

pub use client::TonicPeerTransport;
pub use service::ChatService;
