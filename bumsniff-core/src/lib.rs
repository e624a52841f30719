//! Core building blocks for the BUM sniffer: the layered L2VPN frame
//! decoder, the TTL label cache and the fan-out hub. Runtime integration
//! (packet capture, the Redis label store, the gRPC surface) lives in the
//! server crate.

pub mod cache;
pub mod hub;
pub mod l2vpn;
pub mod label;
