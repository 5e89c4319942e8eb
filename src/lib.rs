//! SOCKS5 Checker - Batch Proxy Verification
//!
//! Validates batches of candidate SOCKS5 endpoints: whether each completes
//! a valid handshake, relays TCP traffic, accepts a UDP ASSOCIATE, what
//! egress IP and geography it exhibits and at what latency. Checks run on
//! a bounded worker pool and results come back in input order.

pub mod proxy;

pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
