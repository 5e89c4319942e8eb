//! Proxy verification engine
//!
//! This module provides functionality for:
//! - Parsing endpoint lists in `:` and `|` delimited formats
//! - Driving the SOCKS5 handshake and CONNECT against each endpoint
//! - Probing TCP relay capability and UDP ASSOCIATE support
//! - Retrying transient failures and scheduling checks across a pool
//! - Resolving egress IPs to country/region via an MMDB database

pub mod checker;
pub mod export;
pub mod geo;
pub mod models;
pub mod parser;
pub mod probe;
pub mod retry;
pub mod socks5;

pub use checker::{BatchChecker, CancelHandle, CheckerConfig, ProgressUpdate};
pub use geo::{GeoInfo, GeoLocator};
pub use models::{BatchEntry, BatchRun, CheckOutcome, Endpoint, EndpointAuth, FailureReason};
pub use parser::{EndpointParser, ParseError, ParseErrorKind};
pub use retry::RetryPolicy;
pub use socks5::{HandshakeState, Socks5Client};
