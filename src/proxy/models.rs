//! Data model for endpoints, check outcomes and batch runs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Username/password credentials for a SOCKS5 endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointAuth {
    pub username: String,
    pub password: String,
}

impl EndpointAuth {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }
}

/// A single candidate SOCKS5 proxy endpoint.
///
/// Immutable once parsed. Identity is `host:port:username`; the password
/// participates in authentication but not in equality or display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub auth: Option<EndpointAuth>,
}

impl Endpoint {
    /// Create a new endpoint without authentication
    pub fn new(host: String, port: u16) -> Self {
        Self {
            host,
            port,
            auth: None,
        }
    }

    /// Create a new endpoint with username/password credentials
    pub fn with_auth(host: String, port: u16, username: String, password: String) -> Self {
        Self {
            host,
            port,
            auth: Some(EndpointAuth::new(username, password)),
        }
    }

    /// Endpoint address in `host:port` form
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Full `host:port:user:pass` form, used for export
    pub fn to_full_string(&self) -> String {
        match &self.auth {
            Some(auth) => format!(
                "{}:{}:{}:{}",
                self.host, self.port, auth.username, auth.password
            ),
            None => self.address(),
        }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.auth.as_ref().map(|a| &a.username) == other.auth.as_ref().map(|a| &a.username)
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
        if let Some(auth) = &self.auth {
            auth.username.hash(state);
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.auth {
            Some(auth) => write!(f, "{}:{}:{}", self.host, self.port, auth.username),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// Classified reason a check attempt failed.
///
/// The retry policy is a pure function of this tag: only `Timeout` and
/// `NetworkError` are worth another attempt, the rest are deterministic
/// protocol rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// An I/O step exceeded its timeout budget
    Timeout,
    /// Connect/read/write failed below the SOCKS5 layer
    NetworkError,
    /// The server demands username/password but none were supplied
    AuthRequired,
    /// The server rejected the supplied credentials
    AuthRejected,
    /// The proxy refused the CONNECT to the reachability target
    ConnectRejected,
}

impl FailureReason {
    /// Whether another attempt could plausibly change the result
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureReason::Timeout | FailureReason::NetworkError)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::Timeout => "timeout",
            FailureReason::NetworkError => "network error",
            FailureReason::AuthRequired => "authentication required",
            FailureReason::AuthRejected => "authentication rejected",
            FailureReason::ConnectRejected => "connect rejected",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of checking one endpoint in one batch run.
///
/// When `reachable` is false every capability and measurement field is
/// `None`; when true, `latency_ms` and `tcp_supported` are always present.
/// `udp_supported` reflects a real UDP ASSOCIATE exchange and may be false
/// even for endpoints that relay TCP fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub reachable: bool,
    pub tcp_supported: Option<bool>,
    pub udp_supported: Option<bool>,
    pub egress_ip: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub latency_ms: Option<u64>,
    pub failure_reason: Option<FailureReason>,
    /// Number of attempts it took to produce this outcome (1..=max)
    pub attempts: u32,
}

impl CheckOutcome {
    /// Outcome for an endpoint whose handshake never succeeded
    pub fn unreachable(reason: FailureReason, attempts: u32) -> Self {
        Self {
            reachable: false,
            tcp_supported: None,
            udp_supported: None,
            egress_ip: None,
            country: None,
            region: None,
            latency_ms: None,
            failure_reason: Some(reason),
            attempts,
        }
    }

    /// Outcome for an endpoint that completed the SOCKS5 handshake
    pub fn reachable(
        tcp_supported: bool,
        udp_supported: bool,
        egress_ip: Option<String>,
        latency_ms: u64,
        attempts: u32,
    ) -> Self {
        Self {
            reachable: true,
            tcp_supported: Some(tcp_supported),
            udp_supported: Some(udp_supported),
            egress_ip,
            country: None,
            region: None,
            latency_ms: Some(latency_ms),
            failure_reason: None,
            attempts,
        }
    }

    pub fn with_geo(mut self, country: Option<String>, region: Option<String>) -> Self {
        self.country = country;
        self.region = region;
        self
    }

    pub fn is_working(&self) -> bool {
        self.reachable && self.tcp_supported == Some(true)
    }
}

/// One completed entry of a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    /// Position of the endpoint in the original input
    pub index: usize,
    pub endpoint: Endpoint,
    pub outcome: CheckOutcome,
}

/// The complete, ordered result set of one checker invocation.
///
/// Entries are ordered by original input position regardless of which
/// worker finished first, so display and export stay reproducible.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchRun {
    entries: Vec<BatchEntry>,
}

impl BatchRun {
    /// Build a run from completion-ordered entries, restoring input order
    pub fn from_unordered(mut entries: Vec<BatchEntry>) -> Self {
        entries.sort_by_key(|e| e.index);
        Self { entries }
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose endpoint completed the handshake and relayed TCP
    pub fn working(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries.iter().filter(|e| e.outcome.is_working())
    }

    /// Entries with `reachable == true`, the only ones exporters serialize
    pub fn reachable(&self) -> impl Iterator<Item = &BatchEntry> {
        self.entries.iter().filter(|e| e.outcome.reachable)
    }
}
