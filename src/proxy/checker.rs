//! Batch checker: fans endpoint checks across a bounded worker pool
//!
//! The scheduler is the only place concurrency fans out; the handshake
//! client, probes and retry controller each work one endpoint at a time.
//! Progress is reported as explicit events over a channel and completed
//! entries are re-ordered by input position before being handed out.

use crate::proxy::geo::GeoLocator;
use crate::proxy::models::{BatchEntry, BatchRun, CheckOutcome, Endpoint, FailureReason};
use crate::proxy::probe::{probe_tcp, probe_udp};
use crate::proxy::retry::RetryPolicy;
use crate::proxy::socks5::Socks5Client;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;

/// Default per-I/O-step timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Default number of concurrent checks
const DEFAULT_CONCURRENCY: usize = 5;

/// Default reachability target for the TCP probe; echoes the caller's
/// apparent IP, which doubles as the egress address
const DEFAULT_TARGET_HOST: &str = "ifconfig.me";
const DEFAULT_TARGET_PORT: u16 = 80;
const DEFAULT_TARGET_PATH: &str = "/ip";

/// Configuration for a batch run
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Timeout budget for each I/O step
    pub io_timeout: Duration,
    /// Number of checks allowed in flight at once
    pub concurrency: usize,
    /// Host the CONNECT probe targets
    pub target_host: String,
    /// Port the CONNECT probe targets
    pub target_port: u16,
    /// HTTP path fetched over the relay
    pub target_path: String,
    /// Retry policy applied around each endpoint's full check
    pub retry: RetryPolicy,
    /// Path to a GeoLite2 City database (optional)
    pub mmdb_path: Option<String>,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            target_host: DEFAULT_TARGET_HOST.to_string(),
            target_port: DEFAULT_TARGET_PORT,
            target_path: DEFAULT_TARGET_PATH.to_string(),
            retry: RetryPolicy::default(),
            mmdb_path: None,
        }
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_target(mut self, host: String, port: u16) -> Self {
        self.target_host = host;
        self.target_port = port;
        self
    }

    pub fn with_target_path(mut self, path: String) -> Self {
        self.target_path = path;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_mmdb_path(mut self, path: String) -> Self {
        self.mmdb_path = Some(path);
        self
    }
}

/// Progress event emitted after every finished check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub completed: usize,
    pub total: usize,
}

/// Handle for aborting a batch run.
///
/// Cancelling stops new checks from being dispatched; in-flight checks
/// run to completion or time out on their own budget.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Batch checker for validating SOCKS5 endpoints
pub struct BatchChecker {
    config: CheckerConfig,
    geo: Option<GeoLocator>,
    cancel: CancelHandle,
}

impl BatchChecker {
    /// Create a checker with default configuration
    pub fn new() -> Self {
        Self::with_config(CheckerConfig::default())
    }

    /// Create a checker with custom configuration, opening the geo
    /// database when one is configured. A database that fails to open
    /// degrades to "no geography" rather than failing the batch.
    pub fn with_config(config: CheckerConfig) -> Self {
        let geo = config.mmdb_path.as_ref().and_then(|path| {
            GeoLocator::from_path(path)
                .map_err(|e| warn!("geo database {} unavailable: {}", path, e))
                .ok()
        });

        Self {
            config,
            geo,
            cancel: CancelHandle::default(),
        }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Handle the caller can use to abort the batch
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// One attempt at the full check sequence: handshake + CONNECT, the
    /// TCP probe over the relay, the UDP ASSOCIATE probe and geolocation.
    /// An `Err` here means the handshake itself failed; probe failures
    /// still produce a reachable outcome.
    async fn check_once(&self, endpoint: &Endpoint) -> Result<CheckOutcome, FailureReason> {
        let started = Instant::now();

        let mut client = Socks5Client::new(endpoint, self.config.io_timeout);
        let relay = client
            .connect(&self.config.target_host, self.config.target_port)
            .await?;

        let probe = probe_tcp(
            relay,
            &self.config.target_host,
            &self.config.target_path,
            self.config.io_timeout,
        )
        .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (tcp_supported, egress_ip) = match probe {
            Ok(report) => (true, report.egress_ip),
            Err(reason) => {
                debug!("{}: tcp probe failed: {}", endpoint, reason);
                (false, None)
            }
        };

        let udp_supported = probe_udp(endpoint, self.config.io_timeout).await;

        let mut outcome =
            CheckOutcome::reachable(tcp_supported, udp_supported, egress_ip, latency_ms, 1);

        if let (Some(geo), Some(ip)) = (&self.geo, outcome.egress_ip.clone()) {
            match geo.lookup(&ip) {
                Ok(info) => outcome = outcome.with_geo(info.country, info.region),
                Err(e) => debug!("{}: geo lookup for {} failed: {}", endpoint, ip, e),
            }
        }

        Ok(outcome)
    }

    /// Check a single endpoint, retrying per the configured policy.
    /// Always produces exactly one terminal outcome.
    pub async fn check_endpoint(&self, endpoint: &Endpoint) -> CheckOutcome {
        let (result, attempts) = self
            .config
            .retry
            .run(|_| self.check_once(endpoint))
            .await;

        match result {
            Ok(mut outcome) => {
                outcome.attempts = attempts;
                outcome
            }
            Err(reason) => CheckOutcome::unreachable(reason, attempts),
        }
    }

    /// Check a batch of endpoints across the bounded worker pool.
    ///
    /// At most `concurrency` checks run at once; excess endpoints queue.
    /// A progress event fires after each completed check. The returned
    /// run is ordered by input position regardless of completion order.
    pub async fn run(
        &self,
        endpoints: Vec<Endpoint>,
        progress: Option<UnboundedSender<ProgressUpdate>>,
    ) -> BatchRun {
        let total = endpoints.len();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let completed = Arc::new(AtomicUsize::new(0));

        let entries = stream::iter(endpoints.into_iter().enumerate())
            .map(|(index, endpoint)| {
                let sem = Arc::clone(&semaphore);
                let completed = Arc::clone(&completed);
                let progress = progress.clone();
                let cancel = self.cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        debug!("batch cancelled, skipping {}", endpoint);
                        return None;
                    }
                    // Semaphore acquire only fails if the semaphore is
                    // closed, which cannot happen while we hold the Arc.
                    let _permit = sem
                        .acquire()
                        .await
                        .expect("semaphore closed unexpectedly");

                    let outcome = self.check_endpoint(&endpoint).await;

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    info!(
                        "[{}/{}] {} -> reachable={} attempts={}",
                        done, total, endpoint, outcome.reachable, outcome.attempts
                    );
                    if let Some(tx) = &progress {
                        let _ = tx.send(ProgressUpdate {
                            completed: done,
                            total,
                        });
                    }

                    Some(BatchEntry {
                        index,
                        endpoint,
                        outcome,
                    })
                }
            })
            .buffer_unordered(self.config.concurrency)
            .filter_map(|entry| async move { entry })
            .collect::<Vec<_>>()
            .await;

        BatchRun::from_unordered(entries)
    }
}

impl Default for BatchChecker {
    fn default() -> Self {
        Self::new()
    }
}
