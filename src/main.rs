use anyhow::Result;
use clap::{Parser, Subcommand};
use socks5_checker::proxy::{
    export, BatchChecker, CheckerConfig, EndpointParser, ProgressUpdate, RetryPolicy,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

/// A batch SOCKS5 proxy checker with protocol-level probes and geolocation
#[derive(Parser)]
#[command(name = "socks5-checker")]
#[command(about = "Check batches of SOCKS5 proxies for TCP/UDP support, egress IP and latency")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse an endpoint list and report per-line results
    Parse {
        /// Input file, one endpoint per line
        input: PathBuf,
    },
    /// Check endpoints and print/export the results
    Check {
        /// Input file, one endpoint per line
        input: PathBuf,
        /// Export reachable endpoints as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Export reachable endpoints as plain text
        #[arg(long)]
        txt: Option<PathBuf>,
        /// Number of concurrent checks
        #[arg(short = 'n', long, default_value = "5")]
        concurrency: usize,
        /// Per-I/O-step timeout in seconds
        #[arg(long, default_value = "5")]
        timeout: u64,
        /// Maximum attempts per endpoint
        #[arg(long, default_value = "3")]
        attempts: u32,
        /// Reachability target host for the TCP probe
        #[arg(long, default_value = "ifconfig.me")]
        target_host: String,
        /// Reachability target port
        #[arg(long, default_value = "80")]
        target_port: u16,
        /// HTTP path fetched through the relay
        #[arg(long, default_value = "/ip")]
        target_path: String,
        /// Path to a GeoLite2 City database
        #[arg(long)]
        mmdb: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Parse { input } => {
            for result in EndpointParser::parse_file(&input)? {
                match result {
                    Ok(endpoint) => println!("{}", endpoint.to_full_string()),
                    Err(err) => eprintln!("parse error: {}", err),
                }
            }
        }
        Commands::Check {
            input,
            csv,
            txt,
            concurrency,
            timeout,
            attempts,
            target_host,
            target_port,
            target_path,
            mmdb,
        } => {
            let mut endpoints = Vec::new();
            let mut errors = 0usize;
            for result in EndpointParser::parse_file(&input)? {
                match result {
                    Ok(endpoint) => endpoints.push(endpoint),
                    Err(err) => {
                        eprintln!("parse error: {}", err);
                        errors += 1;
                    }
                }
            }

            println!(
                "Loaded {} endpoints from {:?} ({} malformed lines skipped)",
                endpoints.len(),
                input,
                errors
            );
            println!(
                "Checking with concurrency {}, timeout {}s, up to {} attempts",
                concurrency, timeout, attempts
            );

            let mut config = CheckerConfig::new()
                .with_concurrency(concurrency)
                .with_timeout(Duration::from_secs(timeout))
                .with_retry(RetryPolicy::new(attempts, Duration::from_millis(250)))
                .with_target(target_host, target_port)
                .with_target_path(target_path);
            if let Some(path) = mmdb {
                config = config.with_mmdb_path(path);
            }

            let checker = BatchChecker::with_config(config);

            let (tx, mut rx) = mpsc::unbounded_channel::<ProgressUpdate>();
            let reporter = tokio::spawn(async move {
                while let Some(update) = rx.recv().await {
                    eprint!("\rchecked {}/{}", update.completed, update.total);
                }
                eprintln!();
            });

            let run = checker.run(endpoints, Some(tx)).await;
            let _ = reporter.await;

            for entry in run.entries() {
                let outcome = &entry.outcome;
                if outcome.reachable {
                    println!(
                        "{} ok tcp={} udp={} ip={} geo={}{} latency={}ms attempts={}",
                        entry.endpoint,
                        flag(outcome.tcp_supported),
                        flag(outcome.udp_supported),
                        outcome.egress_ip.as_deref().unwrap_or("-"),
                        outcome.country.as_deref().unwrap_or("-"),
                        outcome
                            .region
                            .as_deref()
                            .map(|r| format!("/{}", r))
                            .unwrap_or_default(),
                        outcome.latency_ms.unwrap_or(0),
                        outcome.attempts,
                    );
                } else {
                    let reason = outcome
                        .failure_reason
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    println!(
                        "{} failed: {} (attempts={})",
                        entry.endpoint, reason, outcome.attempts
                    );
                }
            }

            let working = run.working().count();
            println!(
                "\nResults: {} working, {} unreachable or degraded",
                working,
                run.len() - working
            );

            if let Some(path) = csv {
                let rows = export::write_csv(&run, &path)?;
                println!("Exported {} reachable endpoints to {:?}", rows, path);
            }
            if let Some(path) = txt {
                let rows = export::write_txt(&run, &path)?;
                println!("Exported {} reachable endpoints to {:?}", rows, path);
            }
        }
    }

    Ok(())
}

fn flag(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "yes",
        Some(false) => "no",
        None => "-",
    }
}
