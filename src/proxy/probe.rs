//! Capability probes run over an established SOCKS5 relay
//!
//! The TCP probe speaks minimal HTTP/1.1 through the relayed socket to a
//! fixed reachability target and pulls the egress IP out of the body when
//! the target echoes one. The UDP probe performs a genuine UDP ASSOCIATE
//! exchange on a second negotiated connection, so `udp_supported` is a
//! protocol-level answer rather than a guess.

use crate::proxy::models::{Endpoint, FailureReason};
use crate::proxy::socks5::Socks5Client;
use log::debug;
use std::net::IpAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Cap on how much of the target's response we buffer
const MAX_RESPONSE_BYTES: usize = 16 * 1024;

/// What the TCP probe extracted from the target's response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpProbeReport {
    /// The proxy's outbound address as seen by the target, when the body
    /// contained a bare IP
    pub egress_ip: Option<String>,
}

/// Exchange one HTTP request/response pair over the relayed socket.
///
/// The stream is consumed and closed on every exit path. Any failure here
/// leaves the endpoint reachable (the handshake already succeeded) but
/// counts against `tcp_supported`.
pub async fn probe_tcp(
    mut stream: TcpStream,
    target_host: &str,
    path: &str,
    io_timeout: Duration,
) -> Result<TcpProbeReport, FailureReason> {
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: socks5-checker/0.1\r\nAccept: */*\r\nConnection: close\r\n\r\n",
        path, target_host
    );
    match timeout(io_timeout, stream.write_all(request.as_bytes())).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            debug!("tcp probe write failed: {}", e);
            return Err(FailureReason::NetworkError);
        }
        Err(_) => return Err(FailureReason::Timeout),
    }

    let response = match timeout(io_timeout, read_response(&mut stream)).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            debug!("tcp probe read failed: {}", e);
            return Err(FailureReason::NetworkError);
        }
        Err(_) => return Err(FailureReason::Timeout),
    };

    parse_response(&response)
}

/// Read until the target closes the connection or the size cap hits
async fn read_response(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut response = Vec::new();
    let mut buf = [0u8; 2048];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        response.extend_from_slice(&buf[..n]);
        if response.len() >= MAX_RESPONSE_BYTES {
            break;
        }
    }
    Ok(response)
}

fn parse_response(raw: &[u8]) -> Result<TcpProbeReport, FailureReason> {
    let text = String::from_utf8_lossy(raw);
    let status_line = text.lines().next().unwrap_or("");
    if !status_line.starts_with("HTTP/") {
        debug!("tcp probe: target sent a non-HTTP response");
        return Err(FailureReason::NetworkError);
    }

    let status: Option<u16> = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok());
    if status != Some(200) {
        debug!("tcp probe: target answered {}", status_line);
        return Err(FailureReason::NetworkError);
    }

    // Targets like ifconfig.me/ip answer with a bare IP in the body.
    let egress_ip = text
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.trim())
        .filter(|body| body.parse::<IpAddr>().is_ok())
        .map(str::to_string);

    Ok(TcpProbeReport { egress_ip })
}

/// Run a UDP ASSOCIATE exchange against the endpoint.
///
/// Uses its own negotiated connection since the CONNECT relay is already
/// committed to the reachability target. Returns whether the proxy
/// accepted the association.
pub async fn probe_udp(endpoint: &Endpoint, io_timeout: Duration) -> bool {
    let mut client = Socks5Client::new(endpoint, io_timeout);
    match client.udp_associate().await {
        Ok(relay) => {
            debug!("{}: UDP ASSOCIATE accepted, relay {:?}", endpoint, relay);
            true
        }
        Err(reason) => {
            debug!("{}: UDP ASSOCIATE failed: {}", endpoint, reason);
            false
        }
    }
}
