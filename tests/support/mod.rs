//! Minimal scriptable SOCKS5 server for integration tests
//!
//! Speaks just enough of the protocol to exercise the checker: greeting,
//! optional username/password sub-negotiation, CONNECT and UDP ASSOCIATE.
//! After a successful CONNECT it plays the reachability target itself and
//! answers the probe's HTTP request with a bare IP body.

use socks5_checker::proxy::Endpoint;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

/// How one spawned mock behaves across its lifetime
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Require username/password auth with exactly these credentials
    pub auth: Option<(String, String)>,
    /// Whether CONNECT requests succeed
    pub accept_connect: bool,
    /// Whether UDP ASSOCIATE requests succeed
    pub accept_udp: bool,
    /// Stall (never answer the greeting of) the first N connections
    pub stall_first: usize,
    /// Artificial delay before the HTTP response
    pub response_delay: Duration,
    /// HTTP status the target answers with
    pub http_status: u16,
    /// Body of the HTTP response, normally a bare IP
    pub egress_ip: String,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            auth: None,
            accept_connect: true,
            accept_udp: true,
            stall_first: 0,
            response_delay: Duration::ZERO,
            http_status: 200,
            egress_ip: "203.0.113.77".to_string(),
        }
    }
}

/// A running mock, bound to an ephemeral localhost port
pub struct MockSocks5Server {
    pub addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockSocks5Server {
    pub async fn spawn(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .expect("bind mock listener");
        let addr = listener.local_addr().expect("mock local addr");

        let connections = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let conn_counter = Arc::clone(&connections);
        let current_counter = Arc::clone(&current);
        let peak_counter = Arc::clone(&peak);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _peer)) = listener.accept().await else {
                    break;
                };
                let seq = conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
                let now = current_counter.fetch_add(1, Ordering::SeqCst) + 1;
                peak_counter.fetch_max(now, Ordering::SeqCst);

                let behavior = behavior.clone();
                let current = Arc::clone(&current_counter);
                tokio::spawn(async move {
                    let _ = handle_connection(stream, seq, &behavior).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            addr,
            connections,
            current,
            peak,
        }
    }

    /// Endpoint pointing at this mock without credentials
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new("127.0.0.1".to_string(), self.addr.port())
    }

    /// Endpoint pointing at this mock with credentials
    pub fn endpoint_with_auth(&self, username: &str, password: &str) -> Endpoint {
        Endpoint::with_auth(
            "127.0.0.1".to_string(),
            self.addr.port(),
            username.to_string(),
            password.to_string(),
        )
    }

    /// Total control connections accepted so far
    #[allow(dead_code)]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open control connections
    #[allow(dead_code)]
    pub fn peak_concurrent(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Control connections open right now
    #[allow(dead_code)]
    pub fn current_concurrent(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    seq: usize,
    behavior: &MockBehavior,
) -> std::io::Result<()> {
    if seq <= behavior.stall_first {
        // Hold the socket open without ever answering; the client's
        // timeout budget is what ends this exchange.
        sleep(Duration::from_secs(30)).await;
        return Ok(());
    }

    // Greeting: VER NMETHODS METHODS...
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;
    if head[0] != 5 {
        return Ok(());
    }
    let mut methods = vec![0u8; head[1] as usize];
    stream.read_exact(&mut methods).await?;

    if let Some((user, pass)) = &behavior.auth {
        stream.write_all(&[5, 0x02]).await?;
        if !read_userpass(&mut stream, user, pass).await? {
            return Ok(());
        }
    } else {
        stream.write_all(&[5, 0x00]).await?;
    }

    // Request: VER CMD RSV ATYP ADDR PORT
    let mut req_head = [0u8; 4];
    stream.read_exact(&mut req_head).await?;
    read_address(&mut stream, req_head[3]).await?;

    match req_head[1] {
        0x01 => {
            if !behavior.accept_connect {
                // 0x05: connection refused
                stream.write_all(&[5, 0x05, 0, 1, 0, 0, 0, 0, 0, 0]).await?;
                return Ok(());
            }
            stream.write_all(&[5, 0x00, 0, 1, 0, 0, 0, 0, 0, 0]).await?;
            serve_http(&mut stream, behavior).await?;
        }
        0x03 => {
            if !behavior.accept_udp {
                // 0x07: command not supported
                stream.write_all(&[5, 0x07, 0, 1, 0, 0, 0, 0, 0, 0]).await?;
                return Ok(());
            }
            let mut reply = vec![5, 0x00, 0, 1, 127, 0, 0, 1];
            reply.extend_from_slice(&40000u16.to_be_bytes());
            stream.write_all(&reply).await?;
        }
        _ => {
            stream.write_all(&[5, 0x07, 0, 1, 0, 0, 0, 0, 0, 0]).await?;
        }
    }

    Ok(())
}

/// RFC 1929 sub-negotiation; answers success only on matching credentials
async fn read_userpass(
    stream: &mut TcpStream,
    want_user: &str,
    want_pass: &str,
) -> std::io::Result<bool> {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;
    let mut user = vec![0u8; head[1] as usize];
    stream.read_exact(&mut user).await?;
    let mut plen = [0u8; 1];
    stream.read_exact(&mut plen).await?;
    let mut pass = vec![0u8; plen[0] as usize];
    stream.read_exact(&mut pass).await?;

    let ok = user == want_user.as_bytes() && pass == want_pass.as_bytes();
    stream.write_all(&[1, if ok { 0x00 } else { 0x01 }]).await?;
    Ok(ok)
}

/// Consume the ATYP-dependent address and port of a request
async fn read_address(stream: &mut TcpStream, atyp: u8) -> std::io::Result<()> {
    match atyp {
        0x01 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
        }
        0x04 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
        }
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await?;
        }
        _ => {}
    }
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    Ok(())
}

/// Play the reachability target: read one HTTP request, answer with the
/// configured status and IP body, then close.
async fn serve_http(stream: &mut TcpStream, behavior: &MockBehavior) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0u8; 512];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..n]);
        if request.len() > 8192 {
            break;
        }
    }

    if !behavior.response_delay.is_zero() {
        sleep(behavior.response_delay).await;
    }

    let body = format!("{}\n", behavior.egress_ip);
    let status_text = if behavior.http_status == 200 {
        "OK"
    } else {
        "Error"
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        behavior.http_status,
        status_text,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
