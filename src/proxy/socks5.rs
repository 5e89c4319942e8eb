//! Client side of the SOCKS5 handshake per RFC 1928 / RFC 1929
//!
//! One [`Socks5Client`] drives a single connection attempt through the
//! greeting, optional username/password sub-negotiation and a CONNECT or
//! UDP ASSOCIATE request. Every I/O step shares the same timeout budget;
//! nothing here retries, that is the retry controller's job.

use crate::proxy::models::{Endpoint, FailureReason};
use log::debug;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

pub const SOCKS_VERSION: u8 = 5;
const AUTH_SUBNEG_VERSION: u8 = 1;

/// Authentication methods this client offers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthMethod {
    NoAuth = 0x00,
    Username = 0x02,
    NoAcceptable = 0xFF,
}

impl From<u8> for AuthMethod {
    fn from(v: u8) -> Self {
        match v {
            0x00 => AuthMethod::NoAuth,
            0x02 => AuthMethod::Username,
            _ => AuthMethod::NoAcceptable,
        }
    }
}

/// Request commands the client can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SocksCommand {
    Connect = 0x01,
    UdpAssociate = 0x03,
}

/// Where a connection attempt currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Connecting,
    GreetingSent,
    AuthNegotiated,
    ConnectRequestSent,
    Established,
    Failed,
}

/// Parsed reply to a CONNECT or UDP ASSOCIATE request
#[derive(Debug, Clone)]
struct SocksReply {
    status: u8,
    bound: Option<SocketAddr>,
}

/// Single-attempt SOCKS5 handshake client for one endpoint
pub struct Socks5Client<'a> {
    endpoint: &'a Endpoint,
    io_timeout: Duration,
    state: HandshakeState,
}

impl<'a> Socks5Client<'a> {
    pub fn new(endpoint: &'a Endpoint, io_timeout: Duration) -> Self {
        Self {
            endpoint,
            io_timeout,
            state: HandshakeState::Connecting,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    fn fail(&mut self, reason: FailureReason) -> FailureReason {
        debug!(
            "{}: handshake failed in state {:?}: {}",
            self.endpoint, self.state, reason
        );
        self.state = HandshakeState::Failed;
        reason
    }

    /// Open the TCP connection and negotiate the method selection plus any
    /// username/password sub-negotiation. Returns the negotiated stream,
    /// ready for a request.
    pub async fn negotiate(&mut self) -> Result<TcpStream, FailureReason> {
        self.state = HandshakeState::Connecting;
        let addr = self.endpoint.address();
        let mut stream = match timeout(self.io_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                debug!("{}: connect error: {}", self.endpoint, e);
                return Err(self.fail(FailureReason::NetworkError));
            }
            Err(_) => return Err(self.fail(FailureReason::Timeout)),
        };

        // Always offer both methods; a server selecting username/password
        // without credentials on file is a terminal AuthRequired.
        let greeting = [
            SOCKS_VERSION,
            2,
            AuthMethod::NoAuth as u8,
            AuthMethod::Username as u8,
        ];
        self.write_timed(&mut stream, &greeting).await?;
        self.state = HandshakeState::GreetingSent;

        let mut selection = [0u8; 2];
        self.read_timed(&mut stream, &mut selection).await?;
        if selection[0] != SOCKS_VERSION {
            return Err(self.fail(FailureReason::NetworkError));
        }

        match AuthMethod::from(selection[1]) {
            AuthMethod::NoAuth => {}
            AuthMethod::Username => {
                let auth = match &self.endpoint.auth {
                    Some(auth) => auth.clone(),
                    None => return Err(self.fail(FailureReason::AuthRequired)),
                };
                self.authenticate(&mut stream, &auth.username, &auth.password)
                    .await?;
            }
            AuthMethod::NoAcceptable => return Err(self.fail(FailureReason::AuthRequired)),
        }

        self.state = HandshakeState::AuthNegotiated;
        Ok(stream)
    }

    /// RFC 1929 username/password sub-negotiation
    async fn authenticate(
        &mut self,
        stream: &mut TcpStream,
        username: &str,
        password: &str,
    ) -> Result<(), FailureReason> {
        let mut req = Vec::with_capacity(3 + username.len() + password.len());
        req.push(AUTH_SUBNEG_VERSION);
        req.push(username.len() as u8);
        req.extend_from_slice(username.as_bytes());
        req.push(password.len() as u8);
        req.extend_from_slice(password.as_bytes());
        self.write_timed(stream, &req).await?;

        let mut resp = [0u8; 2];
        self.read_timed(stream, &mut resp).await?;
        if resp[1] != 0x00 {
            return Err(self.fail(FailureReason::AuthRejected));
        }
        Ok(())
    }

    /// Negotiate and issue a CONNECT to `host:port`. On success the
    /// returned stream relays to the target and the client is
    /// `Established`; the caller owns the stream from here.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<TcpStream, FailureReason> {
        let mut stream = self.negotiate().await?;

        let req = encode_request(SocksCommand::Connect, host, port);
        self.write_timed(&mut stream, &req).await?;
        self.state = HandshakeState::ConnectRequestSent;

        let reply = self.read_reply(&mut stream).await?;
        if reply.status != 0x00 {
            debug!(
                "{}: CONNECT to {}:{} refused with status {:#04x}",
                self.endpoint, host, port, reply.status
            );
            return Err(self.fail(FailureReason::ConnectRejected));
        }

        self.state = HandshakeState::Established;
        debug!("{}: established relay to {}:{}", self.endpoint, host, port);
        Ok(stream)
    }

    /// Negotiate and issue a UDP ASSOCIATE for any source address.
    ///
    /// Returns the relay address the proxy bound, when it reported one.
    /// The association dies with the control connection, which is fine
    /// here: a zero status is all the capability probe needs.
    pub async fn udp_associate(&mut self) -> Result<Option<SocketAddr>, FailureReason> {
        let mut stream = self.negotiate().await?;

        let req = encode_request(SocksCommand::UdpAssociate, "0.0.0.0", 0);
        self.write_timed(&mut stream, &req).await?;
        self.state = HandshakeState::ConnectRequestSent;

        let reply = self.read_reply(&mut stream).await?;
        if reply.status != 0x00 {
            debug!(
                "{}: UDP ASSOCIATE refused with status {:#04x}",
                self.endpoint, reply.status
            );
            return Err(self.fail(FailureReason::ConnectRejected));
        }

        self.state = HandshakeState::Established;
        Ok(reply.bound)
    }

    /// Read and decode a VER/REP/RSV/ATYP/BND.ADDR/BND.PORT reply
    async fn read_reply(&mut self, stream: &mut TcpStream) -> Result<SocksReply, FailureReason> {
        let mut head = [0u8; 4];
        self.read_timed(stream, &mut head).await?;
        if head[0] != SOCKS_VERSION {
            return Err(self.fail(FailureReason::ConnectRejected));
        }
        let status = head[1];

        let bound = match head[3] {
            0x01 => {
                let mut addr = [0u8; 4];
                self.read_timed(stream, &mut addr).await?;
                let port = self.read_port(stream).await?;
                Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(addr)), port))
            }
            0x04 => {
                let mut addr = [0u8; 16];
                self.read_timed(stream, &mut addr).await?;
                let port = self.read_port(stream).await?;
                Some(SocketAddr::new(IpAddr::from(addr), port))
            }
            0x03 => {
                let mut len = [0u8; 1];
                self.read_timed(stream, &mut len).await?;
                let mut name = vec![0u8; len[0] as usize];
                self.read_timed(stream, &mut name).await?;
                self.read_port(stream).await?;
                None
            }
            _ => return Err(self.fail(FailureReason::ConnectRejected)),
        };

        Ok(SocksReply { status, bound })
    }

    async fn read_port(&mut self, stream: &mut TcpStream) -> Result<u16, FailureReason> {
        let mut port = [0u8; 2];
        self.read_timed(stream, &mut port).await?;
        Ok(u16::from_be_bytes(port))
    }

    async fn write_timed(
        &mut self,
        stream: &mut TcpStream,
        buf: &[u8],
    ) -> Result<(), FailureReason> {
        match timeout(self.io_timeout, stream.write_all(buf)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(self.fail(FailureReason::NetworkError)),
            Err(_) => Err(self.fail(FailureReason::Timeout)),
        }
    }

    async fn read_timed(
        &mut self,
        stream: &mut TcpStream,
        buf: &mut [u8],
    ) -> Result<(), FailureReason> {
        match timeout(self.io_timeout, stream.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(self.fail(FailureReason::NetworkError)),
            Err(_) => Err(self.fail(FailureReason::Timeout)),
        }
    }
}

/// Encode a VER/CMD/RSV/ATYP/DST.ADDR/DST.PORT request, picking the
/// address type from the shape of the host.
fn encode_request(cmd: SocksCommand, host: &str, port: u16) -> Vec<u8> {
    let mut req = vec![SOCKS_VERSION, cmd as u8, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            req.push(0x01);
            req.extend_from_slice(&v4.octets());
        }
        Ok(IpAddr::V6(v6)) => {
            req.push(0x04);
            req.extend_from_slice(&v6.octets());
        }
        Err(_) => {
            req.push(0x03);
            req.push(host.len() as u8);
            req.extend_from_slice(host.as_bytes());
        }
    }
    req.extend_from_slice(&port.to_be_bytes());
    req
}
