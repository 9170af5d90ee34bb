//! Minimal SOCKS5 client (RFC 1928): CONNECT only, "no authentication" only.
//!
//! [`dial`] opens a TCP connection to the proxy, negotiates the method,
//! issues a CONNECT for the target and discards the bound address from the
//! reply. The returned stream is positioned at the first byte relayed from
//! the target, ready to be used as a raw transport.
//!
//! Every read and write is bounded by the caller's deadline. A short read,
//! an unexpected version byte or a non-success reply aborts the dial; there
//! is no partially established state.

use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use socket2::{SockRef, TcpKeepalive};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};

use super::transport::{CONNECT_TIMEOUT, TCP_KEEPALIVE};

const SOCKS_VERSION: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const RESERVED: u8 = 0x00;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REPLY_SUCCEEDED: u8 = 0x00;

const MAX_DOMAIN_LEN: usize = 255;

/// Errors raised while establishing a tunnel through a SOCKS5 proxy.
///
/// Cloneable so a failure can be recovered intact from the pooled client's
/// error chain.
#[derive(Debug, Clone, Error)]
pub enum SocksError {
    /// TCP connection to the proxy failed
    #[error("failed to connect to SOCKS5 proxy: {0}")]
    Connect(#[source] Arc<io::Error>),
    /// Read or write failed mid-handshake (includes short reads)
    #[error("SOCKS5 handshake I/O failed: {0}")]
    Io(#[source] Arc<io::Error>),
    /// The deadline passed before the handshake finished
    #[error("SOCKS5 handshake timed out")]
    Timeout,
    /// A reply did not start with the SOCKS5 version byte
    #[error("unexpected SOCKS version in reply: 0x{0:02x}")]
    BadVersion(u8),
    /// The proxy selected a method other than "no authentication"
    #[error("SOCKS5 proxy selected unsupported auth method: 0x{0:02x}")]
    UnsupportedMethod(u8),
    /// The proxy answered the CONNECT with a failure code
    #[error("SOCKS5 CONNECT rejected: {reason} (0x{code:02x})")]
    ConnectRejected { code: u8, reason: &'static str },
    /// The reply carried an address type outside IPv4/domain/IPv6
    #[error("unknown SOCKS5 address type in reply: 0x{0:02x}")]
    UnknownAddressType(u8),
    /// Domain names are length-prefixed with a single byte
    #[error("target domain is {0} bytes (max 255)")]
    DomainTooLong(usize),
    /// The target address could not be interpreted
    #[error("invalid target address: {0}")]
    InvalidTarget(String),
}

/// Destination the proxy should CONNECT to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ip(IpAddr, u16),
    Domain(String, u16),
}

impl TargetAddr {
    /// Builds a target from a host as it appears in a URL.
    ///
    /// IPv4 and IPv6 literals (with or without brackets) are sent as
    /// addresses; anything else is forwarded as a domain name so the proxy
    /// resolves it.
    pub fn new(host: &str, port: u16) -> Result<Self, SocksError> {
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if host.is_empty() {
            return Err(SocksError::InvalidTarget("empty host".to_string()));
        }
        if port == 0 {
            return Err(SocksError::InvalidTarget(format!("{}:0", host)));
        }

        match host.parse::<IpAddr>() {
            Ok(ip) => Ok(TargetAddr::Ip(ip, port)),
            Err(_) => Ok(TargetAddr::Domain(host.to_string(), port)),
        }
    }

    /// Parses `host:port`, including bracketed IPv6 (`[::1]:443`).
    pub fn parse(addr: &str) -> Result<Self, SocksError> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| SocksError::InvalidTarget(addr.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| SocksError::InvalidTarget(addr.to_string()))?;
        Self::new(host, port)
    }

    /// Appends ATYP, address and big-endian port.
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), SocksError> {
        let port = match self {
            TargetAddr::Ip(IpAddr::V4(ip), port) => {
                buf.push(ATYP_IPV4);
                buf.extend_from_slice(&ip.octets());
                *port
            }
            TargetAddr::Ip(IpAddr::V6(ip), port) => {
                buf.push(ATYP_IPV6);
                buf.extend_from_slice(&ip.octets());
                *port
            }
            TargetAddr::Domain(name, port) => {
                let len = name.len();
                if len > MAX_DOMAIN_LEN {
                    return Err(SocksError::DomainTooLong(len));
                }
                buf.push(ATYP_DOMAIN);
                buf.push(len as u8);
                buf.extend_from_slice(name.as_bytes());
                *port
            }
        };
        buf.extend_from_slice(&port.to_be_bytes());
        Ok(())
    }
}

impl std::fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetAddr::Ip(IpAddr::V6(ip), port) => write!(f, "[{}]:{}", ip, port),
            TargetAddr::Ip(ip, port) => write!(f, "{}:{}", ip, port),
            TargetAddr::Domain(name, port) => write!(f, "{}:{}", name, port),
        }
    }
}

/// Opens a tunnel to `target` through the SOCKS5 proxy at `proxy_addr`.
///
/// The CONNECT request is encoded before the proxy is contacted, so an
/// unencodable target (domain over 255 bytes) fails without any network
/// traffic.
///
/// # Errors
///
/// Any [`SocksError`]; [`SocksError::Timeout`] when `deadline` passes first.
pub async fn dial(
    proxy_addr: &str,
    target: &TargetAddr,
    deadline: Instant,
) -> Result<TcpStream, SocksError> {
    let request = connect_request(target)?;

    let connect_deadline = deadline.min(Instant::now() + CONNECT_TIMEOUT);
    let mut stream = timeout_at(connect_deadline, TcpStream::connect(proxy_addr))
        .await
        .map_err(|_| SocksError::Timeout)?
        .map_err(|e| SocksError::Connect(Arc::new(e)))?;

    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "Failed to set TCP_NODELAY on proxy connection");
    }
    let keepalive = TcpKeepalive::new().with_time(TCP_KEEPALIVE);
    if let Err(e) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
        tracing::debug!(error = %e, "Failed to set TCP keepalive on proxy connection");
    }

    tracing::debug!(proxy = %proxy_addr, target = %target, "SOCKS5 connected to proxy");
    negotiate(&mut stream, &request, deadline).await?;
    tracing::debug!(proxy = %proxy_addr, target = %target, "SOCKS5 tunnel established");

    Ok(stream)
}

/// VER CMD RSV ATYP DST.ADDR DST.PORT
fn connect_request(target: &TargetAddr) -> Result<Vec<u8>, SocksError> {
    let mut request = vec![SOCKS_VERSION, CMD_CONNECT, RESERVED];
    target.encode(&mut request)?;
    Ok(request)
}

async fn negotiate<S>(stream: &mut S, request: &[u8], deadline: Instant) -> Result<(), SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    step(deadline, stream.write_all(&[SOCKS_VERSION, 0x01, METHOD_NO_AUTH])).await?;

    let mut method = [0u8; 2];
    step(deadline, stream.read_exact(&mut method)).await?;
    if method[0] != SOCKS_VERSION {
        return Err(SocksError::BadVersion(method[0]));
    }
    if method[1] != METHOD_NO_AUTH {
        return Err(SocksError::UnsupportedMethod(method[1]));
    }

    step(deadline, stream.write_all(request)).await?;

    // VER REP RSV ATYP
    let mut header = [0u8; 4];
    step(deadline, stream.read_exact(&mut header)).await?;
    if header[0] != SOCKS_VERSION {
        return Err(SocksError::BadVersion(header[0]));
    }
    if header[1] != REPLY_SUCCEEDED {
        return Err(SocksError::ConnectRejected {
            code: header[1],
            reason: reply_reason(header[1]),
        });
    }

    let bound_len = match header[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            step(deadline, stream.read_exact(&mut len)).await?;
            len[0] as usize
        }
        other => return Err(SocksError::UnknownAddressType(other)),
    };

    // BND.ADDR + BND.PORT carry nothing we use
    let mut bound = vec![0u8; bound_len + 2];
    step(deadline, stream.read_exact(&mut bound)).await?;

    Ok(())
}

async fn step<F, T>(deadline: Instant, op: F) -> Result<T, SocksError>
where
    F: Future<Output = io::Result<T>>,
{
    timeout_at(deadline, op)
        .await
        .map_err(|_| SocksError::Timeout)?
        .map_err(|e| SocksError::Io(Arc::new(e)))
}

fn reply_reason(code: u8) -> &'static str {
    match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unassigned reply code",
    }
}
