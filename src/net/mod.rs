//! Outbound networking: the SOCKS5 dialer and the HTTP transport built on top
//! of it.
//!
//! - [`socks5`] - hand-rolled SOCKS5 CONNECT handshake (no-auth only)
//! - [`transport`] - the [`Transport`] seam and its production implementation

pub mod socks5;
mod transport;

pub use socks5::{SocksError, TargetAddr};
pub use transport::{
    HttpTransport, ProxySetting, Transport, TransportError, TransportResponse, CONNECT_TIMEOUT,
    IDLE_CONNECTION_TIMEOUT, MAX_IDLE_PER_HOST, REQUEST_TIMEOUT, RESPONSE_HEADER_TIMEOUT,
    TCP_KEEPALIVE, TLS_HANDSHAKE_TIMEOUT,
};
