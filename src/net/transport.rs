//! Outbound HTTP transport, built once per process.
//!
//! [`HttpTransport`] picks one of three routes from the configured proxy:
//!
//! - **Environment**: pooled reqwest client honouring `HTTP_PROXY`/`HTTPS_PROXY`
//! - **HTTP proxy**: pooled reqwest client with an explicit proxy
//! - **SOCKS5**: pooled hyper client whose connector dials through
//!   [`socks5::dial`] and layers rustls on top for https targets
//!
//! The converter only sees the [`Transport`] trait, so tests substitute
//! their own implementation.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{future, StreamExt, TryStreamExt};
use http_body_util::{BodyStream, Empty};
use hyper::header::CONTENT_LENGTH;
use hyper::Uri;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use url::Url;

use super::socks5::{self, SocksError, TargetAddr};
use crate::feed::{FetchError, FetchRequest};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
pub const RESPONSE_HEADER_TIMEOUT: Duration = Duration::from_secs(5);
pub const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);
/// Bounds a whole conversion, body transfer included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_IDLE_PER_HOST: usize = 10;

const DEFAULT_SOCKS_PORT: u16 = 1080;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("Failed to set up TLS for SOCKS5 tunnel: {0}")]
    Tls(#[from] rustls::Error),
}

/// Which route outbound requests take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxySetting {
    /// Direct, subject to the standard proxy environment variables.
    Environment,
    /// Explicit `http://` or `https://` forward proxy.
    Http(Url),
    /// `host:port` of a SOCKS5 proxy (`socks5://` or `socks5h://`).
    Socks5(String),
}

impl ProxySetting {
    /// Interprets the configured proxy URL.
    ///
    /// Unparseable URLs and unknown schemes fall back to
    /// [`ProxySetting::Environment`] with a warning instead of failing startup.
    pub fn from_config(raw: Option<&str>) -> Self {
        let raw = match raw.map(str::trim) {
            Some(raw) if !raw.is_empty() => raw,
            _ => return ProxySetting::Environment,
        };

        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(proxy = %raw, error = %e, "Ignoring unparseable proxy URL");
                return ProxySetting::Environment;
            }
        };

        match url.scheme() {
            "http" | "https" => ProxySetting::Http(url),
            "socks5" | "socks5h" => match url.host_str() {
                Some(host) if !host.is_empty() => ProxySetting::Socks5(format!(
                    "{}:{}",
                    host,
                    url.port().unwrap_or(DEFAULT_SOCKS_PORT)
                )),
                _ => {
                    tracing::warn!(proxy = %raw, "SOCKS5 proxy URL has no host, ignoring");
                    ProxySetting::Environment
                }
            },
            scheme => {
                tracing::warn!(proxy = %raw, scheme = %scheme, "Unknown proxy scheme, using direct connection");
                ProxySetting::Environment
            }
        }
    }

    /// Short label for startup logging; never includes proxy credentials.
    pub fn describe(&self) -> String {
        match self {
            ProxySetting::Environment => "direct".to_string(),
            ProxySetting::Http(url) => format!(
                "http proxy {}",
                url.host_str().unwrap_or_default()
            ),
            ProxySetting::Socks5(addr) => format!("socks5 {}", addr),
        }
    }
}

/// Response head plus a body stream that has not been read yet.
pub struct TransportResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes, FetchError>>,
}

/// Issues a single GET. Implementations must not retry.
pub trait Transport: Send + Sync {
    fn get(
        &self,
        request: &FetchRequest,
    ) -> impl Future<Output = Result<TransportResponse, FetchError>> + Send;
}

/// The process-wide transport. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct HttpTransport {
    route: Route,
}

#[derive(Clone)]
enum Route {
    Client(reqwest::Client),
    Socks(Client<SocksConnector, Empty<Bytes>>),
}

impl HttpTransport {
    /// Builds the transport for `proxy`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the reqwest client or the rustls
    /// configuration cannot be constructed.
    pub fn build(proxy: &ProxySetting) -> Result<Self, TransportError> {
        let route = match proxy {
            ProxySetting::Environment => Route::Client(build_client(None)?),
            ProxySetting::Http(url) => Route::Client(build_client(Some(url))?),
            ProxySetting::Socks5(addr) => Route::Socks(build_socks_client(SocksConnector {
                proxy_addr: Arc::from(addr.as_str()),
                tls: tls_connector()?,
            })),
        };
        tracing::debug!(route = %proxy.describe(), "Built outbound transport");
        Ok(Self { route })
    }
}

impl Transport for HttpTransport {
    async fn get(&self, request: &FetchRequest) -> Result<TransportResponse, FetchError> {
        match &self.route {
            Route::Client(client) => client_get(client, request).await,
            Route::Socks(client) => socks_get(client, request).await,
        }
    }
}

fn build_client(proxy: Option<&Url>) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(IDLE_CONNECTION_TIMEOUT)
        .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
        .tcp_keepalive(TCP_KEEPALIVE)
        .timeout(REQUEST_TIMEOUT);

    if let Some(url) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(url.as_str())?);
    }

    Ok(builder.build()?)
}

async fn client_get(
    client: &reqwest::Client,
    request: &FetchRequest,
) -> Result<TransportResponse, FetchError> {
    let send = client
        .get(request.url.clone())
        .headers(request.headers.clone())
        .send();

    let header_deadline = request
        .deadline
        .min(Instant::now() + RESPONSE_HEADER_TIMEOUT);
    let response = timeout_at(header_deadline, send)
        .await
        .map_err(|_| FetchError::Timeout)??;

    Ok(TransportResponse {
        status: response.status().as_u16(),
        content_length: response.content_length(),
        body: response.bytes_stream().map_err(FetchError::Network).boxed(),
    })
}

// ============================================================================
// SOCKS5 route
// ============================================================================

fn build_socks_client(connector: SocksConnector) -> Client<SocksConnector, Empty<Bytes>> {
    Client::builder(TokioExecutor::new())
        .pool_timer(TokioTimer::new())
        .pool_idle_timeout(IDLE_CONNECTION_TIMEOUT)
        .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
        .build(connector)
}

async fn socks_get(
    client: &Client<SocksConnector, Empty<Bytes>>,
    request: &FetchRequest,
) -> Result<TransportResponse, FetchError> {
    let mut outbound = hyper::Request::new(Empty::<Bytes>::new());
    *outbound.uri_mut() = request
        .url
        .as_str()
        .parse()
        .map_err(|e| FetchError::Tunnel(format!("invalid request target: {}", e)))?;
    *outbound.headers_mut() = request.headers.clone();

    // Includes connection setup when no idle connection is pooled
    let header_deadline = request
        .deadline
        .min(Instant::now() + CONNECT_TIMEOUT + RESPONSE_HEADER_TIMEOUT);
    let response = timeout_at(header_deadline, client.request(outbound))
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(socks_client_error)?;

    let content_length = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let status = response.status().as_u16();

    let body = BodyStream::new(response.into_body())
        .try_filter_map(|frame| future::ready(Ok(frame.into_data().ok())))
        .map_err(|e| FetchError::Body(e.to_string()))
        .boxed();

    Ok(TransportResponse {
        status,
        content_length,
        body,
    })
}

/// Recovers the connector's own error from the client's error chain.
fn socks_client_error(e: hyper_util::client::legacy::Error) -> FetchError {
    let mut source = std::error::Error::source(&e);
    while let Some(err) = source {
        if let Some(connect) = err.downcast_ref::<ConnectError>() {
            return connect.clone().into_fetch_error();
        }
        source = std::error::Error::source(err);
    }
    FetchError::Tunnel(e.to_string())
}

/// Failures while opening a pooled connection through the proxy.
#[derive(Debug, Clone, Error)]
enum ConnectError {
    #[error(transparent)]
    Socks(#[from] SocksError),
    #[error("TLS handshake timed out")]
    TlsTimeout,
    #[error("{0}")]
    Setup(String),
}

impl ConnectError {
    fn into_fetch_error(self) -> FetchError {
        match self {
            ConnectError::Socks(e) => FetchError::Proxy(e),
            ConnectError::TlsTimeout => FetchError::Timeout,
            ConnectError::Setup(msg) => FetchError::Tunnel(msg),
        }
    }
}

/// Opens connections for the pooled client: SOCKS5 CONNECT to the request
/// authority, then TLS when the scheme is https.
#[derive(Clone)]
struct SocksConnector {
    proxy_addr: Arc<str>,
    tls: TlsConnector,
}

impl SocksConnector {
    async fn connect(self, uri: Uri) -> Result<TunnelStream, ConnectError> {
        let host = uri
            .host()
            .ok_or_else(|| ConnectError::Setup("URL has no host".to_string()))?;
        let https = uri.scheme_str() == Some("https");
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });

        let target = TargetAddr::new(host, port)?;
        let deadline = Instant::now() + REQUEST_TIMEOUT;
        let stream = socks5::dial(&self.proxy_addr, &target, deadline).await?;
        if !https {
            return Ok(TunnelStream::new(Tunnel::Plain(stream)));
        }

        let name = host.trim_start_matches('[').trim_end_matches(']');
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|e| ConnectError::Setup(format!("invalid TLS server name: {}", e)))?;
        let tls = timeout(TLS_HANDSHAKE_TIMEOUT, self.tls.connect(server_name, stream))
            .await
            .map_err(|_| ConnectError::TlsTimeout)?
            .map_err(|e| ConnectError::Setup(format!("TLS handshake failed: {}", e)))?;

        Ok(TunnelStream::new(Tunnel::Tls(Box::new(tls))))
    }
}

impl tower::Service<Uri> for SocksConnector {
    type Response = TunnelStream;
    type Error = ConnectError;
    type Future = Pin<Box<dyn Future<Output = Result<TunnelStream, ConnectError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        Box::pin(self.clone().connect(uri))
    }
}

/// A tunneled byte stream, plain or TLS.
enum Tunnel {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Tunnel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Tunnel::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Tunnel::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Tunnel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Tunnel::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Tunnel::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Tunnel::Plain(s) => Pin::new(s).poll_flush(cx),
            Tunnel::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Tunnel::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Tunnel::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Adapts [`Tunnel`] to hyper's IO traits for the pooled client.
struct TunnelStream(TokioIo<Tunnel>);

impl TunnelStream {
    fn new(tunnel: Tunnel) -> Self {
        Self(TokioIo::new(tunnel))
    }
}

impl Connection for TunnelStream {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl hyper::rt::Read for TunnelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        hyper::rt::Read::poll_read(Pin::new(&mut self.get_mut().0), cx, buf)
    }
}

impl hyper::rt::Write for TunnelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        hyper::rt::Write::poll_write(Pin::new(&mut self.get_mut().0), cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_flush(Pin::new(&mut self.get_mut().0), cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        hyper::rt::Write::poll_shutdown(Pin::new(&mut self.get_mut().0), cx)
    }
}

fn tls_connector() -> Result<TlsConnector, TransportError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}
