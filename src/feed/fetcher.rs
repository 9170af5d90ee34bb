use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use thiserror::Error;
use tokio::time::{timeout_at, Instant};
use url::Url;

use crate::net::{SocksError, Transport, TransportResponse};

/// Default body size ceiling (10 MiB).
pub const DEFAULT_MAX_FEED_BYTES: u64 = 10 * 1024 * 1024;

/// Sent unless the caller supplies its own `User-Agent`.
pub const DEFAULT_USER_AGENT: &str = concat!(
    "rss2json/",
    env!("CARGO_PKG_VERSION"),
    " (RSS/Atom to JSON converter)"
);

/// Errors that can occur while fetching a feed body.
///
/// These cover the whole transfer: connection setup (direct, HTTP proxy or
/// SOCKS5 tunnel), HTTP status, and the bounded body read.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error from the pooled client (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// SOCKS5 proxy handshake failed
    #[error("Proxy error: {0}")]
    Proxy(#[from] SocksError),
    /// HTTP exchange over the SOCKS5 tunnel failed
    #[error("Tunnel error: {0}")]
    Tunnel(String),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// The request deadline passed
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the configured size ceiling
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(u64),
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Reading the body failed mid-stream
    #[error("Failed to read response body: {0}")]
    Body(String),
}

impl FetchError {
    /// True for every failure caused by a deadline rather than the peer.
    pub fn is_timeout(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Proxy(SocksError::Timeout) => true,
            FetchError::Network(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// One outbound GET.
///
/// Headers are case-insensitive; inserting a name that is already present
/// replaces the earlier value.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    pub deadline: Instant,
    pub headers: HeaderMap,
}

impl FetchRequest {
    pub fn new(url: Url, deadline: Instant) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        Self {
            url,
            deadline,
            headers,
        }
    }

    /// Applies `headers` in order, later entries overriding earlier ones.
    pub fn with_headers<'a, I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a HeaderName, &'a HeaderValue)>,
    {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }
}

/// Performs exactly one GET and returns the complete body.
///
/// The whole exchange, from dial to the last body byte, is bounded by
/// `request.deadline`. The body is materialised once into an immutable
/// [`Bytes`] buffer so the feed parser and the thumbnail scanner can each
/// walk it independently without a second round trip.
///
/// # Errors
///
/// - [`FetchError::HttpStatus`] - status outside `200..300`
/// - [`FetchError::ResponseTooLarge`] - body exceeds `max_bytes`
/// - [`FetchError::Timeout`] - deadline passed
/// - any transport error from the [`Transport`]
pub async fn fetch<T: Transport>(
    transport: &T,
    request: &FetchRequest,
    max_bytes: u64,
) -> Result<Bytes, FetchError> {
    let response = timeout_at(request.deadline, transport.get(request))
        .await
        .map_err(|_| FetchError::Timeout)??;

    if !(200..300).contains(&response.status) {
        return Err(FetchError::HttpStatus(response.status));
    }

    let bytes = read_limited_bytes(response, max_bytes, request.deadline).await?;
    tracing::debug!(url = %request.url, bytes = bytes.len(), "Fetched feed body");
    Ok(bytes)
}

/// Reads the body through a ceiling of `limit + 1` bytes.
///
/// Reaching the ceiling aborts the transfer, which is how "exactly `limit`
/// bytes" and "more than `limit` bytes" are told apart without trusting
/// Content-Length.
async fn read_limited_bytes(
    response: TransportResponse,
    limit: u64,
    deadline: Instant,
) -> Result<Bytes, FetchError> {
    let expected_length = response.content_length;

    // Fast path: declared size already over the limit
    if let Some(len) = expected_length {
        if len > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let ceiling = limit.saturating_add(1);
    let initial = expected_length.unwrap_or(0).min(64 * 1024) as usize;
    let mut body = BytesMut::with_capacity(initial);
    let mut stream = response.body;

    while let Some(chunk) = timeout_at(deadline, stream.next())
        .await
        .map_err(|_| FetchError::Timeout)?
    {
        let chunk = chunk?;
        let room = ceiling - body.len() as u64;
        let take = (chunk.len() as u64).min(room) as usize;
        body.extend_from_slice(&chunk[..take]);

        if body.len() as u64 >= ceiling {
            tracing::debug!(limit = limit, "Response body exceeded size ceiling, aborting read");
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    if let Some(expected) = expected_length {
        if (body.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: body.len(),
            });
        }
    }

    Ok(body.freeze())
}
