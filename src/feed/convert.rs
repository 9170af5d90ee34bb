//! Feed conversion: fetch, parse, scan and pair.
//!
//! Every failure is classified into one of two kinds. [`ErrorKind::InvalidInput`]
//! means the request itself cannot be serviced (missing or malformed URL);
//! [`ErrorKind::Upstream`] covers everything that happens after a request
//! leaves this process. The underlying cause stays attached for logging, but
//! the HTTP boundary derives its status and message from the kind alone.

use std::time::Duration;

use feed_rs::parser::ParseFeedError;
use reqwest::header::HeaderMap;
use thiserror::Error;
use tokio::time::Instant;

use super::fetcher::{fetch, FetchError, FetchRequest, DEFAULT_MAX_FEED_BYTES};
use super::model::{FeedMeta, Item, Response};
use super::parser::{parse_feed, ParsedEntry};
use super::thumbnail::scan_thumbnails;
use crate::net::{Transport, REQUEST_TIMEOUT};
use crate::util::{validate_url, UrlValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Upstream,
}

/// What went wrong underneath a [`ConvertError`].
#[derive(Debug, Error)]
pub enum ConvertCause {
    #[error("missing feed url")]
    MissingUrl,
    #[error("invalid feed url: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("feed parse failed: {0}")]
    Parse(#[from] ParseFeedError),
}

#[derive(Debug, Error)]
#[error("{cause}")]
pub struct ConvertError {
    kind: ErrorKind,
    #[source]
    cause: ConvertCause,
}

impl ConvertError {
    fn invalid_input(cause: impl Into<ConvertCause>) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            cause: cause.into(),
        }
    }

    fn upstream(cause: impl Into<ConvertCause>) -> Self {
        Self {
            kind: ErrorKind::Upstream,
            cause: cause.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn cause(&self) -> &ConvertCause {
        &self.cause
    }

    pub fn is_invalid_input(&self) -> bool {
        self.kind == ErrorKind::InvalidInput
    }

    /// True when the upstream failure was a missed deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(&self.cause, ConvertCause::Fetch(e) if e.is_timeout())
    }
}

#[derive(Debug, Clone)]
pub struct ConverterOptions {
    /// Body size ceiling in bytes.
    pub max_bytes: u64,
    /// Deadline applied to the whole fetch, dial to last body byte.
    pub request_timeout: Duration,
    /// Extra outbound headers from configuration.
    pub headers: HeaderMap,
}

impl Default for ConverterOptions {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_FEED_BYTES,
            request_timeout: REQUEST_TIMEOUT,
            headers: HeaderMap::new(),
        }
    }
}

/// Turns a feed URL into a [`Response`].
///
/// Holds the process-wide transport; conversions share nothing else and
/// may run concurrently on one `Converter`.
#[derive(Debug)]
pub struct Converter<T> {
    transport: T,
    options: ConverterOptions,
}

impl<T: Transport> Converter<T> {
    pub fn new(transport: T, options: ConverterOptions) -> Self {
        Self { transport, options }
    }

    pub fn options(&self) -> &ConverterOptions {
        &self.options
    }

    /// Fetches `url` once and converts it.
    ///
    /// `headers` are applied after the configured headers, so a caller can
    /// override any of them (including `User-Agent`).
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidInput`] for an empty, relative or non-http(s) URL;
    /// [`ErrorKind::Upstream`] for every fetch or parse failure. No partial
    /// result is returned on failure.
    pub async fn convert(&self, url: &str, headers: &HeaderMap) -> Result<Response, ConvertError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ConvertError::invalid_input(ConvertCause::MissingUrl));
        }
        let target = validate_url(url).map_err(ConvertError::invalid_input)?;

        let deadline = Instant::now() + self.options.request_timeout;
        let request = FetchRequest::new(target, deadline)
            .with_headers(&self.options.headers)
            .with_headers(headers);

        let body = fetch(&self.transport, &request, self.options.max_bytes)
            .await
            .map_err(ConvertError::upstream)?;

        let feed = parse_feed(&body).map_err(ConvertError::upstream)?;
        let thumbnails = scan_thumbnails(&body);
        if thumbnails.len() != feed.entries.len() {
            tracing::debug!(
                url = %url,
                entries = feed.entries.len(),
                thumbnails = thumbnails.len(),
                "Entry and thumbnail counts differ; pairing by position"
            );
        }

        let meta = FeedMeta::new(url, &feed);
        let items = pair_thumbnails(feed.entries, thumbnails);
        tracing::debug!(url = %url, items = items.len(), "Converted feed");
        Ok(Response::ok(meta, items))
    }
}

/// Attaches the i-th thumbnail to the i-th entry.
///
/// Pairing is by position only and best-effort: entries past the end of
/// `thumbnails` get an empty thumbnail, surplus thumbnails are dropped.
pub fn pair_thumbnails(entries: Vec<ParsedEntry>, thumbnails: Vec<String>) -> Vec<Item> {
    let mut thumbnails = thumbnails.into_iter();
    entries
        .into_iter()
        .map(|entry| Item::new(entry, thumbnails.next().unwrap_or_default()))
        .collect()
}
