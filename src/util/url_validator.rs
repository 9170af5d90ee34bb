use thiserror::Error;
use url::Url;

/// Errors that can occur during feed URL validation.
///
/// Every variant means the request cannot be serviced as given, so the
/// converter classifies all of them as invalid input.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string was empty or whitespace.
    #[error("URL is empty")]
    Empty,
    /// The URL string could not be parsed as an absolute URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Validates a URL string for use as a feed source.
///
/// Leading and trailing whitespace is ignored. Only absolute `http` and
/// `https` URLs with a host are accepted.
///
/// # Examples
///
/// ```
/// use rss2json::util::validate_url;
///
/// let url = validate_url("https://example.com/feed.xml").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_url("").is_err());
/// assert!(validate_url("/relative/feed.xml").is_err());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let trimmed = url_str.trim();
    if trimmed.is_empty() {
        return Err(UrlValidationError::Empty);
    }

    let url = Url::parse(trimmed)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(UrlValidationError::MissingHost),
    }
}
