use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use secrecy::{ExposeSecret, SecretString};

use super::handlers::{json, MSG_UNAUTHORIZED};
use crate::feed;

/// The full `Authorization` value a request must carry, lowercased.
pub struct ExpectedToken(SecretString);

impl ExpectedToken {
    pub fn new(key: &SecretString) -> Self {
        let normalized = format!("bearer {}", key.expose_secret().trim().to_lowercase());
        Self(SecretString::from(normalized))
    }

    fn matches(&self, authorization: &str) -> bool {
        let provided = authorization.trim().to_lowercase();
        constant_time_eq(&provided, self.0.expose_secret())
    }
}

pub async fn require_api_key(
    State(expected): State<Arc<ExpectedToken>>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| expected.matches(v));

    if !authorized {
        tracing::debug!(uri = %request.uri(), "Rejected request without valid API key");
        return json(
            StatusCode::UNAUTHORIZED,
            &feed::Response::error(MSG_UNAUTHORIZED),
        );
    }

    next.run(request).await
}

pub async fn log_requests(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer);

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        ip = %ip,
        "request"
    );
    response
}

/// Client address for logging: the first `X-Forwarded-For` entry, else the
/// socket peer, else `-`.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "-".to_string())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
