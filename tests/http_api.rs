//! HTTP boundary tests: routing, error mapping and authentication.
//!
//! The router is driven with `tower::ServiceExt::oneshot` against a canned
//! transport, so no sockets are opened.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use bytes::Bytes;
use futures::{stream, StreamExt};
use pretty_assertions::assert_eq;
use rss2json::feed::{Converter, ConverterOptions, FetchError, FetchRequest};
use rss2json::net::{SocksError, Transport, TransportResponse};
use rss2json::server::{
    self, AppState, ServerOptions, CONTENT_TYPE_JSON, MSG_INVALID_INPUT, MSG_TIMEOUT,
    MSG_UNAUTHORIZED, MSG_UPSTREAM,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use tower::ServiceExt;

const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Canned</title>
    <item>
      <title>First &amp; foremost</title>
      <guid>first</guid>
      <description><![CDATA[<p>Hello</p>]]></description>
      <media:thumbnail url="https://img.example.com/first.jpg"/>
    </item>
  </channel>
</rss>"#;

/// What the canned transport does for every request.
#[derive(Clone, Copy)]
enum Canned {
    Feed,
    Status(u16),
    Timeout,
    ProxyTimeout,
    Refused,
}

impl Transport for Canned {
    async fn get(&self, _request: &FetchRequest) -> Result<TransportResponse, FetchError> {
        let (status, body) = match *self {
            Canned::Feed => (200, FEED),
            Canned::Status(code) => (code, ""),
            Canned::Timeout => return Err(FetchError::Timeout),
            Canned::ProxyTimeout => return Err(FetchError::Proxy(SocksError::Timeout)),
            Canned::Refused => {
                return Err(FetchError::Tunnel("connection refused".to_string()))
            }
        };
        let chunk: Result<Bytes, FetchError> = Ok(Bytes::from_static(body.as_bytes()));
        Ok(TransportResponse {
            status,
            content_length: Some(body.len() as u64),
            body: stream::iter(vec![chunk]).boxed(),
        })
    }
}

fn app(canned: Canned, options: ServerOptions) -> axum::Router {
    let converter = Converter::new(canned, ConverterOptions::default());
    server::router(AppState::new(converter), &options)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, String, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, content_type, value)
}

const CONVERT_URI: &str = "/api/v1/rss2json?url=https%3A%2F%2Fexample.com%2Ffeed.xml";

// ============================================================================
// Conversion route
// ============================================================================

#[tokio::test]
async fn test_convert_success() {
    let (status, content_type, body) =
        send(app(Canned::Feed, ServerOptions::default()), get(CONVERT_URI)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, CONTENT_TYPE_JSON);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], "1");
    assert_eq!(
        body["feed"],
        json!({"url": "https://example.com/feed.xml", "title": "Canned"})
    );

    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["title"], "First & foremost");
    assert_eq!(items[0]["description"], "<p>Hello</p>");
    assert_eq!(items[0]["guid"], "first");
    assert_eq!(items[0]["thumbnail"], "https://img.example.com/first.jpg");
    assert!(items[0].get("content").is_none());
}

#[tokio::test]
async fn test_missing_url_is_422() {
    for uri in ["/api/v1/rss2json", "/api/v1/rss2json?url=", "/api/v1/rss2json?url=%20%20"] {
        let (status, content_type, body) =
            send(app(Canned::Feed, ServerOptions::default()), get(uri)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", uri);
        assert_eq!(content_type, CONTENT_TYPE_JSON);
        assert_eq!(
            body,
            json!({"status": "error", "version": "1", "message": MSG_INVALID_INPUT})
        );
    }
}

#[tokio::test]
async fn test_malformed_url_is_422() {
    let (status, _, body) = send(
        app(Canned::Feed, ServerOptions::default()),
        get("/api/v1/rss2json?url=ftp%3A%2F%2Fexample.com%2Ffeed"),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["message"], MSG_INVALID_INPUT);
}

#[tokio::test]
async fn test_upstream_failures_are_400() {
    for canned in [Canned::Status(404), Canned::Status(500), Canned::Refused] {
        let (status, _, body) = send(app(canned, ServerOptions::default()), get(CONVERT_URI)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({"status": "error", "version": "1", "message": MSG_UPSTREAM})
        );
    }
}

#[tokio::test]
async fn test_timeouts_are_408() {
    for canned in [Canned::Timeout, Canned::ProxyTimeout] {
        let (status, _, body) = send(app(canned, ServerOptions::default()), get(CONVERT_URI)).await;
        assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(body["message"], MSG_TIMEOUT);
    }
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let response = app(Canned::Feed, ServerOptions::default())
        .oneshot(get("/api/v2/rss2json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health() {
    let (status, content_type, body) =
        send(app(Canned::Feed, ServerOptions::default()), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, CONTENT_TYPE_JSON);
    assert_eq!(body["status"], "ok");
    assert!(body["uptime"].as_f64().unwrap() >= 0.0);
}

// ============================================================================
// Authentication
// ============================================================================

fn with_key(key: &str) -> ServerOptions {
    ServerOptions {
        api_key: Some(SecretString::from(key.to_string())),
        request_log: true,
    }
}

fn authorized(uri: &str, authorization: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, authorization)
        .header("x-forwarded-for", "203.0.113.9")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_auth_required_when_key_configured() {
    for uri in [CONVERT_URI, "/health"] {
        let (status, content_type, body) = send(app(Canned::Feed, with_key("s3cret")), get(uri)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", uri);
        assert_eq!(content_type, CONTENT_TYPE_JSON);
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], MSG_UNAUTHORIZED);
    }
}

#[tokio::test]
async fn test_wrong_key_rejected() {
    for value in ["Bearer nope", "s3cret", "Basic s3cret", "Bearer s3cret-and-more"] {
        let (status, _, _) = send(
            app(Canned::Feed, with_key("s3cret")),
            authorized(CONVERT_URI, value),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", value);
    }
}

#[tokio::test]
async fn test_matching_key_accepted_case_insensitively() {
    for value in ["Bearer s3cret", "bearer S3CRET", "  BEARER s3cret  "] {
        let (status, _, body) = send(
            app(Canned::Feed, with_key("s3cret")),
            authorized(CONVERT_URI, value),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", value);
        assert_eq!(body["status"], "ok");
    }
}
