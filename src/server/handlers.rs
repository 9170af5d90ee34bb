use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::feed::{self, ConvertError, ErrorKind};
use crate::net::Transport;

pub const CONTENT_TYPE_JSON: &str = "application/json; charset=utf-8";

pub const MSG_INVALID_INPUT: &str = "Missing rss url.";
pub const MSG_TIMEOUT: &str = "RSS fetch timeout. The target server responded too slowly.";
pub const MSG_UPSTREAM: &str =
    "Cannot download this RSS feed. Please check if the URL is valid and accessible.";
pub const MSG_UNAUTHORIZED: &str = "unauthorized";

#[derive(Debug, Default, Deserialize)]
pub struct ConvertParams {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    uptime: f64,
}

pub async fn convert<T: Transport + 'static>(
    State(state): State<AppState<T>>,
    Query(params): Query<ConvertParams>,
) -> Response {
    let url = params.url.unwrap_or_default();

    match state.converter.convert(&url, &HeaderMap::new()).await {
        Ok(body) => json(StatusCode::OK, &body),
        Err(e) => {
            let (status, message) = error_status(&e);
            tracing::warn!(
                url = %url,
                kind = ?e.kind(),
                status = status.as_u16(),
                error = %e,
                "Feed conversion failed"
            );
            json(status, &feed::Response::error(message))
        }
    }
}

pub async fn health<T: Transport + 'static>(State(state): State<AppState<T>>) -> Response {
    json(
        StatusCode::OK,
        &Health {
            status: "ok",
            uptime: state.started.elapsed().as_secs_f64(),
        },
    )
}

/// Status and caller-facing message for a failed conversion.
pub(super) fn error_status(err: &ConvertError) -> (StatusCode, &'static str) {
    match err.kind() {
        ErrorKind::InvalidInput => (StatusCode::UNPROCESSABLE_ENTITY, MSG_INVALID_INPUT),
        ErrorKind::Upstream if err.is_timeout() => (StatusCode::REQUEST_TIMEOUT, MSG_TIMEOUT),
        ErrorKind::Upstream => (StatusCode::BAD_REQUEST, MSG_UPSTREAM),
    }
}

/// Serializes `body` with the JSON content type the API has always used.
pub(super) fn json<B: Serialize>(status: StatusCode, body: &B) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_JSON))],
            bytes,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response body");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
