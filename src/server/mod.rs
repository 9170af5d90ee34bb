//! HTTP boundary.
//!
//! Routes:
//!
//! - `GET /api/v1/rss2json?url=<feed>` - convert a feed to JSON
//! - `GET /health` - liveness and uptime
//!
//! The boundary maps [`ConvertError`](crate::feed::ConvertError) kinds to
//! status codes and fixed messages; it never inspects the underlying cause
//! beyond "was this a timeout".

mod handlers;
mod middleware;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use secrecy::SecretString;
use tokio::net::TcpListener;

use crate::feed::Converter;
use crate::net::Transport;

pub use handlers::{
    CONTENT_TYPE_JSON, MSG_INVALID_INPUT, MSG_TIMEOUT, MSG_UNAUTHORIZED, MSG_UPSTREAM,
};
pub use middleware::client_ip;

/// Shared per-process state handed to every handler.
pub struct AppState<T> {
    converter: Arc<Converter<T>>,
    started: Instant,
}

// Manual impl: deriving would require `T: Clone`.
impl<T> Clone for AppState<T> {
    fn clone(&self) -> Self {
        Self {
            converter: Arc::clone(&self.converter),
            started: self.started,
        }
    }
}

impl<T: Transport> AppState<T> {
    pub fn new(converter: Converter<T>) -> Self {
        Self {
            converter: Arc::new(converter),
            started: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ServerOptions {
    /// Required bearer token; `None` disables authentication.
    pub api_key: Option<SecretString>,
    /// Emit one access-log line per request.
    pub request_log: bool,
}

/// Builds the application router.
///
/// Authentication wraps every route, health included. The access log sits
/// outside authentication so rejected requests are logged too.
pub fn router<T: Transport + 'static>(state: AppState<T>, options: &ServerOptions) -> Router {
    let mut router = Router::new()
        .route("/api/v1/rss2json", get(handlers::convert::<T>))
        .route("/health", get(handlers::health::<T>))
        .with_state(state);

    if let Some(key) = &options.api_key {
        let expected = Arc::new(middleware::ExpectedToken::new(key));
        router = router.layer(axum::middleware::from_fn_with_state(
            expected,
            middleware::require_api_key,
        ));
    }

    if options.request_log {
        router = router.layer(axum::middleware::from_fn(middleware::log_requests));
    }

    router
}

/// Serves `app` until Ctrl-C, then drains in-flight requests.
///
/// # Errors
///
/// Returns the accept loop's I/O error.
pub async fn serve(listener: TcpListener, app: Router) -> std::io::Result<()> {
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received, draining connections"),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    }
}
