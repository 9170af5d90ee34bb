use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use rss2json::config::Config;
use rss2json::feed::{Converter, ConverterOptions};
use rss2json::net::{HttpTransport, ProxySetting, REQUEST_TIMEOUT};
use rss2json::server::{self, AppState, ServerOptions};

#[derive(Parser, Debug)]
#[command(name = "rss2json", version, about = "Fetch RSS/Atom feeds and serve them as JSON")]
struct Args {
    /// TOML configuration file
    #[arg(long, value_name = "FILE", default_value = "rss2json.toml")]
    config: PathBuf,

    /// Bind address, overrides LISTEN_ADDR and PORT
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?
        .with_process_env();
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    tracing::debug!(config = ?config, "Effective configuration");

    let proxy = ProxySetting::from_config(config.proxy.as_deref());
    let transport = HttpTransport::build(&proxy).context("Failed to build HTTP transport")?;

    let options = ConverterOptions {
        max_bytes: config.max_feed_bytes(),
        request_timeout: REQUEST_TIMEOUT,
        headers: config.header_map(),
    };
    let max_bytes = options.max_bytes;
    let converter = Converter::new(transport, options);

    let server_options = ServerOptions {
        api_key: config.api_key(),
        request_log: config.request_log,
    };
    let app = server::router(AppState::new(converter), &server_options);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.listen_addr))?;

    tracing::info!(
        addr = %config.listen_addr,
        proxy = %proxy.describe(),
        max_bytes = max_bytes,
        auth = server_options.api_key.is_some(),
        request_log = server_options.request_log,
        "rss2json listening"
    );

    server::serve(listener, app).await.context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}
