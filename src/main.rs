//! apiproxy - Entry point.
//!
//! Listens for base64 JSON queries on a TCP socket, answers each one through
//! the matching provider handler and caches upstream responses.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::lookup_host;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use apiproxy::Config;
use apiproxy::cache::CachedClient;
use apiproxy::dispatch::Dispatcher;
use apiproxy::server;
use apiproxy::services::Service;
use apiproxy::upstream::ReqwestTransport;

#[derive(Parser, Debug)]
#[command(name = "apiproxy")]
#[command(about = "Caching socket dispatcher for third-party information APIs")]
#[command(version)]
struct Cli {
    /// Socket host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Socket port
    #[arg(long, default_value_t = 8555)]
    port: u16,

    /// Configuration file (JSON, or TOML with a .toml extension)
    #[arg(long, env = "API_PROXY_CONFIG_PATH", default_value = "config.json")]
    config: PathBuf,
}

fn load_config(path: &Path) -> Config {
    let mut config = match Config::load(path) {
        Ok(config) => config,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "no usable configuration, running without keys");
            Config::default()
        }
    };
    config.apply_env_overrides(|name| std::env::var(name).ok());
    config
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl-C received, shutting down..."),
        Err(err) => {
            error!("Failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config);

    apiproxy::metrics::init(&config.metrics).context("Failed to initialize metrics")?;
    if config.metrics.enabled {
        info!("Metrics enabled on {}", config.metrics.listen);
    }

    for service in Service::ALL.into_iter().filter(|service| service.is_remote()) {
        let keyed = config
            .service(service)
            .and_then(|settings| settings.api_key.as_deref())
            .is_some_and(|key| !key.is_empty());
        info!(service = %service, keyed, "service configured");
    }

    let transport =
        ReqwestTransport::new(config.upstream_timeout()).context("Failed to create HTTP client")?;
    let client = CachedClient::new(transport, config.cache_settings());
    let dispatcher = Dispatcher::new(client, Arc::new(config.clone()))
        .with_settings(config.service_settings());

    let addr = lookup_host((cli.host.as_str(), cli.port))
        .await
        .with_context(|| format!("Failed to resolve {}:{}", cli.host, cli.port))?
        .next()
        .with_context(|| format!("No address found for {}", cli.host))?;

    server::bind_and_serve(
        addr,
        Arc::new(dispatcher),
        config.server_settings(),
        wait_for_ctrl_c(),
    )
    .await
    .context("Server failed")?;

    info!("Shutdown complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    run(Cli::parse()).await
}
