use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context;
use clap::Parser;
use iframe_proxy::{ProxyConfig, config::parse_upstream, spawn_proxy};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "iframe-proxy",
    author,
    version,
    about = "Proxy that makes pages embeddable in an iframe"
)]
struct Options {
    /// Address the HTTP server binds to
    #[arg(long, env = "IFRAME_PROXY_BIND")]
    bind: Option<String>,
    /// Port for the HTTP server
    #[arg(long, env = "IFRAME_PROXY_PORT")]
    port: Option<u16>,
    /// Origin that un-prefixed requests are redirected to
    #[arg(long, env = "IFRAME_PROXY_UPSTREAM")]
    upstream: Option<String>,
    /// Directory for the disk mirror and `/static/` files
    #[arg(long, env = "IFRAME_PROXY_STATIC_DIR")]
    static_dir: Option<PathBuf>,
    /// JSON config file; command-line flags take precedence
    #[arg(long, env = "IFRAME_PROXY_CONFIG")]
    config: Option<PathBuf>,
    /// Extra attempts after an upstream connect failure
    #[arg(long, env = "IFRAME_PROXY_CONNECT_RETRIES")]
    connect_retries: Option<u32>,
    /// Disable the in-memory asset cache
    #[arg(long, env = "IFRAME_PROXY_NO_CACHE")]
    no_cache: bool,
    /// Add permissive CORS headers and answer preflights locally
    #[arg(long, env = "IFRAME_PROXY_CORS")]
    cors: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse();
    init_tracing();

    let config = build_config(options)?;
    let handle = spawn_proxy(config)
        .await
        .context("failed to start proxy")?;
    info!(addr = %handle.addr, "ready");

    shutdown_signal().await;
    handle.shutdown().await;
    Ok(())
}

fn build_config(options: Options) -> anyhow::Result<ProxyConfig> {
    let mut config = match options.config.as_deref() {
        Some(path) => ProxyConfig::from_file(path)?,
        None => ProxyConfig::default(),
    };

    if options.bind.is_some() || options.port.is_some() {
        let ip = match options.bind.as_deref() {
            Some(bind) => bind
                .parse()
                .with_context(|| format!("invalid bind address {bind:?}"))?,
            None => config.bind_addr.ip(),
        };
        let port = options.port.unwrap_or(config.bind_addr.port());
        config.bind_addr = SocketAddr::new(ip, port);
    }
    if let Some(upstream) = options.upstream.as_deref() {
        config.default_upstream = Some(parse_upstream(upstream)?);
    }
    if options.static_dir.is_some() {
        config.static_dir = options.static_dir;
    }
    if let Some(retries) = options.connect_retries {
        config.connect_retries = retries;
    }
    if options.no_cache {
        config.features.memory_cache = false;
    }
    if options.cors {
        config.features.add_cors = true;
    }
    Ok(config)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {error}");
    }
    info!("shutdown signal received");
}
