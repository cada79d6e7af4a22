//! Parley Daemon - Chat Orchestration Server
//!
//! This is the main entry point for the parley daemon, which hosts the
//! conversation orchestrator behind a Unix socket so thin clients can drive
//! multi-turn chat sessions against the hosted conversation store.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (config from ~/.config/parley/parley.toml)
//! parley-daemon
//!
//! # Custom socket path
//! parley-daemon --socket-path /tmp/my-parley.sock
//!
//! # With config file
//! parley-daemon --config /etc/parley/parley.toml
//!
//! # Verbose logging
//! RUST_LOG=debug parley-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

mod server;

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UnixListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use parley_core::{load_config, load_config_from_path, HttpStore, ParleyConfig};

use server::DaemonServer;

/// Parley daemon - chat orchestration server
#[derive(Parser, Debug)]
#[command(name = "parley-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Unix socket path for client connections
    #[arg(short = 's', long, env = "PARLEY_SOCKET", value_name = "PATH")]
    socket_path: Option<PathBuf>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "PARLEY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "PARLEY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

/// Get the default socket path
///
/// Uses the XDG runtime directory if available, otherwise the temp dir.
fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("parley")
        .join("parley.sock")
}

/// Runtime directory for per-run files (handshake token)
fn runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("parley")
}

/// Resolve the handshake token: configured value, or generated per run and
/// written for local clients to read
async fn resolve_token(config: &ParleyConfig) -> Result<String> {
    if let Some(token) = &config.auth_token {
        return Ok(token.clone());
    }

    let token = uuid::Uuid::new_v4().simple().to_string();
    let dir = runtime_dir();
    tokio::fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("failed to create runtime dir {}", dir.display()))?;
    tokio::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700)).await?;

    let token_path = dir.join("session.token");
    tokio::fs::write(&token_path, &token)
        .await
        .with_context(|| format!("failed to write token file {}", token_path.display()))?;
    tokio::fs::set_permissions(&token_path, std::fs::Permissions::from_mode(0o600)).await?;

    info!(path = %token_path.display(), "handshake token written");
    Ok(token)
}

/// Bind the listener, replacing any stale socket file
async fn bind_socket(path: &std::path::Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create socket dir {}", parent.display()))?;
        tokio::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700)).await?;
    }

    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        warn!(path = %path.display(), "removing stale socket");
        tokio::fs::remove_file(path).await?;
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("failed to bind {}", path.display()))?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(listener)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    parley_core::logging::init(&args.log_level);

    let config = match &args.config {
        Some(path) => load_config_from_path(path)
            .await
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => load_config().await.context("failed to load config")?,
    };

    let store_config = config.http_store_config().context(
        "conversation store is not configured; set store.api_url and store.api_secret \
         in parley.toml or PARLEY_API_URL / PARLEY_API_SECRET",
    )?;
    let store = Arc::new(HttpStore::new(store_config).context("failed to build store client")?);

    let token = resolve_token(&config).await?;
    let socket_path = args
        .socket_path
        .clone()
        .or_else(|| config.socket_path.clone())
        .unwrap_or_else(default_socket_path);
    let listener = bind_socket(&socket_path).await?;
    info!(socket = %socket_path.display(), "parley-daemon listening");

    let server = Arc::new(DaemonServer::new(
        store,
        config.orchestrator_config(),
        token,
    ));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        result = Arc::clone(&server).run(listener) => {
            result.context("server loop failed")?;
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received, shutting down");
        }
        _ = sigint.recv() => {
            info!("SIGINT received, shutting down");
        }
    }

    info!(
        connections = server.connection_count(),
        "daemon stopped; dropping remaining connections"
    );
    let _ = tokio::fs::remove_file(&socket_path).await;
    Ok(())
}
