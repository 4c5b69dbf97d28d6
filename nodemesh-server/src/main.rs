//! Nodemesh Server - Headless Daemon
//!
//! Runs one mesh node:
//! - Connects to the shared etcd directory, or runs standalone in-process
//! - Registers this node in the directory and keeps its lease alive
//! - Mirrors membership of its own type and every watched prefix
//! - Keeps peer connections in sync with membership
//! - Serves the session router over a small REST API on /api/*
//!
//! Access via: http://localhost:8046

use anyhow::Result;
use axum::{routing::get, Router};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod cli;
mod config;
mod state;
#[cfg(test)]
mod test_helpers;

use cli::Cli;
use nodemesh_core::{Directory, MeshNode, MemoryDirectory, MirrorAlert, PeerTable};
use nodemesh_types::NodeConfig;
use state::AppState;

const LEASE_REAP_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = config::load_config(cli.config.as_deref(), &cli.overrides())?;
    let port = config.http_port;

    info!(
        node = %config.node.key(),
        prefixes = ?config.mirrored_prefixes(),
        "🚀 Nodemesh node starting on port {}...",
        port
    );
    let directory = connect_directory(&config).await?;
    let peers = Arc::new(PeerTable::new());

    let node = MeshNode::start(&config, directory, peers.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to register node: {}", e))?;
    spawn_alert_logger(&node);

    let state = AppState::new(node, peers, config);
    info!("✅ Node registered, {} prefixes mirrored", state.mirror().prefixes().len());

    let app = build_router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            if let Err(cleanup) = state.node().shutdown().await {
                tracing::warn!(error = %cleanup, "Deregistration failed");
            }
            return Err(e.into());
        },
    };

    info!("🌐 Server listening on http://{}", addr);
    info!("🔌 API available at http://localhost:{}/api/", port);

    let served = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await;

    if let Err(e) = state.node().shutdown().await {
        tracing::warn!(error = %e, "Deregistration failed");
    }
    info!("👋 Nodemesh node stopped");
    served?;
    Ok(())
}

/// Shared etcd cluster when endpoints are configured, otherwise a standalone in-process store.
async fn connect_directory(config: &NodeConfig) -> Result<Arc<dyn Directory>> {
    if config.endpoints.is_empty() {
        info!("🏠 No directory endpoints configured, running standalone");
        let memory = MemoryDirectory::new();
        memory.start_reaper(LEASE_REAP_INTERVAL);
        let directory: Arc<dyn Directory> = memory;
        return Ok(directory);
    }
    etcd_directory(config).await
}

#[cfg(feature = "etcd")]
async fn etcd_directory(config: &NodeConfig) -> Result<Arc<dyn Directory>> {
    let directory =
        nodemesh_core::EtcdDirectory::connect(&config.endpoints, config.keep_alive_timeout())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to directory: {}", e))?;
    Ok(Arc::new(directory))
}

#[cfg(not(feature = "etcd"))]
async fn etcd_directory(config: &NodeConfig) -> Result<Arc<dyn Directory>> {
    anyhow::bail!(
        "Directory endpoints {:?} configured, but this build has no etcd support (enable the `etcd` feature)",
        config.endpoints
    )
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api::router())
        .route("/health", get(api::health_check))
        .route("/healthz", get(api::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Log every mirror alert; recovery follows the configured self-loss policy.
fn spawn_alert_logger(node: &MeshNode) {
    let mut alerts = node.subscribe_alerts();
    tokio::spawn(async move {
        loop {
            match alerts.recv().await {
                Ok(MirrorAlert::SelfRecordLost { key }) => {
                    tracing::error!(key = %key, "🚨 Own membership record lost");
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Missed mirror alerts");
                },
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("🛑 Shutdown signal received");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use nodemesh_types::NodeDescriptor;

    #[tokio::test]
    async fn test_standalone_without_endpoints() {
        let config = NodeConfig::new(NodeDescriptor::new("frontServer", "front-1"));
        let directory = connect_directory(&config).await.unwrap();
        directory.put("config/motd", b"hi".to_vec()).await.unwrap();
        assert!(directory.get("config/motd").await.unwrap().is_some());
    }

    #[cfg(not(feature = "etcd"))]
    #[tokio::test]
    async fn test_endpoints_without_etcd_support_are_rejected() {
        let mut config = NodeConfig::new(NodeDescriptor::new("frontServer", "front-1"));
        config.endpoints = vec!["http://127.0.0.1:2379".to_string()];
        let err = connect_directory(&config).await.err().unwrap();
        assert!(err.to_string().contains("no etcd support"));
    }
}
