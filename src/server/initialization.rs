// src/server/initialization.rs

//! Builds everything the multiplexer needs: the listening socket, the
//! worker pools and the pre-encoded command catalog.

use super::acceptor::Acceptor;
use super::context::ServerContext;
use super::pipeline::Pipeline;
use super::pool::WorkerPool;
use crate::config::Config;
use crate::connection::Registry;
use crate::core::executor::{CommandExecutor, DisconnectHook};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Initializes all server components before starting the main loop.
///
/// Failing to bind the listening port is fatal: the server does not start.
pub(crate) async fn setup(
    config: &Config,
    executor: Arc<dyn CommandExecutor>,
) -> Result<ServerContext> {
    config.log_summary();

    let catalog = Arc::new(executor.catalog());
    info!("Command catalog loaded with {} commands.", catalog.len());

    let registry = Arc::new(Registry::new());
    let hook: Arc<dyn DisconnectHook> = executor.clone();
    let acceptor = Acceptor::new(
        registry.clone(),
        hook,
        &catalog,
        config.network.tcp_nodelay,
        config.max_clients,
    )
    .context("Failed to encode the command catalog")?;

    let (pipeline, handback_rx) = Pipeline::new(
        WorkerPool::new("receive", config.pipeline.receive_workers),
        WorkerPool::new("dispatch", config.pipeline.resolved_dispatch_workers()),
        WorkerPool::new("send", config.pipeline.resolved_send_workers()),
        executor,
        catalog,
        config.pipeline.dispatch_timeout(),
    );

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!("Ticketbox server listening on {}", listener.local_addr()?);

    Ok(ServerContext {
        listener,
        acceptor,
        pipeline: Arc::new(pipeline),
        handback_rx,
        registry,
        poll_interval: config.poll_interval(),
    })
}
