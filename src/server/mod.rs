// src/server/mod.rs

//! The connection engine: listener, multiplexer loop and worker pools.

use crate::config::Config;
use crate::connection::Registry;
use crate::core::executor::CommandExecutor;
use anyhow::Result;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;

mod acceptor;
mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod multiplexer;
mod pipeline;
mod pool;

pub use pool::WorkerPool;

use context::ServerContext;
use multiplexer::Multiplexer;

/// A bound, not yet running server.
pub struct Server {
    ctx: ServerContext,
}

impl Server {
    /// Binds the listening socket and builds the worker pools.
    pub async fn bind(config: &Config, executor: Arc<dyn CommandExecutor>) -> Result<Self> {
        let ctx = initialization::setup(config, executor).await?;
        Ok(Self { ctx })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.ctx.listener.local_addr()
    }

    /// The live-connection table, shared with the running server.
    pub fn registry(&self) -> Arc<Registry> {
        self.ctx.registry.clone()
    }

    /// Runs the multiplexer until a message arrives on `shutdown_rx`, then
    /// drains the pools and closes every connection.
    pub async fn serve(self, shutdown_rx: broadcast::Receiver<()>) {
        let ServerContext {
            listener,
            acceptor,
            pipeline,
            handback_rx,
            poll_interval,
            ..
        } = self.ctx;
        Multiplexer::new(listener, acceptor, pipeline, handback_rx, poll_interval)
            .run(shutdown_rx)
            .await;
    }
}

/// The main server startup function: bind, serve, and shut down on SIGINT
/// or SIGTERM.
pub async fn run(config: Config, executor: Arc<dyn CommandExecutor>) -> Result<()> {
    let server = Server::bind(&config, executor).await?;
    connection_loop::run(server, &config.metrics).await
}
