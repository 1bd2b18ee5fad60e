// src/server/connection_loop.rs

//! Supervises the multiplexer: starts it, waits for a termination signal and
//! performs the graceful shutdown.

use super::Server;
use super::metrics_server;
use crate::config::MetricsConfig;
use anyhow::{Context, Result, anyhow};
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub(crate) async fn run(server: Server, metrics: &MetricsConfig) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel(1);
    let mut background_tasks: JoinSet<Result<()>> = JoinSet::new();

    if metrics.enabled {
        let port = metrics.port;
        let pipeline = server.ctx.pipeline.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(port, pipeline, shutdown_rx).await
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    let mut sigint =
        signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;

    let mut multiplexer = tokio::spawn(server.serve(shutdown_tx.subscribe()));
    let mut multiplexer_running = true;

    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }

            res = &mut multiplexer => {
                multiplexer_running = false;
                match res {
                    Ok(()) => warn!("Multiplexer loop exited without a shutdown signal."),
                    Err(e) => error!("CRITICAL: Multiplexer loop panicked: {e:?}"),
                }
                break;
            }

            Some(res) = background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            }
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    if shutdown_tx.send(()).is_err() {
        warn!("No task was listening for the shutdown signal.");
    }

    if multiplexer_running {
        info!("Waiting for in-flight requests to finish...");
        multiplexer
            .await
            .map_err(|e| anyhow!("Multiplexer loop panicked during shutdown: {e:?}"))?;
    }

    if tokio::time::timeout(Duration::from_secs(10), async {
        while background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    }
    info!("Server shutdown complete.");
    Ok(())
}
