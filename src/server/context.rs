// src/server/context.rs

use super::acceptor::Acceptor;
use super::pipeline::{Handback, Pipeline};
use crate::connection::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Holds all the initialized state required to run the multiplexer.
pub(crate) struct ServerContext {
    pub listener: TcpListener,
    pub acceptor: Acceptor,
    pub pipeline: Arc<Pipeline>,
    pub handback_rx: mpsc::UnboundedReceiver<Handback>,
    pub registry: Arc<Registry>,
    pub poll_interval: Duration,
}
