// src/core/executor.rs

//! The seams between the connection engine and the business layer.

use crate::connection::ConnectionId;
use crate::core::errors::CommandError;
use crate::core::protocol::{CommandCatalog, Request, Response};
use std::net::SocketAddr;

/// Who a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    pub connection_id: ConnectionId,
    pub peer: SocketAddr,
}

/// Notified once for every connection teardown, from whichever stage
/// detected the failure.
pub trait DisconnectHook: Send + Sync {
    fn on_disconnect(&self, connection_id: ConnectionId);
}

/// Validates and executes decoded requests.
///
/// `execute` is synchronous and may block; the engine calls it on the
/// blocking thread pool under a dispatch-pool permit. Returning an error
/// produces a status-coded response and leaves the connection open.
pub trait CommandExecutor: DisconnectHook {
    /// The commands advertised to every new client. Called once at startup.
    fn catalog(&self) -> CommandCatalog;

    fn execute(
        &self,
        ctx: &ExecutionContext,
        request: &Request,
    ) -> Result<Response, CommandError>;
}
