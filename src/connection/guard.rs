// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard that performs connection teardown.

use super::registry::{ConnectionId, Registry};
use crate::core::executor::DisconnectHook;
use crate::core::metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Runs the disconnect handler when the owning `Connection` is dropped.
///
/// Because a `Connection` can only be dropped once, the hook fires exactly
/// once per connection regardless of which stage detected the failure.
pub struct ConnectionGuard {
    pub(crate) registry: Arc<Registry>,
    hook: Arc<dyn DisconnectHook>,
    pub(crate) id: ConnectionId,
    pub(crate) addr: SocketAddr,
}

impl ConnectionGuard {
    pub(crate) fn new(
        registry: Arc<Registry>,
        hook: Arc<dyn DisconnectHook>,
        id: ConnectionId,
        addr: SocketAddr,
    ) -> Self {
        metrics::CONNECTED_CLIENTS.inc();
        Self {
            registry,
            hook,
            id,
            addr,
        }
    }
}

impl Drop for ConnectionGuard {
    /// Releases connection-scoped resources held by the executor, then
    /// removes the connection from the registry.
    fn drop(&mut self) {
        debug!(
            "Tearing down connection {} ({}), releasing its resources",
            self.id, self.addr
        );
        self.hook.on_disconnect(self.id);
        if !self.registry.remove(self.id) {
            debug!("Connection {} was already absent from the registry.", self.id);
        }
        metrics::CONNECTED_CLIENTS.dec();
    }
}
