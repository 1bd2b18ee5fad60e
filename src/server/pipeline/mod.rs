// src/server/pipeline/mod.rs

//! The receive → dispatch → send stages and the state they share.
//!
//! A `Connection` is passed to a stage by value and handed back to the
//! multiplexer by value, so at most one stage can touch it at any time.

pub(crate) mod dispatch;
pub(crate) mod receive;
pub(crate) mod send;

use super::pool::WorkerPool;
use crate::connection::{Connection, Interest};
use crate::core::errors::TicketboxError;
use crate::core::executor::CommandExecutor;
use crate::core::metrics;
use crate::core::protocol::CommandCatalog;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A connection returning to the multiplexer together with the readiness
/// it should be armed for next.
#[derive(Debug)]
pub(crate) struct Handback {
    pub conn: Connection,
    pub interest: Interest,
}

/// Everything the stages need, shared by all connections.
pub struct Pipeline {
    pub receive: WorkerPool,
    pub dispatch: WorkerPool,
    pub send: WorkerPool,
    pub(crate) executor: Arc<dyn CommandExecutor>,
    pub(crate) catalog: Arc<CommandCatalog>,
    pub(crate) dispatch_timeout: Option<Duration>,
    handback_tx: mpsc::UnboundedSender<Handback>,
}

impl Pipeline {
    pub(crate) fn new(
        receive: WorkerPool,
        dispatch: WorkerPool,
        send: WorkerPool,
        executor: Arc<dyn CommandExecutor>,
        catalog: Arc<CommandCatalog>,
        dispatch_timeout: Option<Duration>,
    ) -> (Self, mpsc::UnboundedReceiver<Handback>) {
        // Unbounded: a stage must never wait on the loop.
        let (handback_tx, handback_rx) = mpsc::unbounded_channel();
        let pipeline = Self {
            receive,
            dispatch,
            send,
            executor,
            catalog,
            dispatch_timeout,
            handback_tx,
        };
        (pipeline, handback_rx)
    }

    /// Returns a connection to the multiplexer asking for `interest`.
    pub(crate) fn hand_back(&self, conn: Connection, interest: Interest) {
        if let Err(mpsc::error::SendError(handback)) =
            self.handback_tx.send(Handback { conn, interest })
        {
            debug!(
                "Multiplexer is gone; closing connection {} instead of re-arming it.",
                handback.conn.id()
            );
            disconnect(handback.conn, TicketboxError::PoolClosed("multiplexer"));
        }
    }

    pub(crate) fn pools(&self) -> [&WorkerPool; 3] {
        [&self.receive, &self.dispatch, &self.send]
    }

    /// Closes every pool to new work and waits for in-flight tasks.
    pub(crate) async fn shutdown(&self) {
        for pool in self.pools() {
            pool.close();
        }
        for pool in self.pools() {
            pool.drain().await;
        }
    }
}

/// Tears a connection down. Consuming the connection is what makes this
/// happen at most once.
pub(crate) fn disconnect(conn: Connection, reason: TicketboxError) {
    metrics::DISCONNECTS_TOTAL
        .with_label_values(&[reason.reason()])
        .inc();
    if reason.is_normal_disconnect() {
        info!("Client {} ({}) disconnected.", conn.addr(), conn.id());
    } else if reason.is_protocol_violation() {
        warn!(
            "Protocol violation from {} ({}): {}. Closing connection.",
            conn.addr(),
            conn.id(),
            reason
        );
    } else {
        warn!(
            "Closing connection {} ({}): {}",
            conn.addr(),
            conn.id(),
            reason
        );
    }
    drop(conn);
}
