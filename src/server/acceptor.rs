// src/server/acceptor.rs

//! Turns freshly accepted sockets into registered connections.

use crate::connection::{Attachment, Connection, Outgoing, Registry};
use crate::core::errors::TicketboxError;
use crate::core::executor::DisconnectHook;
use crate::core::metrics;
use crate::core::protocol::{CommandCatalog, Message, encode};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{info, warn};

pub(crate) struct Acceptor {
    registry: Arc<Registry>,
    hook: Arc<dyn DisconnectHook>,
    /// The catalog in wire form, encoded once and shared by every client.
    catalog: Bytes,
    tcp_nodelay: bool,
    max_clients: usize,
}

impl Acceptor {
    pub(crate) fn new(
        registry: Arc<Registry>,
        hook: Arc<dyn DisconnectHook>,
        catalog: &CommandCatalog,
        tcp_nodelay: bool,
        max_clients: usize,
    ) -> Result<Self, TicketboxError> {
        let catalog = Bytes::from(encode(&Message::Catalog(catalog.clone()))?);
        Ok(Self {
            registry,
            hook,
            catalog,
            tcp_nodelay,
            max_clients,
        })
    }

    /// Registers a new connection with the command catalog attached as its
    /// first outbound payload. The caller arms it for write readiness.
    ///
    /// Never blocks. On error the socket is dropped, which closes it.
    pub(crate) fn accept(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
    ) -> Result<Connection, TicketboxError> {
        metrics::CONNECTIONS_RECEIVED_TOTAL.inc();

        if self.registry.len() >= self.max_clients {
            metrics::CONNECTIONS_REJECTED_TOTAL.inc();
            warn!(
                "Refusing connection from {}: max_clients ({}) reached",
                addr, self.max_clients
            );
            return Err(TicketboxError::TooManyClients(self.max_clients));
        }

        if self.tcp_nodelay {
            stream.set_nodelay(true)?;
        }

        let mut conn = Connection::new(stream, addr, self.registry.clone(), self.hook.clone());
        conn.attach(Attachment::Encoded(Outgoing::catalog(self.catalog.clone())));
        info!("Client connected: {} ({})", addr, conn.id());
        Ok(conn)
    }
}
