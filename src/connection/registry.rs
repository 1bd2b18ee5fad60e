// src/connection/registry.rs

//! Defines `Connection`, the value that is moved between the multiplexer and
//! the worker pools, and `Registry`, the shared table describing every live
//! connection.

use super::guard::ConnectionGuard;
use crate::core::errors::TicketboxError;
use crate::core::executor::DisconnectHook;
use crate::core::protocol::{Message, Request, Response, Status, encode};
use bytes::Bytes;
use dashmap::DashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use strum_macros::{AsRefStr, Display};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

/// Identifies a connection for its whole life. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The readiness condition a connection is currently waiting on.
///
/// `None` means a pipeline stage owns the connection and the multiplexer is
/// not watching it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Interest {
    None,
    Readable,
    Writable,
}

/// What an encoded outbound payload is, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Catalog,
    Response(Status),
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Catalog => f.write_str("command catalog"),
            Delivery::Response(status) => write!(f, "{status} response"),
        }
    }
}

/// An envelope already in wire form, waiting for write readiness.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub bytes: Bytes,
    pub delivery: Delivery,
}

impl Outgoing {
    pub fn response(response: Response) -> Result<Self, TicketboxError> {
        let status = response.status;
        let bytes = encode(&Message::Response(response))?;
        Ok(Self {
            bytes: Bytes::from(bytes),
            delivery: Delivery::Response(status),
        })
    }

    pub fn catalog(bytes: Bytes) -> Self {
        Self {
            bytes,
            delivery: Delivery::Catalog,
        }
    }
}

/// The payload slot. Holds at most one thing at a time.
#[derive(Debug, Default)]
pub enum Attachment {
    #[default]
    Empty,
    Request(Request),
    Response(Response),
    Encoded(Outgoing),
}

impl Attachment {
    pub fn kind(&self) -> &'static str {
        match self {
            Attachment::Empty => "nothing",
            Attachment::Request(_) => "a request",
            Attachment::Response(_) => "a response",
            Attachment::Encoded(_) => "an encoded envelope",
        }
    }
}

/// Observable facts about a live connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub addr: SocketAddr,
    pub created: Instant,
    pub interest: Interest,
}

/// The table of live connections. Entries are added on accept and removed
/// exactly once, by the connection's `ConnectionGuard`.
#[derive(Debug, Default)]
pub struct Registry {
    entries: DashMap<ConnectionId, ConnectionInfo>,
    last_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh id and records the connection with no interest.
    pub(crate) fn register(&self, addr: SocketAddr) -> ConnectionId {
        let id = ConnectionId(self.last_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.entries.insert(
            id,
            ConnectionInfo {
                addr,
                created: Instant::now(),
                interest: Interest::None,
            },
        );
        id
    }

    pub(crate) fn set_interest(&self, id: ConnectionId, interest: Interest) {
        if let Some(mut entry) = self.entries.get_mut(&id) {
            entry.interest = interest;
        }
    }

    pub(crate) fn remove(&self, id: ConnectionId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn get(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.entries.get(&id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.entries.iter().map(|e| *e.key()).collect()
    }
}

/// A live client connection.
///
/// There is exactly one `Connection` value per socket and it is always owned
/// by exactly one party: the multiplexer (while armed for readiness) or one
/// pipeline stage. Dropping it tears the connection down.
pub struct Connection {
    // Declared first so the disconnect hook and registry removal run before
    // the socket below is closed.
    guard: ConnectionGuard,
    stream: TcpStream,
    interest: Interest,
    slot: Attachment,
    hold: Option<oneshot::Receiver<()>>,
}

impl Connection {
    pub(crate) fn new(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<Registry>,
        hook: Arc<dyn DisconnectHook>,
    ) -> Self {
        let id = registry.register(addr);
        Self {
            guard: ConnectionGuard::new(registry, hook, id, addr),
            stream,
            interest: Interest::None,
            slot: Attachment::Empty,
            hold: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.guard.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.guard.addr
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub(crate) fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Only the multiplexer changes interest.
    pub(crate) fn set_interest(&mut self, interest: Interest) {
        self.interest = interest;
        self.guard.registry.set_interest(self.guard.id, interest);
    }

    /// Replaces the payload slot, returning what it held.
    pub(crate) fn attach(&mut self, attachment: Attachment) -> Attachment {
        std::mem::replace(&mut self.slot, attachment)
    }

    pub(crate) fn take_attachment(&mut self) -> Attachment {
        std::mem::take(&mut self.slot)
    }

    /// Keeps the connection from being armed for reading until `hold`
    /// resolves or its sender is dropped.
    pub(crate) fn hold_until(&mut self, hold: oneshot::Receiver<()>) {
        self.hold = Some(hold);
    }

    pub(crate) fn take_hold(&mut self) -> Option<oneshot::Receiver<()>> {
        self.hold.take()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.guard.id)
            .field("addr", &self.guard.addr)
            .field("interest", &self.interest)
            .field("slot", &self.slot.kind())
            .field("held", &self.hold.is_some())
            .finish()
    }
}
