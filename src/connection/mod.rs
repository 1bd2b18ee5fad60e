// src/connection/mod.rs

//! Per-connection state: identity, readiness interest and the payload slot
//! that travels with a connection through the pipeline stages.

mod guard;
mod registry;

pub use guard::ConnectionGuard;
pub use registry::{
    Attachment, Connection, ConnectionId, ConnectionInfo, Delivery, Interest, Outgoing, Registry,
};
