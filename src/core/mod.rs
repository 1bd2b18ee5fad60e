// src/core/mod.rs

//! Protocol, error taxonomy, executor seams and metrics shared by the
//! connection engine.

pub mod errors;
pub mod executor;
pub mod metrics;
pub mod protocol;

pub use errors::{CommandError, TicketboxError};
pub use executor::{CommandExecutor, DisconnectHook, ExecutionContext};
pub use protocol::{CommandCatalog, CommandSpec, Message, Request, Response, Status, Value};
