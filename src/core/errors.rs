// src/core/errors.rs

//! Defines the error types for the connection engine and for business-level
//! command failures.

use crate::core::protocol::Status;
use std::sync::Arc;
use thiserror::Error;

/// Transport and protocol failures. Every variant is fatal to the connection
/// on which it occurs and is never retried.
#[derive(Error, Debug, Clone)]
pub enum TicketboxError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Connection closed by peer")]
    PeerClosed,

    #[error("Envelope exceeds the {limit}-byte limit")]
    Oversized { limit: usize },

    #[error("Malformed envelope: {0}")]
    Decode(String),

    #[error("Failed to encode envelope: {0}")]
    Encode(String),

    #[error("Unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Short write: {written} of {expected} bytes delivered")]
    ShortWrite { written: usize, expected: usize },

    #[error("Connection limit of {0} clients reached")]
    TooManyClients(usize),

    #[error("Worker pool '{0}' is closed")]
    PoolClosed(&'static str),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for TicketboxError {
    fn from(e: std::io::Error) -> Self {
        TicketboxError::Io(Arc::new(e))
    }
}

impl From<bincode::error::DecodeError> for TicketboxError {
    fn from(e: bincode::error::DecodeError) -> Self {
        match e {
            // A length inside the envelope points past the size limit.
            bincode::error::DecodeError::LimitExceeded => TicketboxError::Oversized {
                limit: crate::core::protocol::MAX_ENVELOPE_SIZE,
            },
            e => TicketboxError::Decode(e.to_string()),
        }
    }
}

impl From<bincode::error::EncodeError> for TicketboxError {
    fn from(e: bincode::error::EncodeError) -> Self {
        TicketboxError::Encode(e.to_string())
    }
}

impl TicketboxError {
    /// True for the ways a client usually goes away. These are logged at
    /// info level instead of warn.
    pub fn is_normal_disconnect(&self) -> bool {
        match self {
            TicketboxError::PeerClosed => true,
            TicketboxError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }

    /// True for errors caused by bytes the peer sent us.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            TicketboxError::Oversized { .. }
                | TicketboxError::Decode(_)
                | TicketboxError::UnexpectedMessage { .. }
        )
    }

    /// A short, stable label used for the disconnect metric.
    pub fn reason(&self) -> &'static str {
        match self {
            TicketboxError::Io(_) => "io",
            TicketboxError::PeerClosed => "peer_closed",
            TicketboxError::Oversized { .. } => "oversized",
            TicketboxError::Decode(_) => "decode",
            TicketboxError::Encode(_) => "encode",
            TicketboxError::UnexpectedMessage { .. } => "unexpected_message",
            TicketboxError::ShortWrite { .. } => "short_write",
            TicketboxError::TooManyClients(_) => "max_clients",
            TicketboxError::PoolClosed(_) => "shutdown",
            TicketboxError::Internal(_) => "internal",
        }
    }
}

/// A business-level failure reported by a `CommandExecutor`. These never
/// close the connection; they become a status-coded response instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    Server(String),
}

impl CommandError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CommandError::Validation(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        CommandError::Auth(msg.into())
    }

    pub fn server(msg: impl Into<String>) -> Self {
        CommandError::Server(msg.into())
    }

    /// The response status this failure is reported with.
    pub fn status(&self) -> Status {
        match self {
            CommandError::Validation(_) => Status::ValidationError,
            CommandError::Auth(_) => Status::AuthError,
            CommandError::Server(_) => Status::ServerError,
        }
    }
}
