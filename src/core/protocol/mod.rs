// src/core/protocol/mod.rs

pub mod codec;
pub mod envelope;
pub use codec::{MAX_ENVELOPE_SIZE, decode, decode_request, encode, try_decode};
pub use envelope::{
    CommandCatalog, CommandSpec, MAX_VALUE_DEPTH, Message, Request, Response, Status, Value,
};
