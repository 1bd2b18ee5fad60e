// src/core/protocol/codec.rs

//! Encodes and decodes `Message`s for the wire.
//!
//! One message is one read or one write: there is no length prefix. The
//! decoder consumes the first complete message in a buffer and reports how
//! many bytes it used.

use super::envelope::{Message, Request};
use crate::core::errors::TicketboxError;
use bincode::config::{self, Configuration, LittleEndian, Limit, Varint};
use bincode::error::DecodeError;

/// Upper bound for one envelope in either direction (1 MiB).
pub const MAX_ENVELOPE_SIZE: usize = 1 << 20;

type WireConfig = Configuration<LittleEndian, Varint, Limit<MAX_ENVELOPE_SIZE>>;

fn wire_config() -> WireConfig {
    // The limit caps allocations driven by length prefixes inside the payload.
    config::standard().with_limit::<MAX_ENVELOPE_SIZE>()
}

/// Serializes a message, refusing anything larger than `MAX_ENVELOPE_SIZE`.
pub fn encode(message: &Message) -> Result<Vec<u8>, TicketboxError> {
    let bytes = bincode::encode_to_vec(message, wire_config())?;
    if bytes.len() > MAX_ENVELOPE_SIZE {
        return Err(TicketboxError::Oversized {
            limit: MAX_ENVELOPE_SIZE,
        });
    }
    Ok(bytes)
}

/// Decodes the first message in `buf`. Truncated input is an error here;
/// use `try_decode` when more bytes may still arrive.
pub fn decode(buf: &[u8]) -> Result<(Message, usize), TicketboxError> {
    if buf.len() > MAX_ENVELOPE_SIZE {
        return Err(TicketboxError::Oversized {
            limit: MAX_ENVELOPE_SIZE,
        });
    }
    Ok(bincode::decode_from_slice(buf, wire_config())?)
}

/// Like `decode`, but returns `Ok(None)` when `buf` holds only a prefix of
/// a message.
pub fn try_decode(buf: &[u8]) -> Result<Option<(Message, usize)>, TicketboxError> {
    if buf.is_empty() {
        return Ok(None);
    }
    match bincode::decode_from_slice(buf, wire_config()) {
        Ok(decoded) => Ok(Some(decoded)),
        Err(DecodeError::UnexpectedEnd { .. }) if buf.len() <= MAX_ENVELOPE_SIZE => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Decodes a buffer that must start with a `Message::Request`. Returns the
/// request and the number of bytes it occupied.
///
/// Only the variant index is read before the kind is checked, so the body of
/// any other message is never decoded.
pub fn decode_request(buf: &[u8]) -> Result<(Request, usize), TicketboxError> {
    if buf.len() > MAX_ENVELOPE_SIZE {
        return Err(TicketboxError::Oversized {
            limit: MAX_ENVELOPE_SIZE,
        });
    }
    let (variant, tag_len): (u32, usize) = bincode::decode_from_slice(buf, wire_config())?;
    match Message::kind_of(variant) {
        Some("request") => {}
        Some(actual) => {
            return Err(TicketboxError::UnexpectedMessage {
                expected: "request",
                actual,
            });
        }
        None => {
            return Err(TicketboxError::Decode(format!(
                "unknown message variant {variant}"
            )));
        }
    }
    let (request, used): (Request, usize) =
        bincode::decode_from_slice(&buf[tag_len..], wire_config())?;
    Ok((request, tag_len + used))
}
