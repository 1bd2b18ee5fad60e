// src/server/pipeline/send.rs

//! Send stage: one write of one encoded envelope.

use super::{Pipeline, disconnect};
use crate::connection::{Attachment, Connection, Interest, Outgoing};
use crate::core::errors::{CommandError, TicketboxError};
use crate::core::protocol::Response;
use std::io;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) async fn run(pipeline: Arc<Pipeline>, mut conn: Connection) {
    let outgoing = match conn.take_attachment() {
        Attachment::Response(response) => match encode_or_fallback(&conn, response) {
            Ok(outgoing) => outgoing,
            Err(e) => return disconnect(conn, e),
        },
        Attachment::Encoded(outgoing) => outgoing,
        other => {
            let msg = format!("send stage received {} instead of a response", other.kind());
            return disconnect(conn, TicketboxError::Internal(msg));
        }
    };

    let expected = outgoing.bytes.len();
    match conn.stream().try_write(&outgoing.bytes) {
        Ok(written) if written == expected => {
            info!(
                "{} sent to {} ({})",
                outgoing.delivery,
                conn.addr(),
                conn.id()
            );
            pipeline.hand_back(conn, Interest::Readable);
        }
        // A partial write leaves the client with an undecodable envelope.
        Ok(written) => disconnect(conn, TicketboxError::ShortWrite { written, expected }),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            debug!("Spurious write readiness on {}", conn.id());
            conn.attach(Attachment::Encoded(outgoing));
            pipeline.hand_back(conn, Interest::Writable);
        }
        Err(e) => disconnect(conn, e.into()),
    }
}

/// Encodes a response. A result too large for one envelope is the server's
/// failure, not the client's, so it is replaced by a `SERVER_ERROR` response
/// and the connection stays open.
fn encode_or_fallback(conn: &Connection, response: Response) -> Result<Outgoing, TicketboxError> {
    match Outgoing::response(response) {
        Err(TicketboxError::Oversized { limit }) => {
            warn!(
                "Response for {} ({}) exceeds the {}-byte envelope limit; sending an error instead.",
                conn.addr(),
                conn.id(),
                limit
            );
            let fallback = CommandError::server(format!(
                "Result exceeds the {limit}-byte envelope limit"
            ));
            Outgoing::response(fallback.into())
        }
        other => other,
    }
}
