// src/server/pipeline/receive.rs

//! Receive stage: one read, one decoded request.

use super::{Pipeline, disconnect, dispatch};
use crate::connection::{Attachment, Connection, Interest};
use crate::core::errors::TicketboxError;
use crate::core::protocol::{MAX_ENVELOPE_SIZE, decode_request};
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) async fn run(pipeline: Arc<Pipeline>, mut conn: Connection) {
    // One byte over the limit lets us tell "exactly full" from "too big".
    let mut buf = Vec::with_capacity(MAX_ENVELOPE_SIZE + 1);
    let read = conn.stream().try_read_buf(&mut buf);

    let n = match read {
        Ok(0) => return disconnect(conn, TicketboxError::PeerClosed),
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            // Spurious readiness: nothing was consumed, wait again.
            debug!("Spurious read readiness on {}", conn.id());
            return pipeline.hand_back(conn, Interest::Readable);
        }
        Err(e) => return disconnect(conn, e.into()),
    };

    if n > MAX_ENVELOPE_SIZE {
        return disconnect(
            conn,
            TicketboxError::Oversized {
                limit: MAX_ENVELOPE_SIZE,
            },
        );
    }

    let (request, used) = match decode_request(&buf[..n]) {
        Ok(decoded) => decoded,
        Err(e) => return disconnect(conn, e),
    };
    if used < n {
        warn!(
            "Discarding {} trailing bytes after the request from {}",
            n - used,
            conn.addr()
        );
    }

    debug!(
        "Received request '{}' ({} args) from {} ({})",
        request.command,
        request.args.len(),
        conn.addr(),
        conn.id()
    );
    conn.attach(Attachment::Request(request));

    let next = pipeline.clone();
    if let Err(e) = pipeline.dispatch.submit(dispatch::run(next, conn)).await {
        // The task, and the connection inside it, were dropped by `submit`.
        debug!("Could not hand request to the dispatch pool: {}", e);
    }
}
