// src/server/pipeline/dispatch.rs

//! Dispatch stage: runs the command executor and attaches its response.

use super::{Pipeline, disconnect};
use crate::connection::{Attachment, Connection, Interest};
use crate::core::errors::{CommandError, TicketboxError};
use crate::core::executor::ExecutionContext;
use crate::core::metrics;
use crate::core::protocol::{Request, Response};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub(crate) async fn run(pipeline: Arc<Pipeline>, mut conn: Connection) {
    let request = match conn.take_attachment() {
        Attachment::Request(request) => request,
        other => {
            let msg = format!("dispatch stage received {} instead of a request", other.kind());
            return disconnect(conn, TicketboxError::Internal(msg));
        }
    };

    let ctx = ExecutionContext {
        connection_id: conn.id(),
        peer: conn.addr(),
    };
    let (response, straggler) = execute(&pipeline, ctx, request).await;
    let status: &str = response.status.as_ref();
    metrics::RESPONSES_TOTAL.with_label_values(&[status]).inc();

    conn.attach(Attachment::Response(response));
    let Some(straggler) = straggler else {
        return pipeline.hand_back(conn, Interest::Writable);
    };

    // The timed-out call keeps running on its blocking thread. The error
    // response goes out now, but the connection is not read again and this
    // worker stays busy until the call returns, so a connection never has
    // two executor calls in flight.
    let (release, hold) = oneshot::channel();
    conn.hold_until(hold);
    pipeline.hand_back(conn, Interest::Writable);
    let _ = straggler.await;
    debug!("Timed-out command finished; releasing its connection.");
    drop(release);
}

type Call = JoinHandle<Result<Response, CommandError>>;

/// Calls the executor and folds every business-level outcome into a
/// `Response`. Nothing that happens here closes the connection.
///
/// When the dispatch deadline passes, the still-running call is returned
/// alongside the error response.
async fn execute(
    pipeline: &Pipeline,
    ctx: ExecutionContext,
    request: Request,
) -> (Response, Option<Call>) {
    if pipeline.catalog.get(&request.command).is_none() {
        debug!("Unknown command '{}' from {}", request.command, ctx.peer);
        let response =
            CommandError::validation(format!("Unknown command '{}'", request.command)).into();
        return (response, None);
    }

    let command = request.command.clone();
    let executor = pipeline.executor.clone();
    let timer = metrics::DISPATCH_LATENCY_SECONDS.start_timer();
    let mut call: Call = tokio::task::spawn_blocking(move || executor.execute(&ctx, &request));

    let joined = match pipeline.dispatch_timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut call).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    "Command '{}' from {} exceeded the {:?} dispatch deadline",
                    command, ctx.peer, limit
                );
                let response = CommandError::server(format!(
                    "Command '{command}' timed out after {} ms",
                    limit.as_millis()
                ))
                .into();
                return (response, Some(call));
            }
        },
        None => call.await,
    };
    timer.observe_duration();

    let response = match joined {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            debug!("Command '{}' from {} failed: {}", command, ctx.peer, e);
            e.into()
        }
        Err(join_err) => {
            error!(
                "Executor panicked while running '{}' for {}: {}",
                command, ctx.peer, join_err
            );
            CommandError::server(format!("Internal error while executing '{command}'")).into()
        }
    };
    (response, None)
}
