// src/server/multiplexer.rs

//! The single readiness loop shared by every connection.
//!
//! Armed connections live inside readiness futures collected in a
//! `FuturesUnordered`. When one resolves the loop clears the connection's
//! interest and moves it into the receive or send pool. Stages return
//! connections through the hand-back channel and the loop re-arms them.
//! The loop itself never reads, writes, decodes or runs commands, and it
//! never waits on a pool: a ready connection that finds its pool saturated
//! is queued until a worker frees up.

use super::acceptor::Acceptor;
use super::pipeline::{Handback, Pipeline, disconnect, receive, send};
use crate::connection::{Connection, Interest};
use crate::core::errors::TicketboxError;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, broadcast, mpsc};
use tracing::{debug, error, info};

/// Upper bound on events handled in one iteration, so a burst cannot keep
/// the loop from checking for shutdown.
const MAX_EVENTS_PER_POLL: usize = 1024;

/// A connection whose awaited readiness has fired (or failed).
struct Readiness {
    conn: Connection,
    interest: Interest,
    result: io::Result<()>,
}

enum Event {
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Ready(Readiness),
    HandedBack(Handback),
    /// A worker freed up in the pool serving `Interest` while connections
    /// were queued for it.
    Slot(Interest, Result<OwnedSemaphorePermit, TicketboxError>),
}

pub(crate) struct Multiplexer {
    listener: TcpListener,
    acceptor: Acceptor,
    pipeline: Arc<Pipeline>,
    armed: FuturesUnordered<BoxFuture<'static, Readiness>>,
    handback_rx: mpsc::UnboundedReceiver<Handback>,
    poll_interval: Duration,
    pending_receive: VecDeque<Connection>,
    pending_send: VecDeque<Connection>,
}

impl Multiplexer {
    pub(crate) fn new(
        listener: TcpListener,
        acceptor: Acceptor,
        pipeline: Arc<Pipeline>,
        handback_rx: mpsc::UnboundedReceiver<Handback>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            listener,
            acceptor,
            pipeline,
            armed: FuturesUnordered::new(),
            handback_rx,
            poll_interval,
            pending_receive: VecDeque::new(),
            pending_send: VecDeque::new(),
        }
    }

    /// Runs until a shutdown signal arrives, then closes the listener,
    /// drains the pools and drops every remaining connection.
    pub(crate) async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Multiplexer loop started.");
        loop {
            match shutdown_rx.try_recv() {
                Err(broadcast::error::TryRecvError::Empty) => {}
                _ => {
                    info!("Multiplexer received shutdown signal.");
                    break;
                }
            }
            self.poll_once().await;
        }
        self.shutdown().await;
    }

    /// Waits up to `poll_interval` for an event, then handles it and every
    /// other event that is already ready. Returns how many were handled.
    pub(crate) async fn poll_once(&mut self) -> usize {
        let first = match tokio::time::timeout(self.poll_interval, self.next_event()).await {
            Ok(event) => event,
            Err(_) => return 0,
        };
        self.handle(first);

        let mut handled = 1;
        while handled < MAX_EVENTS_PER_POLL {
            match self.next_event().now_or_never() {
                Some(event) => {
                    self.handle(event);
                    handled += 1;
                }
                None => break,
            }
        }
        handled
    }

    async fn next_event(&mut self) -> Event {
        let has_armed = !self.armed.is_empty();
        let receive_waiting = !self.pending_receive.is_empty();
        let send_waiting = !self.pending_send.is_empty();
        tokio::select! {
            res = self.listener.accept() => Event::Accepted(res),
            Some(ready) = self.armed.next(), if has_armed => Event::Ready(ready),
            // The pipeline holds a sender for as long as the loop runs.
            Some(handback) = self.handback_rx.recv() => Event::HandedBack(handback),
            permit = self.pipeline.receive.reserve(), if receive_waiting => {
                Event::Slot(Interest::Readable, permit)
            }
            permit = self.pipeline.send.reserve(), if send_waiting => {
                Event::Slot(Interest::Writable, permit)
            }
        }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Accepted(Ok((stream, addr))) => match self.acceptor.accept(stream, addr) {
                // The catalog is attached; deliver it before reading anything.
                Ok(conn) => self.arm(conn, Interest::Writable),
                Err(e) => debug!("Connection from {} not established: {}", addr, e),
            },
            Event::Accepted(Err(e)) => error!("Failed to accept connection: {}", e),
            Event::Ready(Readiness {
                mut conn,
                interest,
                result,
            }) => {
                if let Err(e) = result {
                    return disconnect(conn, e.into());
                }
                conn.set_interest(Interest::None);
                self.schedule(conn, interest);
            }
            Event::HandedBack(Handback { conn, interest }) => self.arm(conn, interest),
            Event::Slot(interest, permit) => {
                let queue = match interest {
                    Interest::Readable => &mut self.pending_receive,
                    _ => &mut self.pending_send,
                };
                let Some(conn) = queue.pop_front() else {
                    // Only this loop drains the queues, and the branch is
                    // disabled while they are empty.
                    return;
                };
                match permit {
                    Ok(permit) => self.start(conn, interest, permit),
                    Err(e) => disconnect(conn, e),
                }
            }
        }
    }

    /// Moves a ready connection into the pool serving `interest`, or queues
    /// it behind earlier connections when no worker is free.
    fn schedule(&mut self, conn: Connection, interest: Interest) {
        let (pool, queue) = match interest {
            Interest::Readable => (&self.pipeline.receive, &mut self.pending_receive),
            Interest::Writable => (&self.pipeline.send, &mut self.pending_send),
            Interest::None => {
                let msg = "readiness fired for an unarmed connection".to_string();
                return disconnect(conn, TicketboxError::Internal(msg));
            }
        };
        if !queue.is_empty() {
            queue.push_back(conn);
            return;
        }
        match pool.try_reserve() {
            Ok(Some(permit)) => self.start(conn, interest, permit),
            Ok(None) => {
                debug!(
                    "Pool '{}' saturated; queueing connection {}.",
                    pool.name(),
                    conn.id()
                );
                queue.push_back(conn);
            }
            Err(e) => disconnect(conn, e),
        }
    }

    fn start(&self, conn: Connection, interest: Interest, permit: OwnedSemaphorePermit) {
        let pipeline = self.pipeline.clone();
        match interest {
            Interest::Readable => self
                .pipeline
                .receive
                .spawn_with(permit, receive::run(pipeline, conn)),
            _ => self
                .pipeline
                .send
                .spawn_with(permit, send::run(pipeline, conn)),
        }
    }

    /// Sets the connection's interest and starts waiting for it.
    fn arm(&mut self, mut conn: Connection, interest: Interest) {
        if interest == Interest::None {
            let msg = "cannot arm a connection without interest".to_string();
            return disconnect(conn, TicketboxError::Internal(msg));
        }
        conn.set_interest(interest);
        self.armed.push(
            async move {
                let result = match interest {
                    Interest::Writable => conn.stream().writable().await,
                    _ => {
                        if let Some(hold) = conn.take_hold() {
                            // The previous command is still running on a
                            // blocking thread; the next read waits for it.
                            let _ = hold.await;
                        }
                        conn.stream().readable().await
                    }
                };
                Readiness {
                    conn,
                    interest,
                    result,
                }
            }
            .boxed(),
        );
    }

    async fn shutdown(mut self) {
        drop(self.listener);
        info!("Listener closed. Draining worker pools...");
        self.pipeline.shutdown().await;

        let mut closed = self.armed.len() + self.pending_receive.len() + self.pending_send.len();
        self.armed.clear();
        self.pending_receive.clear();
        self.pending_send.clear();
        while let Ok(handback) = self.handback_rx.try_recv() {
            drop(handback);
            closed += 1;
        }
        info!("Multiplexer stopped; closed {} idle connections.", closed);
    }
}
