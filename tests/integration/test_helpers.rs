// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use ticketbox::config::Config;
use ticketbox::connection::{ConnectionId, Registry};
use ticketbox::core::errors::CommandError;
use ticketbox::core::executor::{CommandExecutor, DisconnectHook, ExecutionContext};
use ticketbox::core::protocol::{
    CommandCatalog, CommandSpec, Message, Request, Response, Value, encode, try_decode,
};
use ticketbox::server::Server;
use ticketbox::store::RecordStore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// How long a test waits for any single network step.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// A config listening on an ephemeral port with a short poll interval.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.port = 0;
    config.network.poll_interval_ms = 20;
    config.pipeline.dispatch_workers = 4;
    config.pipeline.send_workers = 4;
    config
}

fn init_tracing() {
    // Ignore the error if another test already installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// A running server on a random local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub registry: Arc<Registry>,
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Starts a server backed by a fresh `TrackingExecutor`.
    pub async fn start() -> (Self, Arc<TrackingExecutor>) {
        Self::start_with_config(test_config()).await
    }

    pub async fn start_with_config(config: Config) -> (Self, Arc<TrackingExecutor>) {
        let tracker = Arc::new(TrackingExecutor::new());
        let server = Self::with_executor(config, tracker.clone()).await;
        (server, tracker)
    }

    pub async fn with_executor(config: Config, executor: Arc<dyn CommandExecutor>) -> Self {
        init_tracing();
        let server = Server::bind(&config, executor)
            .await
            .expect("Failed to bind test server");
        let addr = server.local_addr().expect("Failed to read local address");
        let registry = server.registry();
        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = tokio::spawn(server.serve(shutdown_tx.subscribe()));
        Self {
            addr,
            registry,
            shutdown_tx,
            handle,
        }
    }

    pub async fn connect(&self) -> TestClient {
        TestClient::connect(self.addr).await
    }

    /// Signals shutdown and waits for the multiplexer to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        tokio::time::timeout(IO_TIMEOUT, self.handle)
            .await
            .expect("Server did not shut down in time")
            .expect("Server task panicked");
    }

    /// Polls until no connection is registered any more.
    pub async fn wait_until_idle(&self) {
        wait_for(|| self.registry.is_empty()).await;
    }
}

/// Polls `condition` every 10 ms until it holds, failing after `IO_TIMEOUT`.
pub async fn wait_for(condition: impl Fn() -> bool) {
    tokio::time::timeout(IO_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Condition not reached in time");
}

/// A minimal client speaking the envelope protocol.
pub struct TestClient {
    stream: TcpStream,
    buf: Vec<u8>,
    pub catalog: CommandCatalog,
}

impl TestClient {
    /// Connects and consumes the catalog the server pushes first.
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("Failed to connect");
        let mut client = Self {
            stream,
            buf: Vec::new(),
            catalog: CommandCatalog::default(),
        };
        match client.read_message().await {
            Message::Catalog(catalog) => client.catalog = catalog,
            other => panic!("Expected the command catalog first, got {other:?}"),
        }
        client
    }

    /// Connects without reading anything.
    pub async fn connect_raw(addr: SocketAddr) -> TcpStream {
        TcpStream::connect(addr).await.expect("Failed to connect")
    }

    pub async fn read_message(&mut self) -> Message {
        loop {
            if let Some((message, used)) = try_decode(&self.buf).expect("Server sent garbage") {
                self.buf.drain(..used);
                return message;
            }
            let n = tokio::time::timeout(IO_TIMEOUT, self.stream.read_buf(&mut self.buf))
                .await
                .expect("Timed out waiting for the server")
                .expect("Read failed");
            assert!(n > 0, "Server closed the connection unexpectedly");
        }
    }

    pub async fn send(&mut self, request: Request) {
        let bytes = encode(&Message::Request(request)).expect("Failed to encode request");
        self.send_raw(&bytes).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream
            .write_all(bytes)
            .await
            .expect("Failed to write to the server");
    }

    /// Writes `bytes`, ignoring failures caused by the server hanging up.
    pub async fn send_raw_lossy(&mut self, bytes: &[u8]) {
        let _ = tokio::time::timeout(IO_TIMEOUT, self.stream.write_all(bytes)).await;
    }

    /// Sends one request and waits for its response.
    pub async fn call(&mut self, request: Request) -> Response {
        self.send(request).await;
        match self.read_message().await {
            Message::Response(response) => response,
            other => panic!("Expected a response, got {other:?}"),
        }
    }

    /// Waits until the server closes the connection.
    pub async fn expect_closed(mut self) {
        expect_stream_closed(&mut self.stream).await;
    }
}

/// Reads until EOF or a reset, discarding anything received.
pub async fn expect_stream_closed(stream: &mut TcpStream) {
    let mut scratch = vec![0u8; 64 * 1024];
    tokio::time::timeout(IO_TIMEOUT, async {
        loop {
            match stream.read(&mut scratch).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    })
    .await
    .expect("Server did not close the connection");
}

/// Wraps a `RecordStore` with diagnostic commands and records how the engine
/// calls into the executor.
pub struct TrackingExecutor {
    pub store: RecordStore,
    in_flight: Mutex<HashSet<ConnectionId>>,
    overlaps: Mutex<usize>,
    disconnects: Mutex<HashMap<ConnectionId, usize>>,
}

impl TrackingExecutor {
    pub fn new() -> Self {
        Self {
            store: RecordStore::new(),
            in_flight: Mutex::new(HashSet::new()),
            overlaps: Mutex::new(0),
            disconnects: Mutex::new(HashMap::new()),
        }
    }

    /// Executor calls that started while another call for the same
    /// connection was still running.
    pub fn overlaps(&self) -> usize {
        *self.overlaps.lock()
    }

    pub fn disconnects_of(&self, id: ConnectionId) -> usize {
        self.disconnects.lock().get(&id).copied().unwrap_or(0)
    }

    pub fn total_disconnects(&self) -> usize {
        self.disconnects.lock().values().sum()
    }

    fn run(&self, ctx: &ExecutionContext, request: &Request) -> Result<Response, CommandError> {
        match request.command.as_str() {
            "echo" => Ok(Response::ok(Value::List(
                request.args.iter().map(Value::text).collect(),
            ))),
            "whoami" => Ok(Response::ok(Value::Int(ctx.connection_id.as_u64() as i64))),
            "sleep" => {
                let ms = request
                    .args
                    .first()
                    .and_then(|a| a.parse::<u64>().ok())
                    .ok_or_else(|| CommandError::validation("sleep expects milliseconds"))?;
                std::thread::sleep(Duration::from_millis(ms));
                Ok(Response::ok(Value::Int(ms as i64)))
            }
            "blob" => {
                let len = request
                    .args
                    .first()
                    .and_then(|a| a.parse::<usize>().ok())
                    .ok_or_else(|| CommandError::validation("blob expects a length"))?;
                Ok(Response::ok(Value::text("x".repeat(len))))
            }
            "panic" => panic!("tracking executor asked to panic"),
            _ => self.store.execute(ctx, request),
        }
    }
}

impl DisconnectHook for TrackingExecutor {
    fn on_disconnect(&self, connection_id: ConnectionId) {
        *self.disconnects.lock().entry(connection_id).or_insert(0) += 1;
        self.store.on_disconnect(connection_id);
    }
}

impl CommandExecutor for TrackingExecutor {
    fn catalog(&self) -> CommandCatalog {
        let mut catalog = self.store.catalog();
        catalog.commands.extend([
            CommandSpec::new("echo", &["args..."], "Return the arguments"),
            CommandSpec::new("whoami", &[], "Return the connection id"),
            CommandSpec::new("sleep", &["ms"], "Block the worker"),
            CommandSpec::new("blob", &["bytes"], "Return a text payload of that length"),
            CommandSpec::new("panic", &[], "Panic inside the executor"),
        ]);
        catalog
    }

    fn execute(
        &self,
        ctx: &ExecutionContext,
        request: &Request,
    ) -> Result<Response, CommandError> {
        if !self.in_flight.lock().insert(ctx.connection_id) {
            *self.overlaps.lock() += 1;
        }
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.run(ctx, request)
        }));
        self.in_flight.lock().remove(&ctx.connection_id);
        match result {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// A valid `add-record` request owned by `token`.
pub fn add_record(token: &str, name: &str) -> Request {
    Request::new("add-record")
        .args([name, "2025-06-01", "18", "100", "CONCERT"])
        .with_token(token)
}
