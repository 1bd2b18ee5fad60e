// tests/integration/failure_test.rs

//! Protocol violations close only the offending connection; business
//! failures keep the connection open.

use super::test_helpers::{TestClient, TestServer, expect_stream_closed, test_config};
use ticketbox::core::metrics::DISCONNECTS_TOTAL;
use ticketbox::core::protocol::{
    MAX_ENVELOPE_SIZE, Message, Request, Response, Status, Value, encode,
};

fn disconnects(reason: &str) -> f64 {
    DISCONNECTS_TOTAL.with_label_values(&[reason]).get()
}

#[tokio::test]
async fn test_oversized_envelope_closes_only_that_connection() {
    let (server, _tracker) = TestServer::start().await;
    let mut bystander = server.connect().await;
    let mut offender = server.connect().await;
    let before = disconnects("oversized");

    // A well-formed `echo` request whose single argument claims more bytes
    // than an envelope may hold.
    let mut envelope = vec![0u8, 4];
    envelope.extend_from_slice(b"echo");
    envelope.push(1);
    envelope.push(0xFC);
    envelope.extend_from_slice(&((MAX_ENVELOPE_SIZE + 4096) as u32).to_le_bytes());
    envelope.extend_from_slice(&vec![b'x'; 64 * 1024]);
    offender.send_raw_lossy(&envelope).await;
    offender.expect_closed().await;

    assert!(disconnects("oversized") > before);
    let response = bystander.call(Request::new("echo").arg("still here")).await;
    assert_eq!(response.status, Status::Ok);

    server.shutdown().await;
}

#[tokio::test]
async fn test_deeply_nested_message_closes_the_connection() {
    let (server, tracker) = TestServer::start().await;
    let mut bystander = server.connect().await;
    let mut offender = server.connect().await;

    // A `Response` wrapping tens of thousands of single-element lists.
    let mut envelope = vec![1u8, 0];
    for _ in 0..30_000 {
        envelope.extend_from_slice(&[4, 1]);
    }
    envelope.push(0);
    offender.send_raw_lossy(&envelope).await;
    offender.expect_closed().await;

    let response = bystander.call(Request::new("echo").arg("still here")).await;
    assert_eq!(response.status, Status::Ok);
    assert_eq!(tracker.total_disconnects(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_result_too_large_for_an_envelope_is_server_error() {
    let (server, tracker) = TestServer::start().await;
    let mut client = server.connect().await;

    let len = (MAX_ENVELOPE_SIZE + 1).to_string();
    let response = client.call(Request::new("blob").arg(len)).await;
    assert_eq!(response.status, Status::ServerError);
    assert!(
        response
            .payload
            .as_text()
            .unwrap()
            .contains("envelope limit")
    );

    let response = client.call(Request::new("blob").arg("16")).await;
    assert_eq!(response.status, Status::Ok);
    assert_eq!(tracker.total_disconnects(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_garbage_bytes_close_the_connection() {
    let (server, _tracker) = TestServer::start().await;
    let mut bystander = server.connect().await;
    let mut offender = server.connect().await;

    // Variant index 7 does not exist.
    offender.send_raw(b"\x07not an envelope").await;
    offender.expect_closed().await;

    let response = bystander.call(Request::new("help")).await;
    assert_eq!(response.status, Status::Ok);

    server.shutdown().await;
}

#[tokio::test]
async fn test_non_request_message_closes_the_connection() {
    let (server, _tracker) = TestServer::start().await;
    let mut client = server.connect().await;

    let bytes = encode(&Message::Response(Response::ok(Value::Null))).unwrap();
    client.send_raw(&bytes).await;
    client.expect_closed().await;

    server.wait_until_idle().await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_command_is_validation_error() {
    let (server, tracker) = TestServer::start().await;
    let mut client = server.connect().await;

    let response = client.call(Request::new("fly-to-the-moon")).await;
    assert_eq!(response.status, Status::ValidationError);
    assert!(
        response
            .payload
            .as_text()
            .unwrap()
            .contains("Unknown command")
    );
    assert_eq!(tracker.overlaps(), 0);

    let response = client.call(Request::new("info")).await;
    assert_eq!(response.status, Status::Ok);

    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_token_is_auth_error() {
    let (server, _tracker) = TestServer::start().await;
    let mut client = server.connect().await;

    let request =
        Request::new("add-record").args(["Gala", "2025-01-01", "0", "10", "OPERA"]);
    let response = client.call(request).await;
    assert_eq!(response.status, Status::AuthError);

    let response = client.call(request_with_blank_token()).await;
    assert_eq!(response.status, Status::AuthError);

    server.shutdown().await;
}

fn request_with_blank_token() -> Request {
    Request::new("clear").with_token("   ")
}

#[tokio::test]
async fn test_executor_panic_becomes_server_error() {
    let (server, _tracker) = TestServer::start().await;
    let mut client = server.connect().await;

    let response = client.call(Request::new("panic")).await;
    assert_eq!(response.status, Status::ServerError);

    let response = client.call(Request::new("echo").arg("after panic")).await;
    assert_eq!(response.status, Status::Ok);

    server.shutdown().await;
}

#[tokio::test]
async fn test_dispatch_deadline_turns_slow_command_into_server_error() {
    let mut config = test_config();
    config.pipeline.dispatch_timeout_ms = 50;
    let (server, tracker) = TestServer::start_with_config(config).await;
    let mut client = server.connect().await;

    let response = client.call(Request::new("sleep").arg("400")).await;
    assert_eq!(response.status, Status::ServerError);
    assert!(response.payload.as_text().unwrap().contains("timed out"));

    // Sent while the timed-out call is still sleeping; it must not start
    // until that call returns.
    let response = client.call(Request::new("sleep").arg("1")).await;
    assert_eq!(response.status, Status::Ok);
    assert_eq!(tracker.overlaps(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_max_clients_refuses_extra_connections() {
    let mut config = test_config();
    config.max_clients = 1;
    let (server, _tracker) = TestServer::start_with_config(config).await;

    let mut first = server.connect().await;
    let mut refused = TestClient::connect_raw(server.addr).await;
    expect_stream_closed(&mut refused).await;

    let response = first.call(Request::new("echo").arg("ok")).await;
    assert_eq!(response.status, Status::Ok);
    assert_eq!(server.registry.len(), 1);

    server.shutdown().await;
}
