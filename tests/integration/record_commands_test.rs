// tests/integration/record_commands_test.rs

//! The record store driven over the wire, including edit locks shared
//! between connections.

use super::test_helpers::{TestServer, add_record};
use ticketbox::core::protocol::{Request, Status, Value};

#[tokio::test]
async fn test_show_update_remove_roundtrip() {
    let (server, _tracker) = TestServer::start().await;
    let mut client = server.connect().await;

    let id = client.call(add_record("alice", "Matinee")).await.payload;
    assert_eq!(id, Value::Int(1));

    let update = Request::new("update")
        .args(["1", "Evening show", "", "12", "40", "theatre_performance"])
        .with_token("alice");
    assert_eq!(client.call(update).await.status, Status::Ok);

    let shown = client.call(Request::new("show")).await;
    let records = shown.payload.as_list().expect("show returns a list");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].field("name"), Some(&Value::text("Evening show")));
    assert_eq!(records[0].field("date"), Some(&Value::Null));
    assert_eq!(
        records[0].field("event_type"),
        Some(&Value::text("THEATRE_PERFORMANCE"))
    );

    let removed = client
        .call(Request::new("remove-by-id").arg("1").with_token("alice"))
        .await;
    assert_eq!(removed.status, Status::Ok);
    let shown = client.call(Request::new("show")).await;
    assert_eq!(shown.payload, Value::List(vec![]));

    server.shutdown().await;
}

#[tokio::test]
async fn test_other_owner_cannot_modify_record() {
    let (server, _tracker) = TestServer::start().await;
    let mut alice = server.connect().await;
    let mut bob = server.connect().await;

    alice.call(add_record("alice", "Private party")).await;
    let response = bob
        .call(Request::new("remove-by-id").arg("1").with_token("bob"))
        .await;
    assert_eq!(response.status, Status::AuthError);

    server.shutdown().await;
}

#[tokio::test]
async fn test_lock_blocks_other_connections_until_holder_disconnects() {
    let (server, tracker) = TestServer::start().await;
    let mut holder = server.connect().await;
    let mut other = server.connect().await;

    holder.call(add_record("alice", "Derby")).await;
    let locked = holder
        .call(Request::new("lock").arg("1").with_token("alice"))
        .await;
    assert_eq!(locked.status, Status::Ok);

    // Same owner, different connection: still locked out.
    let update = Request::new("update")
        .args(["1", "Derby", "2025-03-03", "0", "500", "FOOTBALL"])
        .with_token("alice");
    let response = other.call(update.clone()).await;
    assert_eq!(response.status, Status::ValidationError);

    drop(holder);
    super::test_helpers::wait_for(|| tracker.store.locks().is_empty()).await;

    let response = other.call(update).await;
    assert_eq!(response.status, Status::Ok);

    server.shutdown().await;
}
