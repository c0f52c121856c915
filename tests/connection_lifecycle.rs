//! Integration tests for upgrade authorization and connection lifecycle.

mod common;

use common::{assert_rejected, TestClient, TestServer};
use serde_json::json;

#[tokio::test]
async fn upgrade_with_valid_token() {
    let server = TestServer::spawn().await.expect("spawn server");
    let alice = server.register_user("alice@example.com", "pw-alice");
    let token = server.access_token(&alice);

    let client = TestClient::connect_with_token(&server.ws_url(&alice), &token)
        .await
        .expect("authorized upgrade should succeed");

    assert!(server.state.registry.is_connected(&alice));
    drop(client);
}

#[tokio::test]
async fn upgrade_without_credential_rejected() {
    let server = TestServer::spawn().await.expect("spawn server");
    let alice = server.register_user("alice@example.com", "pw-alice");

    let result = TestClient::connect_bare(&server.ws_url(&alice)).await;
    assert_rejected(result, 401);
    assert!(!server.state.registry.is_connected(&alice));
}

#[tokio::test]
async fn upgrade_with_garbage_token_rejected() {
    let server = TestServer::spawn().await.expect("spawn server");
    let alice = server.register_user("alice@example.com", "pw-alice");

    let result = TestClient::connect_with_token(&server.ws_url(&alice), "not-a-token").await;
    assert_rejected(result, 401);
}

#[tokio::test]
async fn upgrade_with_foreign_identity_rejected() {
    let server = TestServer::spawn().await.expect("spawn server");
    let alice = server.register_user("alice@example.com", "pw-alice");
    let bob = server.register_user("bob@example.com", "pw-bob");
    let alice_token = server.access_token(&alice);

    // Alice's token must not open Bob's connection.
    let result = TestClient::connect_with_token(&server.ws_url(&bob), &alice_token).await;
    assert_rejected(result, 401);
}

#[tokio::test]
async fn upgrade_with_revoked_token_rejected() {
    let server = TestServer::spawn().await.expect("spawn server");
    let alice = server.register_user("alice@example.com", "pw-alice");
    let token = server.access_token(&alice);

    server.state.sessions.revoke(&token);
    let result = TestClient::connect_with_token(&server.ws_url(&alice), &token).await;
    assert_rejected(result, 401);
}

#[tokio::test]
async fn handoff_code_upgrades_exactly_once() {
    let server = TestServer::spawn().await.expect("spawn server");
    let alice = server.register_user("alice@example.com", "pw-alice");
    let code = server.state.handoff_codes.issue(&alice);

    let client = TestClient::connect_with_otp(&server.ws_url(&alice), &code.code)
        .await
        .expect("first use of the code should succeed");
    assert!(server.state.registry.is_connected(&alice));

    // The code was consumed by the first upgrade.
    let result = TestClient::connect_with_otp(&server.ws_url(&alice), &code.code).await;
    assert_rejected(result, 401);
    drop(client);
}

#[tokio::test]
async fn second_upgrade_evicts_first() {
    let server = TestServer::spawn().await.expect("spawn server");
    let alice = server.register_user("alice@example.com", "pw-alice");

    let mut first = TestClient::connect_with_token(&server.ws_url(&alice), &server.access_token(&alice))
        .await
        .expect("first connection");
    let second = TestClient::connect_with_token(&server.ws_url(&alice), &server.access_token(&alice))
        .await
        .expect("second connection");

    // Last connection wins: the first gets closed by the server.
    first.expect_close().await.expect("first connection closed");
    assert_eq!(server.state.registry.connected_count(), 1);
    assert!(server.state.registry.is_connected(&alice));
    drop(second);
}

#[tokio::test]
async fn directed_send_reaches_replacement_connection() {
    let server = TestServer::spawn().await.expect("spawn server");
    let alice = server.register_user("alice@example.com", "pw-alice");

    let mut first = TestClient::connect_with_token(&server.ws_url(&alice), &server.access_token(&alice))
        .await
        .expect("first connection");
    let mut second = TestClient::connect_with_token(&server.ws_url(&alice), &server.access_token(&alice))
        .await
        .expect("second connection");
    first.expect_close().await.expect("first evicted");

    let event = switchboard::events::Event {
        event_type: "new_message".to_string(),
        payload: json!({"message_data": "hi"}),
        group_id: None,
        conversation_id: None,
        user_id: "system".to_string(),
    };
    server.state.registry.send(&alice, event);

    let received = second.recv_json().await.expect("replacement receives");
    assert_eq!(received["type"], "new_message");
}

#[tokio::test]
async fn disconnect_closes_live_connection() {
    let server = TestServer::spawn().await.expect("spawn server");
    let alice = server.register_user("alice@example.com", "pw-alice");

    let mut client = TestClient::connect_with_token(&server.ws_url(&alice), &server.access_token(&alice))
        .await
        .expect("connect");

    server.state.registry.disconnect(&alice);
    client.expect_close().await.expect("server closed us");
    assert!(!server.state.registry.is_connected(&alice));
}

#[tokio::test]
async fn undecodable_frame_terminates_connection() {
    let server = TestServer::spawn().await.expect("spawn server");
    let alice = server.register_user("alice@example.com", "pw-alice");

    let mut client = TestClient::connect_with_token(&server.ws_url(&alice), &server.access_token(&alice))
        .await
        .expect("connect");

    client.send_raw("this is not json").await.expect("send");
    client.expect_close().await.expect("framing error closes");
}
