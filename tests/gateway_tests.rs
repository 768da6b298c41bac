//! End-to-end scenarios over the full surface: initialize, realtime
//! delivery, offline vault drains, blocking, presence filtering.

mod common;

use std::time::Duration;

use common::{assert_no_event_of, next_event_of, spawn_app, wallet};
use serde_json::json;

#[tokio::test]
async fn message_reaches_recipient_websocket_and_history() {
    let app = spawn_app().await;
    let alice = wallet(0xa1);
    let bob = wallet(0xb2);

    assert!(app.initialize(&alice, "alice").await.status().is_success());
    assert!(app.initialize(&bob, "bob").await.status().is_success());

    let _alice_ws = app.ws_connect(&alice).await;
    let mut bob_ws = app.ws_connect(&bob).await;

    // Send by username; the gateway resolves it through the index.
    let response = app
        .post("/api/send", &alice, json!({ "recipient_address": "bob", "content": "hello" }))
        .await;
    assert!(response.status().is_success());

    let event = next_event_of(&mut bob_ws, "message").await;
    assert_eq!(event["payload"]["content"], "hello");
    assert_eq!(event["payload"]["from"], alice.as_str());

    let history: serde_json::Value = app
        .get(&format!("/api/messages/{alice}"), &bob)
        .await
        .json()
        .await
        .unwrap();
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "hello");
    assert_eq!(messages[0]["unread"], true);
    assert_eq!(messages[0]["sender"]["username"], "alice");

    // The sender's copy is a local-origin message.
    let history: serde_json::Value = app
        .get(&format!("/api/messages/{bob}"), &alice)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(history["messages"][0]["sender"], "You");
}

#[tokio::test]
async fn offline_message_delivered_once_on_reconnect() {
    let app = spawn_app().await;
    let alice = wallet(0xa1);
    let bob = wallet(0xb2);

    app.initialize(&alice, "alice").await;
    app.initialize(&bob, "bob").await;
    let _alice_ws = app.ws_connect(&alice).await;

    // Bob has no realtime link; the message lands in the vault.
    let response = app
        .post("/api/send", &alice, json!({ "recipient_address": &bob, "content": "hi" }))
        .await;
    assert!(response.status().is_success());
    assert_eq!(app.gateway.vault.pending_count(&bob).await, 1);

    let mut bob_ws = app.ws_connect(&bob).await;
    let event = next_event_of(&mut bob_ws, "message").await;
    assert_eq!(event["payload"]["content"], "hi");
    assert_eq!(app.gateway.vault.pending_count(&bob).await, 0);

    // A later reconnect must not redeliver.
    drop(bob_ws);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut bob_ws = app.ws_connect(&bob).await;
    assert_no_event_of(&mut bob_ws, "message", Duration::from_millis(400)).await;
}

#[tokio::test]
async fn blocked_sender_is_silenced() {
    let app = spawn_app().await;
    let alice = wallet(0xa1);
    let bob = wallet(0xb2);

    app.initialize(&alice, "alice").await;
    app.initialize(&bob, "bob").await;

    let _alice_ws = app.ws_connect(&alice).await;
    let mut bob_ws = app.ws_connect(&bob).await;

    app.post("/api/block-contact", &bob, json!({ "contact_address": &alice }))
        .await;

    let response = app
        .post("/api/send", &alice, json!({ "recipient_address": &bob, "content": "ping" }))
        .await;
    assert!(response.status().is_success());

    // Alice sees her copy at "sent"; Bob sees nothing anywhere.
    let history: serde_json::Value = app
        .get(&format!("/api/messages/{bob}"), &alice)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(history["messages"][0]["status"], "sent");

    assert_no_event_of(&mut bob_ws, "message", Duration::from_millis(400)).await;
    let history: serde_json::Value = app
        .get(&format!("/api/messages/{alice}"), &bob)
        .await
        .json()
        .await
        .unwrap();
    assert!(history["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn channel_events_reach_members_only() {
    let app = spawn_app().await;
    let alice = wallet(0xa1);
    let bob = wallet(0xb2);
    let charlie = wallet(0xc3);

    app.initialize(&alice, "alice").await;
    app.initialize(&bob, "bob").await;
    app.initialize(&charlie, "charlie").await;

    let created: serde_json::Value = app
        .post(
            "/api/channels",
            &alice,
            json!({ "name": "news", "type": "public" }),
        )
        .await
        .json()
        .await
        .unwrap();
    let channel_id = created["channel"]["id"].as_str().unwrap().to_string();

    let response = app
        .post(&format!("/api/channels/{channel_id}/subscribe"), &bob, json!({}))
        .await;
    assert!(response.status().is_success());

    let mut bob_ws = app.ws_connect(&bob).await;
    let mut charlie_ws = app.ws_connect(&charlie).await;

    let response = app
        .post(
            &format!("/api/channels/{channel_id}/messages"),
            &alice,
            json!({ "content": "v1" }),
        )
        .await;
    assert!(response.status().is_success());

    let event = next_event_of(&mut bob_ws, "channel_message").await;
    assert_eq!(event["payload"]["content"], "v1");
    assert_no_event_of(&mut charlie_ws, "channel_message", Duration::from_millis(400)).await;
}

#[tokio::test]
async fn exhausted_invite_rejects_join() {
    let app = spawn_app().await;
    let alice = wallet(0xa1);
    let bob = wallet(0xb2);
    let carol = wallet(0xc3);

    app.initialize(&alice, "alice").await;
    app.initialize(&bob, "bob").await;
    app.initialize(&carol, "carol").await;

    let created: serde_json::Value = app
        .post(
            "/api/channels",
            &alice,
            json!({ "name": "inner-circle", "type": "private" }),
        )
        .await
        .json()
        .await
        .unwrap();
    let channel_id = created["channel"]["id"].as_str().unwrap().to_string();

    let invite: serde_json::Value = app
        .post(
            &format!("/api/channels/{channel_id}/invites"),
            &alice,
            json!({ "max_uses": 1 }),
        )
        .await
        .json()
        .await
        .unwrap();
    let code = invite["invite"]["invite_code"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 32); // 128 bits, hex

    let response = app
        .post(
            &format!("/api/channels/{channel_id}/subscribe"),
            &bob,
            json!({ "invite_code": &code }),
        )
        .await;
    assert!(response.status().is_success());

    let response = app
        .post(
            &format!("/api/channels/{channel_id}/subscribe"),
            &carol,
            json!({ "invite_code": &code }),
        )
        .await;
    assert_eq!(response.status(), 403);

    // No invite code at all is a bad request.
    let response = app
        .post(&format!("/api/channels/{channel_id}/subscribe"), &carol, json!({}))
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn profile_updates_respect_blocks() {
    let app = spawn_app().await;
    let alice = wallet(0xa1);
    let bob = wallet(0xb2);
    let carol = wallet(0xc3);

    app.initialize(&alice, "alice").await;
    app.initialize(&bob, "bob").await;
    app.initialize(&carol, "carol").await;

    app.post("/api/block-contact", &carol, json!({ "contact_address": &alice }))
        .await;

    let mut bob_ws = app.ws_connect(&bob).await;
    let mut carol_ws = app.ws_connect(&carol).await;

    let response = app
        .post(
            "/api/update-profile",
            &alice,
            json!({ "first_name": "Alice", "bio": "new bio" }),
        )
        .await;
    assert!(response.status().is_success());

    let event = next_event_of(&mut bob_ws, "profile_update").await;
    assert_eq!(event["payload"]["bio"], "new bio");
    assert_no_event_of(&mut carol_ws, "profile_update", Duration::from_millis(400)).await;
}

#[tokio::test]
async fn username_conflicts_are_rejected_case_insensitively() {
    let app = spawn_app().await;
    let alice = wallet(0xa1);
    let impostor = wallet(0xd4);

    app.initialize(&alice, "alice").await;

    let response = app.initialize(&impostor, "ALICE").await;
    assert_eq!(response.status(), 409);

    let check: serde_json::Value = app
        .post("/api/check-username", &impostor, json!({ "username": "Alice" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(check["available"], false);

    // The holder keeps their own name.
    let check: serde_json::Value = app
        .post("/api/check-username", &alice, json!({ "username": "alice" }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(check["available"], true);
}

#[tokio::test]
async fn address_variants_resolve_to_one_session() {
    let app = spawn_app().await;
    let canonical = wallet(0xa1);
    let prefixed_mixed = format!("0x{}", canonical.to_uppercase());

    let response = app.initialize(&prefixed_mixed, "alice").await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["address"], canonical.as_str());

    // A second initialize through another variant reports the live session.
    let response = app.initialize(&canonical, "").await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Session active");

    // Header lookups accept the prefixed form too.
    let profile = app.get("/api/get-profile", &prefixed_mixed).await;
    assert!(profile.status().is_success());
}

#[tokio::test]
async fn initialize_without_username_requires_registration() {
    let app = spawn_app().await;
    let response = app.initialize(&wallet(0xe5), "").await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn requests_without_session_are_unauthorized() {
    let app = spawn_app().await;
    let response = app.get("/api/chats", &wallet(0xe5)).await;
    assert_eq!(response.status(), 401);
}
