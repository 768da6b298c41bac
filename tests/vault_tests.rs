//! Offline vault properties: envelope round-trips, drain ordering and the
//! session-missing path.

mod common;

use common::{spawn_app, wallet};
use meshtalk_gateway::client::CryptoClient;
use meshtalk_gateway::dht::{DhtNetwork, DhtNode};
use meshtalk_gateway::relay::LocalRelay;
use meshtalk_gateway::vault::{decrypt_offline, encrypt_offline, OfflineEnvelope};
use meshtalk_gateway::address::Address;
use serde_json::json;

async fn standalone_client(byte: u8) -> std::sync::Arc<CryptoClient> {
    let network = DhtNetwork::new();
    let node = DhtNode::new(&hex::encode([byte; 20]), network);
    node.start().await.unwrap();
    CryptoClient::new(Address([byte; 20]), node, LocalRelay::new())
}

#[tokio::test]
async fn envelope_round_trips_exact_plaintext() {
    let alice = standalone_client(0xa1).await;
    let bob = standalone_client(0xb2).await;

    let envelope = encrypt_offline(
        &alice,
        &alice.address.to_hex(),
        &bob.key_bundle(),
        "the quick brown fox — привет 🌍",
        "msg_1700000000000",
        1_700_000_000_000,
    )
    .unwrap();

    // The gateway-visible form carries no plaintext.
    assert!(!envelope.ciphertext.contains("quick"));
    assert_ne!(envelope.used_onetime_prekey_id, 0);

    let plaintext = decrypt_offline(&bob, &envelope).unwrap();
    assert_eq!(plaintext, "the quick brown fox — привет 🌍");
}

#[tokio::test]
async fn envelope_is_bound_to_the_recipient() {
    let alice = standalone_client(0xa1).await;
    let bob = standalone_client(0xb2).await;
    let mallory = standalone_client(0xee).await;

    let envelope = encrypt_offline(
        &alice,
        &alice.address.to_hex(),
        &bob.key_bundle(),
        "for bob only",
        "msg_1",
        1,
    )
    .unwrap();

    // A different identity cannot reconstruct the shared secret.
    assert!(decrypt_offline(&mallory, &envelope).is_err());
}

#[tokio::test]
async fn envelope_json_uses_the_wire_field_names() {
    let alice = standalone_client(0xa1).await;
    let bob = standalone_client(0xb2).await;

    let envelope = encrypt_offline(
        &alice,
        &alice.address.to_hex(),
        &bob.key_bundle(),
        "x",
        "msg_9",
        9,
    )
    .unwrap();

    let value = serde_json::to_value(&envelope).unwrap();
    for field in [
        "sender_address",
        "sender_identity_key",
        "ephemeral_key",
        "used_signed_prekey_id",
        "used_onetime_prekey_id",
        "ciphertext",
        "nonce",
        "message_id",
        "timestamp",
    ] {
        assert!(value.get(field).is_some(), "missing field {field}");
    }

    // And it parses back.
    let parsed: OfflineEnvelope = serde_json::from_value(value).unwrap();
    assert_eq!(parsed.message_id, "msg_9");
}

#[tokio::test]
async fn drain_without_session_returns_envelopes() {
    let app = spawn_app().await;
    let ghost = wallet(0xdd);

    let alice = standalone_client(0xa1).await;
    let bob = standalone_client(0xb2).await;
    let envelope = encrypt_offline(
        &alice,
        &alice.address.to_hex(),
        &bob.key_bundle(),
        "stuck",
        "msg_1",
        1,
    )
    .unwrap();

    app.gateway.vault.store(&ghost, envelope).await;
    app.gateway.drain_vault(&ghost).await;

    // No session for the ghost wallet: nothing is lost.
    assert_eq!(app.gateway.vault.pending_count(&ghost).await, 1);
}

#[tokio::test]
async fn vault_drains_fifo_and_persists_history() {
    let app = spawn_app().await;
    let alice = wallet(0xa1);
    let bob = wallet(0xb2);

    app.initialize(&alice, "alice").await;
    app.initialize(&bob, "bob").await;
    let _alice_ws = app.ws_connect(&alice).await;

    for content in ["first", "second", "third"] {
        app.post("/api/send", &alice, json!({ "recipient_address": &bob, "content": content }))
            .await;
        // Distinct millisecond timestamps keep the ids distinct.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(app.gateway.vault.pending_count(&bob).await, 3);

    let _bob_ws = app.ws_connect(&bob).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let history: serde_json::Value = app
        .get(&format!("/api/messages/{alice}"), &bob)
        .await
        .json()
        .await
        .unwrap();
    let messages = history["messages"].as_array().unwrap();
    let contents: Vec<_> = messages.iter().map(|m| m["content"].as_str().unwrap()).collect();
    assert_eq!(contents, vec!["first", "second", "third"]);
    assert!(messages.iter().all(|m| m["unread"] == true));
}

#[tokio::test]
async fn deleting_a_chat_withdraws_pending_envelopes() {
    let app = spawn_app().await;
    let alice = wallet(0xa1);
    let bob = wallet(0xb2);

    app.initialize(&alice, "alice").await;
    app.initialize(&bob, "bob").await;
    let _alice_ws = app.ws_connect(&alice).await;

    app.post("/api/send", &alice, json!({ "recipient_address": &bob, "content": "pending" }))
        .await;
    assert_eq!(app.gateway.vault.pending_count(&bob).await, 1);

    // Deleting the chat on Bob's side drops envelopes from Alice.
    app.gateway.vault.remove_chat(&bob, &alice).await;
    assert_eq!(app.gateway.vault.pending_count(&bob).await, 0);
}
