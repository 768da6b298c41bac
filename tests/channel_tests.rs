//! Channel engine invariants: subscriber counts, role authorization,
//! ownership transfer, invite accounting.

mod common;

use common::{spawn_app, wallet};
use serde_json::json;

async fn setup_three(app: &common::TestApp) -> (String, String, String) {
    let alice = wallet(0xa1);
    let bob = wallet(0xb2);
    let carol = wallet(0xc3);
    app.initialize(&alice, "alice").await;
    app.initialize(&bob, "bob").await;
    app.initialize(&carol, "carol").await;
    (alice, bob, carol)
}

async fn create_channel(app: &common::TestApp, owner: &str, name: &str, kind: &str) -> String {
    let created: serde_json::Value = app
        .post("/api/channels", owner, json!({ "name": name, "type": kind }))
        .await
        .json()
        .await
        .unwrap();
    created["channel"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn subscriber_count_tracks_membership_rows() {
    let app = spawn_app().await;
    let (alice, bob, carol) = setup_three(&app).await;
    let channel = create_channel(&app, &alice, "counts", "public").await;

    app.post(&format!("/api/channels/{channel}/subscribe"), &bob, json!({}))
        .await;
    app.post(&format!("/api/channels/{channel}/subscribe"), &carol, json!({}))
        .await;
    // Double-subscribe must not inflate the count.
    let response = app
        .post(&format!("/api/channels/{channel}/subscribe"), &carol, json!({}))
        .await;
    assert_eq!(response.status(), 400);

    let info: serde_json::Value = app
        .get(&format!("/api/channels/{channel}"), &alice)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(info["channel"]["subscriber_count"], 3);

    app.post(&format!("/api/channels/{channel}/unsubscribe"), &carol, json!({}))
        .await;

    let info: serde_json::Value = app
        .get(&format!("/api/channels/{channel}"), &alice)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(info["channel"]["subscriber_count"], 2);

    let members: serde_json::Value = app
        .get(&format!("/api/channels/{channel}/members"), &alice)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(members["members"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn posting_requires_admin_or_owner() {
    let app = spawn_app().await;
    let (alice, bob, _) = setup_three(&app).await;
    let channel = create_channel(&app, &alice, "announcements", "public").await;

    app.post(&format!("/api/channels/{channel}/subscribe"), &bob, json!({}))
        .await;

    let response = app
        .post(
            &format!("/api/channels/{channel}/messages"),
            &bob,
            json!({ "content": "not allowed" }),
        )
        .await;
    assert_eq!(response.status(), 403);

    // Promotion unlocks posting.
    app.post(
        &format!("/api/channels/{channel}/members/promote"),
        &alice,
        json!({ "user_address": &bob }),
    )
    .await;

    let response = app
        .post(
            &format!("/api/channels/{channel}/messages"),
            &bob,
            json!({ "content": "now allowed" }),
        )
        .await;
    assert!(response.status().is_success());
}

#[tokio::test]
async fn edit_delete_pin_are_role_gated() {
    let app = spawn_app().await;
    let (alice, bob, _) = setup_three(&app).await;
    let channel = create_channel(&app, &alice, "mods-only", "public").await;

    app.post(&format!("/api/channels/{channel}/subscribe"), &bob, json!({}))
        .await;

    let posted: serde_json::Value = app
        .post(
            &format!("/api/channels/{channel}/messages"),
            &alice,
            json!({ "content": "original" }),
        )
        .await
        .json()
        .await
        .unwrap();
    let message_id = posted["message"]["id"].as_str().unwrap().to_string();

    for action in ["edit", "delete", "pin"] {
        let response = app
            .post(
                &format!("/api/channels/{channel}/messages/{message_id}/{action}"),
                &bob,
                json!({ "new_content": "tampered" }),
            )
            .await;
        assert_eq!(response.status(), 403, "subscriber must not {action}");
    }

    // Reactions are open to every member.
    let response = app
        .post(
            &format!("/api/channels/{channel}/messages/{message_id}/reactions/add"),
            &bob,
            json!({ "emoji": "👍" }),
        )
        .await;
    assert!(response.status().is_success());
}

#[tokio::test]
async fn owner_cannot_leave_but_can_transfer() {
    let app = spawn_app().await;
    let (alice, bob, _) = setup_three(&app).await;
    let channel = create_channel(&app, &alice, "handover", "public").await;

    app.post(&format!("/api/channels/{channel}/subscribe"), &bob, json!({}))
        .await;

    let response = app
        .post(&format!("/api/channels/{channel}/unsubscribe"), &alice, json!({}))
        .await;
    assert_eq!(response.status(), 403);

    let response = app
        .post(
            &format!("/api/channels/{channel}/transfer-ownership"),
            &alice,
            json!({ "user_address": &bob }),
        )
        .await;
    assert!(response.status().is_success());

    // Exactly one owner, and it is Bob; Alice became an admin.
    let members: serde_json::Value = app
        .get(&format!("/api/channels/{channel}/members"), &alice)
        .await
        .json()
        .await
        .unwrap();
    let members = members["members"].as_array().unwrap();
    let owners: Vec<_> = members.iter().filter(|m| m["role"] == "owner").collect();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0]["user_address"], bob.as_str());
    let alice_row = members
        .iter()
        .find(|m| m["user_address"] == alice.as_str())
        .unwrap();
    assert_eq!(alice_row["role"], "admin");

    // The old owner can leave now.
    let response = app
        .post(&format!("/api/channels/{channel}/unsubscribe"), &alice, json!({}))
        .await;
    assert!(response.status().is_success());

    // Only the new owner may delete.
    let response = app
        .http
        .delete(app.url(&format!("/api/channels/{channel}")))
        .header("X-Wallet-Address", &bob)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
}

#[tokio::test]
async fn invite_uses_increment_once_per_join() {
    let app = spawn_app().await;
    let (alice, bob, carol) = setup_three(&app).await;
    let channel = create_channel(&app, &alice, "limited", "private").await;

    let invite: serde_json::Value = app
        .post(
            &format!("/api/channels/{channel}/invites"),
            &alice,
            json!({ "max_uses": 5 }),
        )
        .await
        .json()
        .await
        .unwrap();
    let code = invite["invite"]["invite_code"].as_str().unwrap().to_string();

    app.post(
        &format!("/api/channels/{channel}/subscribe"),
        &bob,
        json!({ "invite_code": &code }),
    )
    .await;
    app.post(
        &format!("/api/channels/{channel}/subscribe"),
        &carol,
        json!({ "invite_code": &code }),
    )
    .await;

    let invites: serde_json::Value = app
        .get(&format!("/api/channels/{channel}/invites"), &alice)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(invites["invites"][0]["uses"], 2);

    // A wrong-channel code is rejected.
    let other = create_channel(&app, &alice, "other", "private").await;
    let response = app
        .post(
            &format!("/api/channels/{other}/subscribe"),
            &bob,
            json!({ "invite_code": &code }),
        )
        .await;
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn channel_name_conflicts_are_case_insensitive() {
    let app = spawn_app().await;
    let (alice, bob, _) = setup_three(&app).await;
    create_channel(&app, &alice, "General", "public").await;

    let response = app
        .post("/api/channels", &bob, json!({ "name": "general", "type": "public" }))
        .await;
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn channel_discovery_lists_public_only() {
    let app = spawn_app().await;
    let (alice, bob, _) = setup_three(&app).await;
    create_channel(&app, &alice, "open-lounge", "public").await;
    create_channel(&app, &alice, "hidden-lounge", "private").await;

    let found: serde_json::Value = app
        .get("/api/channels/discover?q=lounge", &bob)
        .await
        .json()
        .await
        .unwrap();
    let channels = found["channels"].as_array().unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0]["name"], "open-lounge");
}

// Subscriber-count invariant checked straight against the rows.
#[tokio::test]
async fn subscriber_count_matches_member_rows_in_storage() {
    let app = spawn_app().await;
    let (alice, bob, carol) = setup_three(&app).await;
    let channel = create_channel(&app, &alice, "audited", "public").await;

    app.post(&format!("/api/channels/{channel}/subscribe"), &bob, json!({}))
        .await;
    app.post(&format!("/api/channels/{channel}/subscribe"), &carol, json!({}))
        .await;
    app.post(&format!("/api/channels/{channel}/unsubscribe"), &bob, json!({}))
        .await;

    let channel_row = app
        .gateway
        .db
        .get_channel(&channel, &alice)
        .await
        .unwrap()
        .unwrap();
    let members = app.gateway.db.channel_members(&channel).await.unwrap();
    assert_eq!(channel_row.subscriber_count as usize, members.len());
}
