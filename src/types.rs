use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Users and direct messages
// ============================================================================

/// Public user snapshot as served to clients and stored in contact caches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub first_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub avatar_chunk_id: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub avatar_key: Vec<u8>,
    /// Always serialized, even when empty.
    pub bio: String,
    pub online: bool,
    /// "online", "away", "busy" or "offline"; never empty on the wire.
    pub status: String,
    /// Canonical hex form, no prefix.
    pub address: String,
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

/// Message sender: the literal `"You"` marks local origin, anything else
/// carries the peer's user snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Sender {
    Literal(String),
    Peer(Box<User>),
}

impl Sender {
    pub fn you() -> Self {
        Sender::Literal("You".to_string())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Sender::Literal(s) if s == "You")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    pub count: usize,
    pub users: Vec<User>,
    #[serde(rename = "hasReacted")]
    pub has_reacted: bool,
}

/// A direct message as stored in session history and served to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub timestamp: String,
    pub sender: Sender,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unread: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
    #[serde(rename = "mediaUrl", default, skip_serializing_if = "String::is_empty")]
    pub media_url: String,
    #[serde(rename = "isEdited", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_edited: bool,
    #[serde(
        rename = "isDeleted",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub is_deleted: bool,
}

/// Content prefix that marks a media message; the remainder is the media URL.
pub const MEDIA_MARKER: &str = "[MEDIA]";

/// Extracts the media URL from `[MEDIA] <url>` content, if present.
pub fn extract_media_url(content: &str) -> String {
    content
        .strip_prefix(MEDIA_MARKER)
        .map(|rest| rest.trim().to_string())
        .unwrap_or_default()
}

/// Display timestamp format used across chat history.
pub fn format_timestamp(t: DateTime<Local>) -> String {
    t.format("%Y-%m-%d %H:%M").to_string()
}

/// Sender-derived message id; both sides compute the same id from the
/// message's millisecond timestamp, which makes redelivery dedup trivial.
pub fn message_id_from_millis(millis: i64) -> String {
    format!("msg_{millis}")
}

#[derive(Debug, Clone, Serialize)]
pub struct Chat {
    pub id: String,
    pub sender: User,
    pub messages: Vec<Message>,
}

// ============================================================================
// Channels
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub avatar_chunk_id: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub avatar_key: Vec<u8>,
    pub owner_address: String,
    /// "public" or "private".
    #[serde(rename = "type")]
    pub channel_type: String,
    pub is_verified: bool,
    pub subscriber_count: i64,
    pub created_at: String,
    pub updated_at: String,
    /// Role of the requesting user, when known ("owner", "admin",
    /// "subscriber" or empty for non-members).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMember {
    pub channel_id: String,
    pub user_address: String,
    pub role: String,
    pub joined_at: String,
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_read_message_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: String,
    pub channel_id: String,
    pub sender: User,
    pub content: String,
    pub timestamp: String,
    #[serde(rename = "isEdited", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_edited: bool,
    #[serde(
        rename = "isDeleted",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub is_deleted: bool,
    #[serde(rename = "isPinned", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_pinned: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pinned_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pinned_by: String,
    #[serde(rename = "mediaUrl", default, skip_serializing_if = "String::is_empty")]
    pub media_url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub view_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInvite {
    pub id: String,
    pub channel_id: String,
    pub invited_by: String,
    pub invite_code: String,
    /// 0 means unlimited.
    pub max_uses: i64,
    pub uses: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub media_type: String,
    pub url: String,
    pub file_name: String,
    pub mime_type: String,
    pub size: i64,
    pub created_at: String,
}

// ============================================================================
// WebSocket events
// ============================================================================

/// Envelope for every realtime event. Type strings are part of the client
/// contract and must not change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl WsEvent {
    pub fn new(event_type: &str, payload: impl Serialize) -> Self {
        WsEvent {
            event_type: event_type.to_string(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsIncomingMessage {
    pub id: String,
    pub from: String,
    pub content: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsTypingIndicator {
    pub from: String,
    pub typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsOnlineStatus {
    pub address: String,
    pub online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsStatusUpdate {
    pub address: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsProfileUpdate {
    pub address: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: String,
    pub avatar_chunk_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsReadReceipt {
    pub from: String,
    pub message_id: String,
    pub read_status: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessageDeleted {
    pub message_id: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessageEdited {
    pub message_id: String,
    pub chat_id: String,
    pub new_content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsReactionChange {
    pub message_id: String,
    pub chat_id: String,
    pub emoji: String,
    pub from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsUserAction {
    pub action: String,
    pub user_address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WsChannelMemberJoined {
    pub channel_id: String,
    pub member: ChannelMember,
}

#[derive(Debug, Clone, Serialize)]
pub struct WsChannelMemberLeft {
    pub channel_id: String,
    pub user_address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WsChannelMemberPromoted {
    pub channel_id: String,
    pub user_address: String,
    pub new_role: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WsChannelMessageEvent {
    pub channel_id: String,
    pub message_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WsChannelReaction {
    pub channel_id: String,
    pub message_id: String,
    pub emoji: String,
    pub from: String,
}

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct InitializeRequest {
    pub wallet_address: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct InitializeResponse {
    pub success: bool,
    pub address: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub recipient_address: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub message_id: String,
    pub timestamp: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct DiscoverContactRequest {
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct PeerInfoRequest {
    pub peer_address: String,
}

#[derive(Debug, Deserialize)]
pub struct MarkAsReadRequest {
    pub peer_address: String,
    pub message_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TypingIndicatorRequest {
    pub peer_address: String,
    pub typing: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeleteMessageRequest {
    pub message_id: String,
    pub peer_address: String,
    #[serde(default)]
    pub delete_for_everyone: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeleteChatRequest {
    pub peer_address: String,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub message_id: String,
    pub peer_address: String,
    pub new_content: String,
}

#[derive(Debug, Deserialize)]
pub struct ReactionRequest {
    pub message_id: String,
    pub peer_address: String,
    pub emoji: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadMediaRequest {
    pub media_type: String,
    pub file_name: String,
    pub mime_type: String,
    /// Base64-encoded file bytes.
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct UploadMediaResponse {
    pub success: bool,
    pub media_id: String,
    pub url: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ContactActionRequest {
    pub contact_address: String,
}

#[derive(Debug, Deserialize)]
pub struct PeerActionRequest {
    pub peer_address: String,
}

#[derive(Debug, Deserialize)]
pub struct StarMessageRequest {
    pub message_id: String,
    #[serde(default)]
    pub peer_address: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteAccountRequest {
    pub wallet_address: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUsernameRequest {
    pub new_username: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckUsernameRequest {
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct CheckUsernameResponse {
    pub available: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub avatar_chunk_id: u64,
    /// Base64-encoded avatar encryption key.
    #[serde(default)]
    pub avatar_key: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub channel_type: String,
    #[serde(default)]
    pub avatar_chunk_id: u64,
    #[serde(default)]
    pub avatar_key: String,
    #[serde(default)]
    pub initial_members: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateChannelRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub avatar_chunk_id: Option<u64>,
    #[serde(default)]
    pub avatar_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscribeChannelRequest {
    #[serde(default)]
    pub invite_code: String,
}

#[derive(Debug, Deserialize)]
pub struct ChannelMemberRequest {
    pub user_address: String,
}

#[derive(Debug, Deserialize)]
pub struct SendChannelMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct EditChannelMessageRequest {
    pub new_content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChannelReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelInviteRequest {
    #[serde(default)]
    pub max_uses: i64,
    /// Optional RFC 3339 expiry.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_serializes_local_origin_as_literal() {
        let json = serde_json::to_string(&Sender::you()).unwrap();
        assert_eq!(json, "\"You\"");

        let user = User {
            name: "Alice".into(),
            username: "alice".into(),
            address: "aa".repeat(20),
            status: "online".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&Sender::Peer(Box::new(user))).unwrap();
        assert!(json.contains("\"username\":\"alice\""));
    }

    #[test]
    fn media_marker_extraction() {
        assert_eq!(
            extract_media_url("[MEDIA] http://host/m/1"),
            "http://host/m/1"
        );
        assert_eq!(extract_media_url("plain text"), "");
    }

    #[test]
    fn message_id_is_deterministic_in_timestamp() {
        assert_eq!(message_id_from_millis(1714999000), "msg_1714999000");
    }
}
