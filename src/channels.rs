//! Channel engine: broadcast groups with owner/admin/subscriber roles,
//! invite codes for private channels, and member fan-out through the
//! realtime hub.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::address::normalize;
use crate::error::{AppError, AppResult};
use crate::session::Session;
use crate::types::{
    format_timestamp, message_id_from_millis, Channel, ChannelMessage, CreateChannelRequest,
    Reaction, User, WsChannelMemberJoined, WsChannelMemberLeft, WsChannelMemberPromoted,
    WsChannelMessageEvent, WsChannelReaction,
};
use crate::Gateway;

/// Adds a user to a reaction bucket; returns false when already present.
pub fn add_reaction(reactions: &mut Vec<Reaction>, emoji: &str, user: &User) -> bool {
    if let Some(bucket) = reactions.iter_mut().find(|r| r.emoji == emoji) {
        if bucket.users.iter().any(|u| u.address == user.address) {
            return false;
        }
        bucket.users.push(user.clone());
        bucket.count = bucket.users.len();
        return true;
    }
    reactions.push(Reaction {
        emoji: emoji.to_string(),
        count: 1,
        users: vec![user.clone()],
        has_reacted: false,
    });
    true
}

/// Removes a user from a reaction bucket; drops the bucket when empty.
pub fn remove_reaction(reactions: &mut Vec<Reaction>, emoji: &str, user_addr: &str) -> bool {
    let Some(idx) = reactions.iter().position(|r| r.emoji == emoji) else {
        return false;
    };
    let before = reactions[idx].users.len();
    reactions[idx].users.retain(|u| u.address != user_addr);
    let removed = reactions[idx].users.len() < before;
    reactions[idx].count = reactions[idx].users.len();
    if reactions[idx].users.is_empty() {
        reactions.remove(idx);
    }
    removed
}

impl Gateway {
    /// Unicasts a channel event to every current member. Non-members never
    /// receive channel events; offline members re-sync on their next read.
    pub async fn fan_out_to_channel(
        &self,
        channel_id: &str,
        event_type: &str,
        payload: impl Serialize + Clone,
    ) {
        let members = match self.db.channel_members(channel_id).await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(channel = %channel_id, error = %e, "member enumeration failed");
                return;
            }
        };

        for member in members {
            let address = normalize(&member.user_address);
            self.notify(&address, event_type, payload.clone()).await;
        }
    }

    async fn require_member_role(
        &self,
        channel_id: &str,
        user_addr: &str,
        allowed: &[&str],
    ) -> AppResult<String> {
        let role = self
            .db
            .channel_role(channel_id, user_addr)
            .await?
            .ok_or_else(|| AppError::forbidden("You are not a member of this channel"))?;
        if !allowed.contains(&role.as_str()) {
            return Err(AppError::forbidden(
                "You do not have permission for this action",
            ));
        }
        Ok(role)
    }

    // ========================================================================
    // Channel lifecycle
    // ========================================================================

    pub async fn create_channel(
        &self,
        session: &Arc<Session>,
        req: &CreateChannelRequest,
        avatar_key: &[u8],
    ) -> AppResult<Channel> {
        if req.name.trim().is_empty() {
            return Err(AppError::bad_request("Channel name is required"));
        }
        if req.channel_type != "public" && req.channel_type != "private" {
            return Err(AppError::bad_request(
                "Channel type must be 'public' or 'private'",
            ));
        }

        let channel = self
            .db
            .create_channel(&session.address, req, avatar_key)
            .await?;

        self.fan_out_to_channel(&channel.id, "channel_created", channel.clone())
            .await;
        Ok(channel)
    }

    pub async fn delete_channel(&self, channel_id: &str, user_addr: &str) -> AppResult<()> {
        self.require_member_role(channel_id, user_addr, &["owner"])
            .await?;

        // Snapshot members before the rows cascade away.
        let members = self.db.channel_members(channel_id).await?;
        self.db.delete_channel(channel_id).await?;

        for member in members {
            self.notify(
                &normalize(&member.user_address),
                "channel_deleted",
                serde_json::json!({ "channel_id": channel_id }),
            )
            .await;
        }
        Ok(())
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Joins a channel. Private channels require a valid, unexpired,
    /// unexhausted invite code bound to that channel.
    pub async fn subscribe_to_channel(
        &self,
        channel_id: &str,
        user_addr: &str,
        invite_code: &str,
    ) -> AppResult<()> {
        let channel = self
            .db
            .get_channel(channel_id, user_addr)
            .await?
            .ok_or_else(|| AppError::not_found("Channel not found"))?;

        if self.db.is_channel_member(channel_id, user_addr).await? {
            return Err(AppError::bad_request(
                "You are already subscribed to this channel",
            ));
        }

        if channel.channel_type == "private" {
            if invite_code.is_empty() {
                return Err(AppError::bad_request(
                    "Invite code is required for private channels",
                ));
            }
            // Code validation, the use-count increment and the membership
            // insert commit together.
            self.db
                .join_channel_with_invite(channel_id, user_addr, invite_code)
                .await?;
        } else {
            self.db
                .add_channel_member(channel_id, user_addr, "subscriber")
                .await?;
        }

        tracing::info!(user = %user_addr, channel = %channel_id, "subscribed to channel");

        if let Some(member) = self.db.get_channel_member(channel_id, user_addr).await? {
            self.fan_out_to_channel(
                channel_id,
                "channel_member_joined",
                WsChannelMemberJoined {
                    channel_id: channel_id.to_string(),
                    member,
                },
            )
            .await;
        }
        Ok(())
    }

    /// Leaves a channel. The owner cannot leave without transferring
    /// ownership first.
    pub async fn unsubscribe_from_channel(
        &self,
        channel_id: &str,
        user_addr: &str,
    ) -> AppResult<()> {
        let role = self
            .db
            .channel_role(channel_id, user_addr)
            .await?
            .ok_or_else(|| AppError::not_found("You are not a member of this channel"))?;

        if role == "owner" {
            return Err(AppError::forbidden(
                "Owner cannot leave the channel. Please transfer ownership or delete the channel.",
            ));
        }

        // Enumerate before removal so the leaver still gets the event.
        let members = self.db.channel_members(channel_id).await?;
        self.db.remove_channel_member(channel_id, user_addr).await?;

        let payload = WsChannelMemberLeft {
            channel_id: channel_id.to_string(),
            user_address: user_addr.to_string(),
        };
        for member in members {
            self.notify(
                &normalize(&member.user_address),
                "channel_member_left",
                payload.clone(),
            )
            .await;
        }
        Ok(())
    }

    /// Kicks a member. Admins cannot remove the owner or other admins.
    pub async fn remove_channel_member(
        &self,
        channel_id: &str,
        actor: &str,
        target: &str,
    ) -> AppResult<()> {
        let actor_role = self
            .require_member_role(channel_id, actor, &["owner", "admin"])
            .await?;

        let target = normalize(target);
        let target_role = self
            .db
            .channel_role(channel_id, &target)
            .await?
            .ok_or_else(|| AppError::not_found("User is not a member of this channel"))?;

        if target_role == "owner" {
            return Err(AppError::forbidden("The owner cannot be removed"));
        }
        if target_role == "admin" && actor_role != "owner" {
            return Err(AppError::forbidden("Only the owner can remove an admin"));
        }

        let members = self.db.channel_members(channel_id).await?;
        self.db.remove_channel_member(channel_id, &target).await?;

        let payload = WsChannelMemberLeft {
            channel_id: channel_id.to_string(),
            user_address: target.clone(),
        };
        for member in members {
            self.notify(
                &normalize(&member.user_address),
                "channel_member_removed",
                payload.clone(),
            )
            .await;
        }
        Ok(())
    }

    pub async fn promote_member(
        &self,
        channel_id: &str,
        actor: &str,
        target: &str,
    ) -> AppResult<()> {
        self.require_member_role(channel_id, actor, &["owner", "admin"])
            .await?;

        let target = normalize(target);
        let target_role = self
            .db
            .channel_role(channel_id, &target)
            .await?
            .ok_or_else(|| AppError::not_found("User is not a member of this channel"))?;

        if target_role != "subscriber" {
            return Err(AppError::bad_request("Only subscribers can be promoted"));
        }

        self.db
            .update_member_role(channel_id, &target, "admin")
            .await?;

        self.fan_out_to_channel(
            channel_id,
            "channel_member_promoted",
            WsChannelMemberPromoted {
                channel_id: channel_id.to_string(),
                user_address: target,
                new_role: "admin".to_string(),
            },
        )
        .await;
        Ok(())
    }

    pub async fn demote_member(
        &self,
        channel_id: &str,
        actor: &str,
        target: &str,
    ) -> AppResult<()> {
        self.require_member_role(channel_id, actor, &["owner"])
            .await?;

        let target = normalize(target);
        let target_role = self
            .db
            .channel_role(channel_id, &target)
            .await?
            .ok_or_else(|| AppError::not_found("User is not a member of this channel"))?;

        if target_role != "admin" {
            return Err(AppError::bad_request("Only admins can be demoted"));
        }

        self.db
            .update_member_role(channel_id, &target, "subscriber")
            .await?;

        self.fan_out_to_channel(
            channel_id,
            "channel_member_promoted",
            WsChannelMemberPromoted {
                channel_id: channel_id.to_string(),
                user_address: target,
                new_role: "subscriber".to_string(),
            },
        )
        .await;
        Ok(())
    }

    /// Atomically swaps ownership: the previous owner becomes an admin.
    pub async fn transfer_channel_ownership(
        &self,
        channel_id: &str,
        owner: &str,
        new_owner: &str,
    ) -> AppResult<()> {
        self.require_member_role(channel_id, owner, &["owner"])
            .await?;

        let new_owner = normalize(new_owner);
        if new_owner == owner {
            return Err(AppError::bad_request("You already own this channel"));
        }
        if self
            .db
            .channel_role(channel_id, &new_owner)
            .await?
            .is_none()
        {
            return Err(AppError::not_found("User is not a member of this channel"));
        }

        self.db
            .transfer_channel_ownership(channel_id, owner, &new_owner)
            .await?;

        self.fan_out_to_channel(
            channel_id,
            "channel_member_promoted",
            WsChannelMemberPromoted {
                channel_id: channel_id.to_string(),
                user_address: new_owner,
                new_role: "owner".to_string(),
            },
        )
        .await;
        Ok(())
    }

    // ========================================================================
    // Channel messages
    // ========================================================================

    /// Posts to a channel; admin or owner only.
    pub async fn send_channel_message(
        &self,
        channel_id: &str,
        sender_addr: &str,
        content: &str,
    ) -> AppResult<ChannelMessage> {
        self.require_member_role(channel_id, sender_addr, &["owner", "admin"])
            .await?;

        if content.trim().is_empty() {
            return Err(AppError::bad_request("Message content is required"));
        }

        let sender = self.user_snapshot(sender_addr).await;
        let timestamp_ms = Utc::now().timestamp_millis();

        let message = ChannelMessage {
            id: message_id_from_millis(timestamp_ms),
            channel_id: channel_id.to_string(),
            sender,
            content: content.to_string(),
            timestamp: format_timestamp(chrono::Local::now()),
            is_edited: false,
            is_deleted: false,
            is_pinned: false,
            pinned_at: String::new(),
            pinned_by: String::new(),
            media_url: crate::types::extract_media_url(content),
            reactions: vec![],
            view_count: 0,
        };

        self.db.save_channel_message(&message).await?;

        self.fan_out_to_channel(channel_id, "channel_message", message.clone())
            .await;
        Ok(message)
    }

    pub async fn edit_channel_message(
        &self,
        channel_id: &str,
        actor: &str,
        message_id: &str,
        new_content: &str,
    ) -> AppResult<()> {
        self.require_member_role(channel_id, actor, &["owner", "admin"])
            .await?;

        if !self
            .db
            .edit_channel_message(channel_id, message_id, new_content)
            .await?
        {
            return Err(AppError::not_found("Message not found"));
        }

        self.fan_out_to_channel(
            channel_id,
            "channel_message_edited",
            WsChannelMessageEvent {
                channel_id: channel_id.to_string(),
                message_id: message_id.to_string(),
                content: new_content.to_string(),
            },
        )
        .await;
        Ok(())
    }

    pub async fn delete_channel_message(
        &self,
        channel_id: &str,
        actor: &str,
        message_id: &str,
    ) -> AppResult<()> {
        self.require_member_role(channel_id, actor, &["owner", "admin"])
            .await?;

        if !self.db.delete_channel_message(channel_id, message_id).await? {
            return Err(AppError::not_found("Message not found"));
        }

        self.fan_out_to_channel(
            channel_id,
            "channel_message_deleted",
            WsChannelMessageEvent {
                channel_id: channel_id.to_string(),
                message_id: message_id.to_string(),
                content: String::new(),
            },
        )
        .await;
        Ok(())
    }

    pub async fn pin_channel_message(
        &self,
        channel_id: &str,
        actor: &str,
        message_id: &str,
        pin: bool,
    ) -> AppResult<()> {
        self.require_member_role(channel_id, actor, &["owner", "admin"])
            .await?;

        let changed = if pin {
            self.db
                .pin_channel_message(channel_id, message_id, actor)
                .await?
        } else {
            self.db.unpin_channel_message(channel_id, message_id).await?
        };

        if !changed {
            return Err(AppError::not_found("Message not found"));
        }

        if pin {
            self.fan_out_to_channel(
                channel_id,
                "channel_message_pinned",
                WsChannelMessageEvent {
                    channel_id: channel_id.to_string(),
                    message_id: message_id.to_string(),
                    content: String::new(),
                },
            )
            .await;
        }
        Ok(())
    }

    /// Reactions are open to every member.
    pub async fn react_to_channel_message(
        &self,
        channel_id: &str,
        actor: &str,
        message_id: &str,
        emoji: &str,
        add: bool,
    ) -> AppResult<()> {
        self.require_member_role(channel_id, actor, &["owner", "admin", "subscriber"])
            .await?;

        let mut message = self
            .db
            .get_channel_message(channel_id, message_id)
            .await?
            .ok_or_else(|| AppError::not_found("Message not found"))?;

        let changed = if add {
            let user = self.user_snapshot(actor).await;
            add_reaction(&mut message.reactions, emoji, &user)
        } else {
            remove_reaction(&mut message.reactions, emoji, actor)
        };

        if !changed {
            return Ok(());
        }

        self.db
            .update_channel_message_reactions(channel_id, message_id, &message.reactions)
            .await?;

        let event_type = if add {
            "channel_reaction_added"
        } else {
            "channel_reaction_removed"
        };
        self.fan_out_to_channel(
            channel_id,
            event_type,
            WsChannelReaction {
                channel_id: channel_id.to_string(),
                message_id: message_id.to_string(),
                emoji: emoji.to_string(),
                from: actor.to_string(),
            },
        )
        .await;
        Ok(())
    }

    /// Reads a window of channel messages, bumping view counts and the
    /// member's read position.
    pub async fn read_channel_messages(
        &self,
        channel_id: &str,
        user_addr: &str,
        limit: i64,
        before: Option<&str>,
    ) -> AppResult<Vec<ChannelMessage>> {
        self.require_member_role(channel_id, user_addr, &["owner", "admin", "subscriber"])
            .await?;

        let messages = self
            .db
            .load_channel_messages(channel_id, limit, before)
            .await?;

        if let Some(last) = messages.last() {
            let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
            if let Err(e) = self
                .db
                .increment_channel_message_views(channel_id, &ids)
                .await
            {
                tracing::warn!(error = %e, "view count update failed");
            }
            if let Err(e) = self
                .db
                .set_last_read_message(channel_id, user_addr, &last.id)
                .await
            {
                tracing::warn!(error = %e, "last read update failed");
            }
        }

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(addr: &str) -> User {
        User {
            address: addr.to_string(),
            username: addr.to_string(),
            name: addr.to_string(),
            status: "online".to_string(),
            bio: String::new(),
            ..Default::default()
        }
    }

    #[test]
    fn reaction_add_is_idempotent_per_user() {
        let mut reactions = vec![];
        assert!(add_reaction(&mut reactions, "👍", &user("aa")));
        assert!(!add_reaction(&mut reactions, "👍", &user("aa")));
        assert!(add_reaction(&mut reactions, "👍", &user("bb")));
        assert_eq!(reactions[0].count, 2);
    }

    #[test]
    fn reaction_remove_drops_empty_bucket() {
        let mut reactions = vec![];
        add_reaction(&mut reactions, "❤️", &user("aa"));
        assert!(remove_reaction(&mut reactions, "❤️", "aa"));
        assert!(reactions.is_empty());
        assert!(!remove_reaction(&mut reactions, "❤️", "aa"));
    }
}
