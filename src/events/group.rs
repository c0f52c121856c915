//! Group lifecycle and group message handling.

use super::{
    Context, Event, EventHandler, GROUP_REQUEST_ACCEPTED, GROUP_REQUEST_REJECTED,
    NEW_GROUP_MESSAGE, NEW_GROUP_REQUEST,
};
use crate::directory::StoredMessage;
use crate::error::{EventError, EventResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Inbound `create_group` payload.
#[derive(Debug, Deserialize)]
pub struct CreateGroupPayload {
    pub group_name: String,
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub message: String,
}

/// Outbound `new_group_request` payload.
#[derive(Debug, Serialize)]
pub struct GroupRequestPayload {
    #[serde(rename = "_id")]
    pub id: String,
    pub send_user_id: String,
    pub receive_user_id: String,
    pub group_id: String,
    pub group_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub status: i8,
}

/// Creates a group and invites the listed users.
///
/// The creator becomes the group admin. Each invitee that exists gets a
/// pending invite in the directory and, if online, a `new_group_request`
/// push. Unknown invitees invalidate the whole request.
pub struct CreateGroupHandler;

#[async_trait]
impl EventHandler for CreateGroupHandler {
    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> EventResult {
        let payload: CreateGroupPayload = event.decode_payload()?;
        if payload.group_name.is_empty() {
            return Err(EventError::ValidationFailed("empty group_name".into()));
        }

        for invitee in &payload.user_ids {
            if !ctx.directory.user_exists(invitee).await? {
                warn!(user_id = %invitee, "Invited user does not exist");
                return Err(EventError::ValidationFailed("unknown invitee".into()));
            }
        }

        let group_id = ctx
            .directory
            .create_group(&payload.group_name, ctx.user_id)
            .await?;
        info!(group_id = %group_id, admin = %ctx.user_id, "Group created");

        for invitee in &payload.user_ids {
            let invite_id = ctx
                .directory
                .create_invite(&group_id, ctx.user_id, invitee, &payload.message)
                .await?;

            let outgoing = Event::outbound(
                NEW_GROUP_REQUEST,
                &GroupRequestPayload {
                    id: invite_id,
                    send_user_id: ctx.user_id.to_string(),
                    receive_user_id: invitee.clone(),
                    group_id: group_id.clone(),
                    group_name: payload.group_name.clone(),
                    message: payload.message.clone(),
                    timestamp: Utc::now(),
                    status: 0,
                },
                Some(group_id.clone()),
                None,
                ctx.user_id,
            )?;
            ctx.registry.send(invitee, outgoing);
        }
        Ok(())
    }
}

/// Outbound accept/reject notification payload.
#[derive(Debug, Serialize)]
pub struct InviteReplyPayload {
    pub group_id: String,
    pub user_id: String,
}

/// Accepts or rejects a pending group invite.
///
/// The invitee is the authenticated connection identity; the reply is
/// pushed to the group admin if online.
pub struct GroupInviteReplyHandler {
    accept: bool,
}

impl GroupInviteReplyHandler {
    pub fn accept() -> Self {
        Self { accept: true }
    }

    pub fn reject() -> Self {
        Self { accept: false }
    }
}

#[async_trait]
impl EventHandler for GroupInviteReplyHandler {
    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> EventResult {
        let group_id = event.require_group()?;

        if !ctx.directory.group_exists(group_id).await? {
            warn!(group_id, "Group does not exist");
            return Err(EventError::ValidationFailed("unknown group".into()));
        }
        if !ctx.directory.invite_pending(group_id, ctx.user_id).await? {
            warn!(group_id, user_id = %ctx.user_id, "No pending invite for user");
            return Err(EventError::ValidationFailed("no pending invite".into()));
        }

        let reply_type = if self.accept {
            ctx.directory.accept_invite(group_id, ctx.user_id).await?;
            GROUP_REQUEST_ACCEPTED
        } else {
            ctx.directory.reject_invite(group_id, ctx.user_id).await?;
            GROUP_REQUEST_REJECTED
        };

        let outgoing = Event::outbound(
            reply_type,
            &InviteReplyPayload {
                group_id: group_id.to_string(),
                user_id: ctx.user_id.to_string(),
            },
            Some(group_id.to_string()),
            None,
            ctx.user_id,
        )?;

        if let Some(admin_id) = ctx.directory.group_admin(group_id).await? {
            ctx.registry.send(&admin_id, outgoing);
        }
        Ok(())
    }
}

/// Inbound `send_group_message` payload.
#[derive(Debug, Deserialize)]
pub struct SendGroupMessagePayload {
    pub message_data: String,
    pub timestamp: String,
    pub message_type: String,
}

/// Outbound `new_group_message` payload.
#[derive(Debug, Serialize)]
pub struct NewGroupMessagePayload {
    pub message_data: String,
    pub timestamp: String,
    pub message_type: String,
    pub sent: DateTime<Utc>,
    pub seen_by: Vec<String>,
}

/// Fans a message out to the members of a group.
///
/// Only members may send; delivery goes to every other member that is
/// currently connected. Membership is the authorization boundary - nobody
/// outside the group ever receives the event.
pub struct SendGroupMessageHandler;

#[async_trait]
impl EventHandler for SendGroupMessageHandler {
    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> EventResult {
        let payload: SendGroupMessagePayload = event.decode_payload()?;
        let group_id = event.require_group()?;

        if !ctx.directory.group_exists(group_id).await? {
            warn!(group_id, "Group does not exist");
            return Err(EventError::ValidationFailed("unknown group".into()));
        }
        if !ctx.directory.group_member(group_id, ctx.user_id).await? {
            warn!(group_id, user_id = %ctx.user_id, "Sender not in group");
            return Err(EventError::ValidationFailed("sender not a member".into()));
        }

        let sent = Utc::now();
        ctx.directory
            .append_group_message(
                group_id,
                StoredMessage {
                    sender_id: ctx.user_id.to_string(),
                    body: payload.message_data.clone(),
                    timestamp: payload.timestamp.clone(),
                    message_type: payload.message_type.clone(),
                    sent,
                },
            )
            .await?;

        let outgoing = Event::outbound(
            NEW_GROUP_MESSAGE,
            &NewGroupMessagePayload {
                message_data: payload.message_data,
                timestamp: payload.timestamp,
                message_type: payload.message_type,
                sent,
                seen_by: vec![ctx.user_id.to_string()],
            },
            Some(group_id.to_string()),
            None,
            ctx.user_id,
        )?;

        for member in ctx.directory.group_members(group_id).await? {
            if member == ctx.user_id {
                continue;
            }
            ctx.registry.send(&member, outgoing.clone());
        }
        Ok(())
    }
}
