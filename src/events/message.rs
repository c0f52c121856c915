//! Direct message handling.

use super::{Context, Event, EventHandler, NEW_MESSAGE};
use crate::directory::StoredMessage;
use crate::error::{EventError, EventResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Inbound `send_message` payload.
#[derive(Debug, Deserialize)]
pub struct SendMessagePayload {
    pub message_data: String,
    pub receiver_id: String,
    pub timestamp: String,
    pub message_type: String,
}

/// Outbound `new_message` payload.
#[derive(Debug, Serialize)]
pub struct NewMessagePayload {
    pub message_data: String,
    pub receiver_id: String,
    pub timestamp: String,
    pub message_type: String,
    pub sent: DateTime<Utc>,
    pub seen_by: Vec<String>,
}

/// Routes a message within a two-party conversation.
///
/// The sender and the named receiver must both be members of the referenced
/// conversation; the message is persisted, then pushed to the receiver if
/// they are online. Offline receivers are a silent no-op.
pub struct SendMessageHandler;

#[async_trait]
impl EventHandler for SendMessageHandler {
    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> EventResult {
        let payload: SendMessagePayload = event.decode_payload()?;
        let conversation_id = event.require_conversation()?;

        if !ctx.directory.conversation_exists(conversation_id).await? {
            warn!(conversation_id, "Conversation does not exist");
            return Err(EventError::ValidationFailed("unknown conversation".into()));
        }
        if !ctx
            .directory
            .conversation_member(conversation_id, ctx.user_id)
            .await?
        {
            warn!(user_id = %ctx.user_id, conversation_id, "Sender not in conversation");
            return Err(EventError::ValidationFailed("sender not a member".into()));
        }
        if !ctx
            .directory
            .conversation_member(conversation_id, &payload.receiver_id)
            .await?
        {
            warn!(receiver_id = %payload.receiver_id, conversation_id, "Receiver not in conversation");
            return Err(EventError::ValidationFailed("receiver not a member".into()));
        }

        let sent = Utc::now();
        ctx.directory
            .append_message(
                conversation_id,
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
            NEW_MESSAGE,
            &NewMessagePayload {
                message_data: payload.message_data,
                receiver_id: payload.receiver_id.clone(),
                timestamp: payload.timestamp,
                message_type: payload.message_type,
                sent,
                seen_by: vec![ctx.user_id.to_string()],
            },
            event.group_id.clone(),
            Some(conversation_id.to_string()),
            ctx.user_id,
        )?;

        // Best-effort: offline receivers simply miss the push.
        ctx.registry.send(&payload.receiver_id, outgoing);
        Ok(())
    }
}
