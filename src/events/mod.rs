//! Event routing.
//!
//! Wire events are a tagged union: a `type` string selects the handler, the
//! payload stays opaque until the handler decodes it. Dispatch goes through
//! a static table built once at startup; unknown types are rejected with no
//! side effect.

mod group;
mod message;

pub use group::{CreateGroupHandler, GroupInviteReplyHandler, SendGroupMessageHandler};
pub use message::SendMessageHandler;

use crate::directory::Directory;
use crate::error::{EventError, EventResult};
use crate::network::registry::ConnectionRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// Action events (client -> server).
pub const SEND_MESSAGE: &str = "send_message";
pub const CREATE_GROUP: &str = "create_group";
pub const ACCEPT_GROUP_REQUEST: &str = "accept_group_request";
pub const REJECT_GROUP_REQUEST: &str = "reject_group_request";
pub const SEND_GROUP_MESSAGE: &str = "send_group_message";

// Listen events (server -> client).
pub const NEW_MESSAGE: &str = "new_message";
pub const NEW_GROUP_REQUEST: &str = "new_group_request";
pub const GROUP_REQUEST_ACCEPTED: &str = "group_request_accepted";
pub const GROUP_REQUEST_REJECTED: &str = "group_request_rejected";
pub const NEW_GROUP_MESSAGE: &str = "new_group_message";

/// A wire event.
///
/// `user_id` is stamped with the authenticated connection identity before
/// dispatch; whatever the client put there is discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Discriminator selecting the handler.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque payload; shape depends on `event_type`.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Referenced group, when the event concerns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Referenced conversation, when the event concerns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Source identity (stamped server-side).
    #[serde(default)]
    pub user_id: String,
}

impl Event {
    /// Build an outbound event.
    pub fn outbound<T: Serialize>(
        event_type: &str,
        payload: &T,
        group_id: Option<String>,
        conversation_id: Option<String>,
        user_id: &str,
    ) -> Result<Self, EventError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| EventError::ValidationFailed(e.to_string()))?;
        Ok(Self {
            event_type: event_type.to_string(),
            payload,
            group_id,
            conversation_id,
            user_id: user_id.to_string(),
        })
    }

    /// Decode the payload into a handler's expected shape.
    pub fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, EventError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| EventError::ValidationFailed(format!("bad payload: {e}")))
    }

    /// The referenced group id, or a validation failure.
    pub fn require_group(&self) -> Result<&str, EventError> {
        self.group_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| EventError::ValidationFailed("missing group_id".into()))
    }

    /// The referenced conversation id, or a validation failure.
    pub fn require_conversation(&self) -> Result<&str, EventError> {
        self.conversation_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| EventError::ValidationFailed("missing conversation_id".into()))
    }
}

/// Handler context: the authenticated source plus the collaborators a
/// handler may touch.
pub struct Context<'a> {
    /// Authenticated identity of the connection the event arrived on.
    pub user_id: &'a str,
    /// Registry, for delivering response events.
    pub registry: &'a ConnectionRegistry,
    /// Persistence collaborator.
    pub directory: &'a dyn Directory,
}

/// Trait implemented by all event handlers.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an inbound event.
    async fn handle(&self, ctx: &Context<'_>, event: &Event) -> EventResult;
}

/// Static dispatch table from event type to handler.
pub struct Router {
    handlers: HashMap<&'static str, Box<dyn EventHandler>>,
}

impl Router {
    /// Create a router with all handlers registered.
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Box<dyn EventHandler>> = HashMap::new();

        handlers.insert(SEND_MESSAGE, Box::new(SendMessageHandler));
        handlers.insert(CREATE_GROUP, Box::new(CreateGroupHandler));
        handlers.insert(
            ACCEPT_GROUP_REQUEST,
            Box::new(GroupInviteReplyHandler::accept()),
        );
        handlers.insert(
            REJECT_GROUP_REQUEST,
            Box::new(GroupInviteReplyHandler::reject()),
        );
        handlers.insert(SEND_GROUP_MESSAGE, Box::new(SendGroupMessageHandler));

        Self { handlers }
    }

    /// Dispatch an event to its handler.
    ///
    /// Unknown event types fail with `UnsupportedEvent` and no side effect.
    pub async fn dispatch(&self, ctx: &Context<'_>, event: &Event) -> EventResult {
        match self.handlers.get(event.event_type.as_str()) {
            Some(handler) => handler.handle(ctx, event).await,
            None => Err(EventError::UnsupportedEvent(event.event_type.clone())),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
