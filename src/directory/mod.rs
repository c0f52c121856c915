//! Persistence collaborator.
//!
//! The routing core never owns durable state. Everything it needs from
//! storage - credential checks, membership checks, message durability, and
//! the group/invite lifecycle - goes through the [`Directory`] trait. The
//! daemon ships with an in-memory implementation ([`MemoryDirectory`]); a
//! deployment substitutes its own.

mod memory;

pub use memory::MemoryDirectory;

use crate::error::DirectoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A stored user, minus credential material.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub user_id: String,
    pub email: String,
}

/// A message to persist, as the routing core sees it.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub sender_id: String,
    pub body: String,
    pub timestamp: String,
    pub message_type: String,
    pub sent: DateTime<Utc>,
}

/// Storage operations consumed by the routing core.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Check a credential pair, returning the user on success.
    ///
    /// Password verification is entirely this collaborator's concern; the
    /// core only ever sees the resulting identity.
    async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<UserRecord>, DirectoryError>;

    async fn user_exists(&self, user_id: &str) -> Result<bool, DirectoryError>;

    async fn user_by_email(&self, email: &str) -> Result<Option<UserRecord>, DirectoryError>;

    async fn conversation_exists(&self, conversation_id: &str) -> Result<bool, DirectoryError>;

    async fn conversation_member(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<bool, DirectoryError>;

    async fn append_message(
        &self,
        conversation_id: &str,
        message: StoredMessage,
    ) -> Result<(), DirectoryError>;

    async fn group_exists(&self, group_id: &str) -> Result<bool, DirectoryError>;

    async fn group_member(&self, group_id: &str, user_id: &str) -> Result<bool, DirectoryError>;

    async fn group_members(&self, group_id: &str) -> Result<Vec<String>, DirectoryError>;

    async fn group_admin(&self, group_id: &str) -> Result<Option<String>, DirectoryError>;

    /// Create a group owned by `admin_id`, returning the new group id.
    async fn create_group(&self, name: &str, admin_id: &str) -> Result<String, DirectoryError>;

    /// Record an invitation, returning the invite id.
    async fn create_invite(
        &self,
        group_id: &str,
        from_user: &str,
        to_user: &str,
        message: &str,
    ) -> Result<String, DirectoryError>;

    async fn invite_pending(&self, group_id: &str, user_id: &str) -> Result<bool, DirectoryError>;

    /// Consume a pending invite, adding the user to the group.
    async fn accept_invite(&self, group_id: &str, user_id: &str) -> Result<(), DirectoryError>;

    /// Consume a pending invite without joining.
    async fn reject_invite(&self, group_id: &str, user_id: &str) -> Result<(), DirectoryError>;

    async fn append_group_message(
        &self,
        group_id: &str,
        message: StoredMessage,
    ) -> Result<(), DirectoryError>;
}
