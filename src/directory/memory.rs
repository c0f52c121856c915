//! In-memory directory implementation.
//!
//! Backs the daemon when no external storage is wired in, and the test
//! suite throughout. Password hashes use Argon2.

use super::{Directory, StoredMessage, UserRecord};
use crate::error::DirectoryError;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct UserEntry {
    user_id: String,
    email: String,
    password_hash: String,
}

#[derive(Debug, Default)]
struct Conversation {
    members: HashSet<String>,
    messages: Vec<StoredMessage>,
}

#[derive(Debug)]
struct Group {
    name: String,
    admin_id: String,
    members: HashSet<String>,
    pending_invites: HashMap<String, String>,
    messages: Vec<StoredMessage>,
}

#[derive(Default)]
struct Tables {
    users_by_email: HashMap<String, UserEntry>,
    conversations: HashMap<String, Conversation>,
    groups: HashMap<String, Group>,
}

/// Process-local [`Directory`] over plain maps.
#[derive(Default)]
pub struct MemoryDirectory {
    tables: RwLock<Tables>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a user with an Argon2-hashed password. Returns the user id.
    pub fn create_user(&self, email: &str, password: &str) -> Result<String, DirectoryError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?
            .to_string();

        let mut tables = self.tables.write();
        if tables.users_by_email.contains_key(email) {
            return Err(DirectoryError::Conflict);
        }
        let user_id = Uuid::new_v4().to_string();
        tables.users_by_email.insert(
            email.to_string(),
            UserEntry {
                user_id: user_id.clone(),
                email: email.to_string(),
                password_hash: hash,
            },
        );
        Ok(user_id)
    }

    /// Create a two-party conversation. Returns the conversation id.
    pub fn create_conversation(&self, members: &[&str]) -> String {
        let conversation_id = Uuid::new_v4().to_string();
        let mut tables = self.tables.write();
        tables.conversations.insert(
            conversation_id.clone(),
            Conversation {
                members: members.iter().map(|m| (*m).to_string()).collect(),
                messages: Vec::new(),
            },
        );
        conversation_id
    }

    /// Messages stored for a conversation (test inspection).
    pub fn conversation_messages(&self, conversation_id: &str) -> usize {
        self.tables
            .read()
            .conversations
            .get(conversation_id)
            .map(|c| c.messages.len())
            .unwrap_or(0)
    }

    /// Display name of a group, if it exists.
    pub fn group_name(&self, group_id: &str) -> Option<String> {
        self.tables.read().groups.get(group_id).map(|g| g.name.clone())
    }
}

fn record(entry: &UserEntry) -> UserRecord {
    UserRecord {
        user_id: entry.user_id.clone(),
        email: entry.email.clone(),
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<UserRecord>, DirectoryError> {
        let tables = self.tables.read();
        let Some(entry) = tables.users_by_email.get(email) else {
            return Ok(None);
        };
        let parsed = PasswordHash::new(&entry.password_hash)
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        let ok = Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok();
        Ok(ok.then(|| record(entry)))
    }

    async fn user_exists(&self, user_id: &str) -> Result<bool, DirectoryError> {
        let tables = self.tables.read();
        Ok(tables
            .users_by_email
            .values()
            .any(|u| u.user_id == user_id))
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<UserRecord>, DirectoryError> {
        Ok(self.tables.read().users_by_email.get(email).map(record))
    }

    async fn conversation_exists(&self, conversation_id: &str) -> Result<bool, DirectoryError> {
        Ok(self.tables.read().conversations.contains_key(conversation_id))
    }

    async fn conversation_member(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<bool, DirectoryError> {
        Ok(self
            .tables
            .read()
            .conversations
            .get(conversation_id)
            .is_some_and(|c| c.members.contains(user_id)))
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        message: StoredMessage,
    ) -> Result<(), DirectoryError> {
        let mut tables = self.tables.write();
        let conversation = tables
            .conversations
            .get_mut(conversation_id)
            .ok_or(DirectoryError::NotFound)?;
        conversation.messages.push(message);
        Ok(())
    }

    async fn group_exists(&self, group_id: &str) -> Result<bool, DirectoryError> {
        Ok(self.tables.read().groups.contains_key(group_id))
    }

    async fn group_member(&self, group_id: &str, user_id: &str) -> Result<bool, DirectoryError> {
        Ok(self
            .tables
            .read()
            .groups
            .get(group_id)
            .is_some_and(|g| g.members.contains(user_id)))
    }

    async fn group_members(&self, group_id: &str) -> Result<Vec<String>, DirectoryError> {
        let tables = self.tables.read();
        let group = tables.groups.get(group_id).ok_or(DirectoryError::NotFound)?;
        Ok(group.members.iter().cloned().collect())
    }

    async fn group_admin(&self, group_id: &str) -> Result<Option<String>, DirectoryError> {
        Ok(self
            .tables
            .read()
            .groups
            .get(group_id)
            .map(|g| g.admin_id.clone()))
    }

    async fn create_group(&self, name: &str, admin_id: &str) -> Result<String, DirectoryError> {
        let group_id = Uuid::new_v4().to_string();
        let mut members = HashSet::new();
        members.insert(admin_id.to_string());

        self.tables.write().groups.insert(
            group_id.clone(),
            Group {
                name: name.to_string(),
                admin_id: admin_id.to_string(),
                members,
                pending_invites: HashMap::new(),
                messages: Vec::new(),
            },
        );
        Ok(group_id)
    }

    async fn create_invite(
        &self,
        group_id: &str,
        _from_user: &str,
        to_user: &str,
        _message: &str,
    ) -> Result<String, DirectoryError> {
        let mut tables = self.tables.write();
        let group = tables.groups.get_mut(group_id).ok_or(DirectoryError::NotFound)?;
        let invite_id = Uuid::new_v4().to_string();
        group
            .pending_invites
            .insert(to_user.to_string(), invite_id.clone());
        Ok(invite_id)
    }

    async fn invite_pending(&self, group_id: &str, user_id: &str) -> Result<bool, DirectoryError> {
        Ok(self
            .tables
            .read()
            .groups
            .get(group_id)
            .is_some_and(|g| g.pending_invites.contains_key(user_id)))
    }

    async fn accept_invite(&self, group_id: &str, user_id: &str) -> Result<(), DirectoryError> {
        let mut tables = self.tables.write();
        let group = tables.groups.get_mut(group_id).ok_or(DirectoryError::NotFound)?;
        group
            .pending_invites
            .remove(user_id)
            .ok_or(DirectoryError::NotFound)?;
        group.members.insert(user_id.to_string());
        Ok(())
    }

    async fn reject_invite(&self, group_id: &str, user_id: &str) -> Result<(), DirectoryError> {
        let mut tables = self.tables.write();
        let group = tables.groups.get_mut(group_id).ok_or(DirectoryError::NotFound)?;
        group
            .pending_invites
            .remove(user_id)
            .ok_or(DirectoryError::NotFound)?;
        Ok(())
    }

    async fn append_group_message(
        &self,
        group_id: &str,
        message: StoredMessage,
    ) -> Result<(), DirectoryError> {
        let mut tables = self.tables.write();
        let group = tables.groups.get_mut(group_id).ok_or(DirectoryError::NotFound)?;
        group.messages.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(sender: &str) -> StoredMessage {
        StoredMessage {
            sender_id: sender.to_string(),
            body: "hello".to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            message_type: "text".to_string(),
            sent: Utc::now(),
        }
    }

    #[tokio::test]
    async fn authenticate_checks_argon2_hash() {
        let dir = MemoryDirectory::new();
        let user_id = dir.create_user("a@b.com", "hunter22").unwrap();

        let found = dir.authenticate("a@b.com", "hunter22").await.unwrap();
        assert_eq!(found.unwrap().user_id, user_id);

        assert!(dir.authenticate("a@b.com", "wrong").await.unwrap().is_none());
        assert!(dir.authenticate("x@b.com", "hunter22").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let dir = MemoryDirectory::new();
        dir.create_user("a@b.com", "pw").unwrap();
        assert_eq!(
            dir.create_user("a@b.com", "pw2").unwrap_err(),
            DirectoryError::Conflict
        );
    }

    #[tokio::test]
    async fn invite_accept_joins_exactly_once() {
        let dir = MemoryDirectory::new();
        let group_id = dir.create_group("team", "admin").await.unwrap();
        assert_eq!(dir.group_name(&group_id).as_deref(), Some("team"));
        dir.create_invite(&group_id, "admin", "u-2", "join us")
            .await
            .unwrap();

        assert!(dir.invite_pending(&group_id, "u-2").await.unwrap());
        dir.accept_invite(&group_id, "u-2").await.unwrap();
        assert!(dir.group_member(&group_id, "u-2").await.unwrap());

        // Invite was consumed; a second accept has nothing to consume.
        assert_eq!(
            dir.accept_invite(&group_id, "u-2").await.unwrap_err(),
            DirectoryError::NotFound
        );
    }

    #[tokio::test]
    async fn reject_consumes_without_joining() {
        let dir = MemoryDirectory::new();
        let group_id = dir.create_group("team", "admin").await.unwrap();
        dir.create_invite(&group_id, "admin", "u-2", "")
            .await
            .unwrap();

        dir.reject_invite(&group_id, "u-2").await.unwrap();
        assert!(!dir.group_member(&group_id, "u-2").await.unwrap());
        assert!(!dir.invite_pending(&group_id, "u-2").await.unwrap());
    }

    #[tokio::test]
    async fn messages_only_append_to_known_conversations() {
        let dir = MemoryDirectory::new();
        let conversation = dir.create_conversation(&["a", "b"]);

        dir.append_message(&conversation, message("a")).await.unwrap();
        assert_eq!(dir.conversation_messages(&conversation), 1);

        assert_eq!(
            dir.append_message("missing", message("a")).await.unwrap_err(),
            DirectoryError::NotFound
        );
    }
}
