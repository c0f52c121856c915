//! Session store: bearer tokens for authenticated users.
//!
//! Tokens are self-describing (see [`crate::auth::token`]) but the store is
//! authoritative: revoking a token deletes it here, and validation fails for
//! any token that is absent, which makes logout effective immediately even
//! though the token's own expiry may be far in the future.

use crate::auth::token::{self, Claims, TokenKind};
use crate::config::AuthConfig;
use crate::error::AuthError;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// An issued session. Immutable after creation.
#[derive(Debug, Clone)]
pub struct Session {
    /// Owning user identity.
    pub user_id: String,
    /// Access or refresh.
    pub kind: TokenKind,
    /// The signed token string (also the store key).
    pub token: String,
    /// Hard expiry; the sweep deletes the session at or after this instant.
    pub expires_at: DateTime<Utc>,
}

/// In-memory session store keyed by token.
///
/// All map access goes through one mutex, never held across an await.
pub struct SessionStore {
    secret: Vec<u8>,
    access_ttl: Duration,
    refresh_ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    /// Create a store from the auth configuration.
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            secret: config.secret.clone().into_bytes(),
            access_ttl: Duration::seconds(config.access_ttl_secs as i64),
            refresh_ttl: Duration::seconds(config.refresh_ttl_secs as i64),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a short-lived access token for a user.
    pub fn issue_access(&self, user_id: &str) -> Result<Session, AuthError> {
        self.issue(user_id, TokenKind::Access, self.access_ttl)
    }

    /// Issue a long-lived refresh token for a user.
    pub fn issue_refresh(&self, user_id: &str) -> Result<Session, AuthError> {
        self.issue(user_id, TokenKind::Refresh, self.refresh_ttl)
    }

    fn issue(&self, user_id: &str, kind: TokenKind, ttl: Duration) -> Result<Session, AuthError> {
        let expires_at = Utc::now() + ttl;
        let claims = Claims {
            user_id: user_id.to_string(),
            kind,
            exp: expires_at.timestamp(),
            jti: uuid::Uuid::new_v4(),
        };
        let token = token::sign(&claims, &self.secret)?;

        let session = Session {
            user_id: user_id.to_string(),
            kind,
            token: token.clone(),
            expires_at,
        };
        self.sessions.lock().insert(token, session.clone());
        Ok(session)
    }

    /// Validate a presented token.
    ///
    /// Two-phase: the self-contained signature and expiry are checked first,
    /// then the store is consulted. A signature-valid token that is no
    /// longer present has been revoked.
    pub fn validate(&self, presented: &str) -> Result<Claims, AuthError> {
        self.validate_at(presented, Utc::now())
    }

    fn validate_at(&self, presented: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let claims = token::verify(presented, &self.secret, now)?;
        if !self.sessions.lock().contains_key(presented) {
            return Err(AuthError::Revoked);
        }
        Ok(claims)
    }

    /// Look up the session for a token, if any.
    pub fn lookup(&self, presented: &str) -> Option<Session> {
        self.sessions.lock().get(presented).cloned()
    }

    /// Delete a session immediately. No-op for unknown tokens.
    pub fn revoke(&self, presented: &str) {
        self.sessions.lock().remove(presented);
    }

    /// Delete every session at or past its expiry. Returns how many.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| session.expires_at > now);
        before - sessions.len()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether the store holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Spawn the periodic expiry sweep, cancelled by `shutdown`.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: std::time::Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = store.sweep(Utc::now());
                        if removed > 0 {
                            debug!(removed, "Expired sessions swept");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(&AuthConfig {
            secret: "unit-test-signing-secret".into(),
            access_ttl_secs: 60,
            refresh_ttl_secs: 3600,
            sweep_interval_ms: 400,
        })
    }

    #[test]
    fn validate_succeeds_until_expiry() {
        let store = store();
        let session = store.issue_access("u-1").unwrap();

        let now = Utc::now();
        assert!(store.validate_at(&session.token, now).is_ok());
        assert!(matches!(
            store.validate_at(&session.token, session.expires_at),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn revoke_beats_embedded_expiry() {
        let store = store();
        let session = store.issue_access("u-1").unwrap();

        store.revoke(&session.token);
        // Signature and expiry are still fine; the store says no.
        assert!(matches!(
            store.validate(&session.token),
            Err(AuthError::Revoked)
        ));
    }

    #[test]
    fn revoking_access_leaves_refresh_valid() {
        let store = store();
        let access = store.issue_access("u-1").unwrap();
        let refresh = store.issue_refresh("u-1").unwrap();
        assert_ne!(access.token, refresh.token);

        assert!(store.validate(&access.token).is_ok());
        assert!(store.validate(&refresh.token).is_ok());

        store.revoke(&access.token);
        assert!(matches!(
            store.validate(&access.token),
            Err(AuthError::Revoked)
        ));
        let claims = store.validate(&refresh.token).unwrap();
        assert_eq!(claims.kind, TokenKind::Refresh);
    }

    #[test]
    fn sweep_removes_only_expired() {
        let store = store();
        let access = store.issue_access("u-1").unwrap();
        let refresh = store.issue_refresh("u-1").unwrap();

        // Between the two expiries: access is gone, refresh survives.
        let removed = store.sweep(access.expires_at);
        assert_eq!(removed, 1);
        assert!(store.lookup(&access.token).is_none());
        assert!(store.lookup(&refresh.token).is_some());

        assert_eq!(store.sweep(refresh.expires_at), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn lookup_misses_unknown_token() {
        let store = store();
        assert!(store.lookup("not-a-token").is_none());
        // Revoking an unknown token is a no-op, not a panic.
        store.revoke("not-a-token");
    }
}
