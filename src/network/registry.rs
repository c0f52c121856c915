//! Connection registry: the authoritative map from user identity to live
//! connection.
//!
//! Invariant: at most one live connection per identity. Registering a new
//! connection for an identity evicts the previous one (last-connection
//! wins). All map mutations happen under a single mutex that is never held
//! across blocking I/O; hand-off to a connection's outbound queue is
//! non-blocking.

use crate::auth::{OtpStore, SessionStore};
use crate::directory::Directory;
use crate::error::{AuthError, EventResult};
use crate::events::{Context, Event, Router};
use crate::metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outbound queue depth per connection. A slow consumer sheds load by
/// dropping events rather than blocking producers.
pub const OUTBOUND_QUEUE_SIZE: usize = 32;

/// A credential presented with an upgrade request.
#[derive(Debug, Clone, Copy)]
pub enum Credential<'a> {
    /// Bearer session token from the Authorization header.
    Bearer(&'a str),
    /// One-time handoff code from the query string.
    HandoffCode(&'a str),
}

/// Registry-side handle to a live connection.
struct ConnectionHandle {
    conn_id: u64,
    outbound: mpsc::Sender<Event>,
    shutdown: CancellationToken,
}

/// The identity -> connection map plus the collaborators needed to
/// authorize upgrades and dispatch events.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, ConnectionHandle>>,
    next_conn_id: AtomicU64,
    sessions: Arc<SessionStore>,
    handoff_codes: Arc<OtpStore>,
    router: Router,
    directory: Arc<dyn Directory>,
}

impl ConnectionRegistry {
    /// Create a registry wired to its credential stores and the
    /// persistence collaborator.
    pub fn new(
        sessions: Arc<SessionStore>,
        handoff_codes: Arc<OtpStore>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
            sessions,
            handoff_codes,
            router: Router::new(),
            directory,
        }
    }

    /// Authorize an upgrade request for `target_user`.
    ///
    /// A bearer token must validate two-phase AND name the target identity;
    /// a handoff code is consumed on its single successful verification.
    pub fn authorize(
        &self,
        target_user: &str,
        credential: Credential<'_>,
    ) -> Result<String, AuthError> {
        match credential {
            Credential::Bearer(token) => {
                let claims = self.sessions.validate(token)?;
                if claims.user_id != target_user {
                    return Err(AuthError::IdentityMismatch);
                }
                Ok(claims.user_id)
            }
            Credential::HandoffCode(code) => {
                if self.handoff_codes.verify(code, target_user) {
                    Ok(target_user.to_string())
                } else {
                    Err(AuthError::NotFound)
                }
            }
        }
    }

    /// Insert a connection for an identity, evicting any prior one.
    ///
    /// Returns the connection id the pumps must use to de-register.
    pub fn register(
        &self,
        user_id: &str,
        outbound: mpsc::Sender<Event>,
        shutdown: CancellationToken,
    ) -> u64 {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let evicted = self.connections.lock().insert(
            user_id.to_string(),
            ConnectionHandle {
                conn_id,
                outbound,
                shutdown,
            },
        );

        if let Some(prior) = evicted {
            // Last connection wins: the prior write pump sees the cancelled
            // token, sends a close frame, and tears itself down.
            info!(user_id, prior_conn = prior.conn_id, "Evicting prior connection");
            prior.shutdown.cancel();
        } else {
            metrics::connection_opened();
        }

        debug!(user_id, conn_id, "Connection registered");
        conn_id
    }

    /// Remove a connection, but only if `conn_id` still owns the entry.
    ///
    /// An evicted pump's late cleanup must never delete its successor.
    pub fn remove(&self, user_id: &str, conn_id: u64) {
        let mut connections = self.connections.lock();
        if connections
            .get(user_id)
            .is_some_and(|handle| handle.conn_id == conn_id)
        {
            connections.remove(user_id);
            metrics::connection_closed();
            debug!(user_id, conn_id, "Connection removed");
        }
    }

    /// Hand an event to a connected user's outbound queue.
    ///
    /// Best-effort, at-most-once: offline target, full queue, and
    /// already-exited pump are all silent no-ops.
    pub fn send(&self, user_id: &str, event: Event) {
        let sender = {
            let connections = self.connections.lock();
            match connections.get(user_id) {
                Some(handle) => handle.outbound.clone(),
                None => {
                    debug!(user_id, "Send to offline user dropped");
                    metrics::event_dropped();
                    return;
                }
            }
        };

        if let Err(e) = sender.try_send(event) {
            debug!(user_id, error = %e, "Outbound queue hand-off failed");
            metrics::event_dropped();
        }
    }

    /// Forcibly close and remove a user's connection. Idempotent.
    pub fn disconnect(&self, user_id: &str) {
        let removed = self.connections.lock().remove(user_id);
        if let Some(handle) = removed {
            info!(user_id, conn_id = handle.conn_id, "Connection disconnected");
            handle.shutdown.cancel();
            metrics::connection_closed();
        }
    }

    /// Dispatch an inbound event from an authenticated connection.
    ///
    /// The source identity is stamped over whatever the client supplied
    /// before the handler sees the event.
    pub async fn route_event(&self, mut event: Event, source_user: &str) -> EventResult {
        event.user_id = source_user.to_string();
        metrics::event_routed(&event.event_type);

        let ctx = Context {
            user_id: source_user,
            registry: self,
            directory: self.directory.as_ref(),
        };
        self.router.dispatch(&ctx, &event).await
    }

    /// Whether an identity currently has a live connection.
    pub fn is_connected(&self, user_id: &str) -> bool {
        self.connections.lock().contains_key(user_id)
    }

    /// Number of live connections.
    pub fn connected_count(&self) -> usize {
        self.connections.lock().len()
    }
}
