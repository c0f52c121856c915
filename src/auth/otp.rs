//! One-time codes: single-use, short-TTL credentials.
//!
//! Two instances run in the daemon: handoff codes (seconds, keyed by user
//! id) that authorize one WebSocket upgrade, and recovery codes (a minute,
//! keyed by email) for account recovery.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const CODE_LEN: usize = 6;
const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A single-use code bound to a key.
#[derive(Debug, Clone)]
pub struct OneTimeCode {
    /// Lookup key: an email address or a handoff correlation id.
    pub key: String,
    /// Fixed-length uppercase alphanumeric code.
    pub code: String,
    /// Hard expiry.
    pub expires_at: DateTime<Utc>,
}

/// In-memory one-time-code store.
///
/// At most one live code exists per key; issuing supersedes any prior code.
/// A code verifies successfully at most once: verification deletes the
/// entry under the same lock that checked it.
pub struct OtpStore {
    ttl: Duration,
    codes: Mutex<HashMap<String, OneTimeCode>>,
}

impl OtpStore {
    /// Create a store whose codes live for `ttl`.
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(60)),
            codes: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh code for a key, superseding any prior one.
    pub fn issue(&self, key: &str) -> OneTimeCode {
        let entry = OneTimeCode {
            key: key.to_string(),
            code: generate_code(),
            expires_at: Utc::now() + self.ttl,
        };
        self.codes.lock().insert(key.to_string(), entry.clone());
        entry
    }

    /// Verify a presented code for a key, consuming it on success.
    ///
    /// Matching is case-insensitive. Mismatch, unknown key, or an expired
    /// entry all fail with no side effect.
    pub fn verify(&self, code: &str, key: &str) -> bool {
        self.verify_at(code, key, Utc::now())
    }

    fn verify_at(&self, code: &str, key: &str, now: DateTime<Utc>) -> bool {
        let mut codes = self.codes.lock();

        let Some(entry) = codes.get(key) else {
            debug!(key, "One-time code not found");
            return false;
        };
        if entry.expires_at <= now {
            debug!(key, "One-time code expired");
            return false;
        }

        let presented = code.to_ascii_uppercase();
        let stored = entry.code.to_ascii_uppercase();
        if !bool::from(presented.as_bytes().ct_eq(stored.as_bytes())) {
            debug!(key, "One-time code mismatch");
            return false;
        }

        // Consume: check and delete happen under the same lock.
        codes.remove(key);
        true
    }

    /// Delete every unconsumed code at or past its expiry. Returns how many.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut codes = self.codes.lock();
        let before = codes.len();
        codes.retain(|_, entry| entry.expires_at > now);
        before - codes.len()
    }

    /// Number of live codes.
    pub fn len(&self) -> usize {
        self.codes.lock().len()
    }

    /// Whether the store holds no codes.
    pub fn is_empty(&self) -> bool {
        self.codes.lock().is_empty()
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
                            debug!(removed, "Expired one-time codes swept");
                        }
                    }
                }
            }
        })
    }
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
        .collect()
}
