//! Shared application state.
//!
//! Every store and the registry are constructed exactly once here and
//! passed by reference to the HTTP layer, the gateway, and the sweepers.
//! Nothing reaches the backing maps directly.

use crate::auth::{OtpStore, SessionStore};
use crate::config::Config;
use crate::directory::Directory;
use crate::network::ConnectionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The daemon's shared components.
pub struct AppState {
    pub config: Config,
    pub sessions: Arc<SessionStore>,
    pub handoff_codes: Arc<OtpStore>,
    pub recovery_codes: Arc<OtpStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub directory: Arc<dyn Directory>,
}

impl AppState {
    /// Wire up stores and registry from configuration.
    pub fn new(config: Config, directory: Arc<dyn Directory>) -> Arc<Self> {
        let sessions = Arc::new(SessionStore::new(&config.auth));
        let handoff_codes = Arc::new(OtpStore::new(Duration::from_secs(
            config.otp.handoff_ttl_secs,
        )));
        let recovery_codes = Arc::new(OtpStore::new(Duration::from_secs(
            config.otp.recovery_ttl_secs,
        )));
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::clone(&sessions),
            Arc::clone(&handoff_codes),
            Arc::clone(&directory),
        ));

        Arc::new(Self {
            config,
            sessions,
            handoff_codes,
            recovery_codes,
            registry,
            directory,
        })
    }

    /// Start the expiry sweeps for all three credential stores.
    pub fn spawn_sweepers(&self, shutdown: &CancellationToken) {
        let session_interval = Duration::from_millis(self.config.auth.sweep_interval_ms);
        let otp_interval = Duration::from_millis(self.config.otp.sweep_interval_ms);

        self.sessions
            .spawn_sweeper(session_interval, shutdown.clone());
        self.handoff_codes
            .spawn_sweeper(otp_interval, shutdown.clone());
        self.recovery_codes
            .spawn_sweeper(otp_interval, shutdown.clone());
    }
}
