//! Configuration loading and management.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server information.
    pub server: ServerConfig,
    /// HTTP API listen configuration.
    pub http: HttpConfig,
    /// WebSocket gateway configuration.
    pub websocket: WebSocketConfig,
    /// Session token configuration.
    #[serde(default)]
    pub auth: AuthConfig,
    /// One-time-code configuration.
    #[serde(default)]
    pub otp: OtpConfig,
    /// Connection keepalive configuration.
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name (e.g., "switchboard.straylight.net").
    pub name: String,
}

/// HTTP API listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Address to bind to (e.g., "0.0.0.0:8080").
    pub address: SocketAddr,
}

/// WebSocket gateway listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Address to bind to (e.g., "0.0.0.0:8081").
    pub address: SocketAddr,
    /// Allowed Origin header values. Empty allows all origins.
    #[serde(default)]
    pub allow_origins: Vec<String>,
}

/// Session token configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC signing secret for session tokens.
    #[serde(default = "default_secret")]
    pub secret: String,
    /// Access token lifetime in seconds.
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: u64,
    /// Refresh token lifetime in seconds. Must exceed the access lifetime.
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: u64,
    /// Expiry sweep cadence in milliseconds.
    #[serde(default = "default_session_sweep_ms")]
    pub sweep_interval_ms: u64,
}

/// One-time-code configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OtpConfig {
    /// Lifetime of connection-handoff codes in seconds.
    #[serde(default = "default_handoff_ttl")]
    pub handoff_ttl_secs: u64,
    /// Lifetime of account-recovery codes in seconds.
    #[serde(default = "default_recovery_ttl")]
    pub recovery_ttl_secs: u64,
    /// Expiry sweep cadence in milliseconds.
    #[serde(default = "default_otp_sweep_ms")]
    pub sweep_interval_ms: u64,
}

/// Connection keepalive configuration.
///
/// The ping probe interval is always derived as 9/10 of the read timeout so
/// that a healthy peer is probed at least once before its silence can trip
/// the read deadline. It is intentionally not configurable on its own.
#[derive(Debug, Clone, Deserialize)]
pub struct KeepaliveConfig {
    /// How long a connection may stay silent before the read side gives up.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

fn default_secret() -> String {
    "change-me".to_string()
}

fn default_access_ttl() -> u64 {
    30 * 60
}

fn default_refresh_ttl() -> u64 {
    24 * 60 * 60
}

fn default_session_sweep_ms() -> u64 {
    400
}

fn default_handoff_ttl() -> u64 {
    5
}

fn default_recovery_ttl() -> u64 {
    60
}

fn default_otp_sweep_ms() -> u64 {
    500
}

fn default_read_timeout() -> u64 {
    10
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
            access_ttl_secs: default_access_ttl(),
            refresh_ttl_secs: default_refresh_ttl(),
            sweep_interval_ms: default_session_sweep_ms(),
        }
    }
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            handoff_ttl_secs: default_handoff_ttl(),
            recovery_ttl_secs: default_recovery_ttl(),
            sweep_interval_ms: default_otp_sweep_ms(),
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_read_timeout(),
        }
    }
}

impl KeepaliveConfig {
    /// Read deadline for a silent connection.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Ping probe interval: 9/10 of the read timeout.
    pub fn ping_interval(&self) -> Duration {
        self.read_timeout() * 9 / 10
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.refresh_ttl_secs <= self.auth.access_ttl_secs {
            return Err(ConfigError::Invalid(
                "auth.refresh_ttl_secs must exceed auth.access_ttl_secs".into(),
            ));
        }
        if self.keepalive.read_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "keepalive.read_timeout_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Whether the signing secret is still the placeholder default.
    pub fn has_default_secret(&self) -> bool {
        self.auth.secret == default_secret() || self.auth.secret.len() < 16
    }
}
