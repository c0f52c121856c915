//! Gateway - WebSocket listener that authorizes and upgrades connections.
//!
//! Credentials are checked inside the handshake callback, so a rejected
//! client gets an HTTP error status and no connection ever exists. The
//! target identity rides in the path (`/ws/{user_id}`); the credential is
//! either a bearer session token in the Authorization header or a one-time
//! handoff code in the `otp` query parameter.

use crate::config::{KeepaliveConfig, WebSocketConfig};
use crate::error::AuthError;
use crate::metrics;
use crate::network::registry::{ConnectionRegistry, Credential};
use crate::network::Connection;
use http::StatusCode;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// The Gateway accepts incoming TCP connections and runs the WebSocket
/// handshake with credential checks.
pub struct Gateway {
    listener: TcpListener,
    allow_origins: Vec<String>,
    keepalive: KeepaliveConfig,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
}

impl Gateway {
    /// Bind the gateway to its configured address.
    pub async fn bind(
        config: &WebSocketConfig,
        keepalive: KeepaliveConfig,
        registry: Arc<ConnectionRegistry>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.address).await?;
        info!(address = %config.address, "WebSocket listener bound");
        Ok(Self {
            listener,
            allow_origins: config.allow_origins.clone(),
            keepalive,
            registry,
            shutdown,
        })
    }

    /// Actual bound address (relevant when configured with port 0).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the accept loop until shutdown.
    #[instrument(skip(self), name = "gateway")]
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Gateway shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let registry = Arc::clone(&self.registry);
                        let allow_origins = self.allow_origins.clone();
                        let keepalive = self.keepalive.clone();
                        tokio::spawn(async move {
                            handshake(stream, addr, registry, allow_origins, keepalive).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                    }
                }
            }
        }
    }
}

/// Run one WebSocket handshake, spawning the connection pumps on success.
async fn handshake(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    allow_origins: Vec<String>,
    keepalive: KeepaliveConfig,
) {
    let mut authorized: Option<String> = None;

    let callback = |req: &http::Request<()>, response: http::Response<()>| {
        // Origin check first; an empty allow-list allows all origins.
        if !allow_origins.is_empty() {
            let origin = req
                .headers()
                .get("Origin")
                .and_then(|o| o.to_str().ok())
                .unwrap_or_default();
            if !allow_origins.iter().any(|a| a == origin || a == "*") {
                warn!(%addr, origin, "Origin rejected");
                return Err(reject(StatusCode::FORBIDDEN, "origin not allowed"));
            }
        }

        match authorize_request(req, &registry) {
            Ok(user_id) => {
                authorized = Some(user_id);
                Ok(response)
            }
            Err(e) => {
                warn!(%addr, code = e.error_code(), "Upgrade rejected");
                metrics::auth_failure();
                Err(reject(StatusCode::UNAUTHORIZED, "unauthorized"))
            }
        }
    };

    match accept_hdr_async(stream, callback).await {
        Ok(socket) => {
            let Some(user_id) = authorized else {
                // Cannot happen: the callback only passes after setting it.
                error!(%addr, "Handshake passed without an authorized identity");
                return;
            };
            info!(%addr, user_id = %user_id, "WebSocket connection established");
            Connection::new(user_id, addr, registry, socket, keepalive).spawn();
        }
        Err(e) => {
            warn!(%addr, error = %e, "WebSocket handshake failed");
        }
    }
}

/// Extract the target identity and credential from an upgrade request and
/// authorize them against the registry's stores.
fn authorize_request(
    req: &http::Request<()>,
    registry: &ConnectionRegistry,
) -> Result<String, AuthError> {
    let target_user = req
        .uri()
        .path()
        .strip_prefix("/ws/")
        .filter(|id| !id.is_empty())
        .ok_or(AuthError::MissingCredential)?;

    if let Some(token) = bearer_token(req) {
        return registry.authorize(target_user, Credential::Bearer(token));
    }
    if let Some(code) = query_param(req.uri().query(), "otp") {
        return registry.authorize(target_user, Credential::HandoffCode(code));
    }
    Err(AuthError::MissingCredential)
}

fn bearer_token(req: &http::Request<()>) -> Option<&str> {
    req.headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn query_param<'a>(query: Option<&'a str>, name: &str) -> Option<&'a str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn reject(status: StatusCode, body: &str) -> http::Response<Option<String>> {
    http::Response::builder()
        .status(status)
        .body(Some(body.to_string()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_param_extraction() {
        assert_eq!(query_param(Some("otp=ABC123"), "otp"), Some("ABC123"));
        assert_eq!(
            query_param(Some("foo=1&otp=XYZ999&bar=2"), "otp"),
            Some("XYZ999")
        );
        assert_eq!(query_param(Some("foo=1"), "otp"), None);
        assert_eq!(query_param(None, "otp"), None);
    }

    #[test]
    fn reject_builds_status_response() {
        let response = reject(StatusCode::UNAUTHORIZED, "unauthorized");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
