//! Integration test common infrastructure.
//!
//! Spawns an in-process daemon (gateway + HTTP API + sweepers) on ephemeral
//! ports and provides a WebSocket test client.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use switchboard::config::{
    AuthConfig, Config, HttpConfig, KeepaliveConfig, OtpConfig, ServerConfig, WebSocketConfig,
};
use switchboard::directory::{Directory, MemoryDirectory};
use switchboard::network::Gateway;
use switchboard::state::AppState;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

/// How long a test waits for an expected frame before giving up.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// An in-process daemon instance.
pub struct TestServer {
    pub state: Arc<AppState>,
    pub directory: Arc<MemoryDirectory>,
    pub ws_addr: SocketAddr,
    pub http_addr: SocketAddr,
    shutdown: CancellationToken,
}

impl TestServer {
    /// Spawn the daemon on ephemeral ports.
    pub async fn spawn() -> anyhow::Result<Self> {
        let config = Config {
            server: ServerConfig {
                name: "test.switchboard".to_string(),
            },
            http: HttpConfig {
                address: "127.0.0.1:0".parse()?,
            },
            websocket: WebSocketConfig {
                address: "127.0.0.1:0".parse()?,
                allow_origins: Vec::new(),
            },
            auth: AuthConfig {
                secret: "integration-test-signing-secret".to_string(),
                ..AuthConfig::default()
            },
            otp: OtpConfig::default(),
            keepalive: KeepaliveConfig::default(),
        };

        let directory = Arc::new(MemoryDirectory::new());
        let collaborator: Arc<dyn Directory> = directory.clone();
        let state = AppState::new(config, collaborator);
        let shutdown = CancellationToken::new();

        state.spawn_sweepers(&shutdown);

        let http_listener = tokio::net::TcpListener::bind(state.config.http.address).await?;
        let http_addr = http_listener.local_addr()?;
        {
            let state = Arc::clone(&state);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                switchboard::http::serve(http_listener, state, shutdown).await;
            });
        }

        let gateway = Gateway::bind(
            &state.config.websocket,
            state.config.keepalive.clone(),
            Arc::clone(&state.registry),
            shutdown.clone(),
        )
        .await?;
        let ws_addr = gateway.local_addr()?;
        tokio::spawn(async move {
            let _ = gateway.run().await;
        });

        Ok(Self {
            state,
            directory,
            ws_addr,
            http_addr,
            shutdown,
        })
    }

    /// WebSocket upgrade URL for a target identity.
    pub fn ws_url(&self, user_id: &str) -> String {
        format!("ws://{}/ws/{}", self.ws_addr, user_id)
    }

    /// HTTP API URL for a path.
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.http_addr, path)
    }

    /// Create a user in the backing directory. Returns the user id.
    pub fn register_user(&self, email: &str, password: &str) -> String {
        self.directory
            .create_user(email, password)
            .expect("create user")
    }

    /// Issue an access token for a user, bypassing the HTTP login.
    pub fn access_token(&self, user_id: &str) -> String {
        self.state
            .sessions
            .issue_access(user_id)
            .expect("issue access token")
            .token
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A WebSocket test client.
pub struct TestClient {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    /// Connect with a bearer token in the Authorization header.
    pub async fn connect_with_token(url: &str, token: &str) -> Result<Self, WsError> {
        let mut request = url.into_client_request()?;
        request.headers_mut().insert(
            http::header::AUTHORIZATION,
            format!("Bearer {token}")
                .parse()
                .map_err(|_| WsError::ConnectionClosed)?,
        );
        let (socket, _) = connect_async(request).await?;
        Ok(Self { socket })
    }

    /// Connect with a one-time code in the query string.
    pub async fn connect_with_otp(url: &str, otp: &str) -> Result<Self, WsError> {
        let (socket, _) = connect_async(format!("{url}?otp={otp}")).await?;
        Ok(Self { socket })
    }

    /// Connect with no credential at all.
    pub async fn connect_bare(url: &str) -> Result<Self, WsError> {
        let (socket, _) = connect_async(url).await?;
        Ok(Self { socket })
    }

    /// Send a JSON value as a text frame.
    pub async fn send_json(&mut self, value: &serde_json::Value) -> Result<(), WsError> {
        self.socket
            .send(Message::Text(value.to_string()))
            .await
    }

    /// Send a raw text frame.
    pub async fn send_raw(&mut self, text: &str) -> Result<(), WsError> {
        self.socket.send(Message::Text(text.to_string())).await
    }

    /// Receive the next data frame as JSON, skipping control frames.
    pub async fn recv_json(&mut self) -> anyhow::Result<serde_json::Value> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.socket.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for frame"))?
                .ok_or_else(|| anyhow::anyhow!("connection closed"))??;
            match frame {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Binary(data) => return Ok(serde_json::from_slice(&data)?),
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => anyhow::bail!("connection closed"),
                Message::Frame(_) => continue,
            }
        }
    }

    /// Assert no data frame arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.socket.next()).await {
                Err(_) => return Ok(()),
                Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
                Ok(Some(Ok(frame))) => anyhow::bail!("unexpected frame: {frame:?}"),
                Ok(Some(Err(e))) => anyhow::bail!("socket error: {e}"),
                Ok(None) => anyhow::bail!("connection closed"),
            }
        }
    }

    /// Wait until the server closes the connection.
    pub async fn expect_close(&mut self) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            match tokio::time::timeout_at(deadline, self.socket.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for close"))?
            {
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => continue,
                Some(Err(_)) => return Ok(()),
            }
        }
    }
}

/// Assert that a connect attempt was rejected with the given HTTP status.
pub fn assert_rejected(result: Result<TestClient, WsError>, expected: u16) {
    match result {
        Err(WsError::Http(response)) => {
            assert_eq!(response.status().as_u16(), expected, "handshake status");
        }
        Err(other) => panic!("expected HTTP {expected} rejection, got error: {other:?}"),
        Ok(_) => panic!("expected HTTP {expected} rejection, but handshake succeeded"),
    }
}
