//! Connection - the two pumps behind one live WebSocket.
//!
//! Each connection runs as two independent Tokio tasks:
//!
//! ```text
//!   read pump:  frame -> decode Event -> Registry::route_event
//!               (read deadline refreshed only by Pong replies)
//!   write pump: outbound queue | keepalive timer -> frame
//!               (first ready wins, no priority between them)
//! ```
//!
//! Either pump terminating cancels the shared token, which stops its twin;
//! both de-register on exit, guarded by the connection id so a late
//! cleanup never removes a successor connection.

use crate::config::KeepaliveConfig;
use crate::events::Event;
use crate::network::registry::{ConnectionRegistry, OUTBOUND_QUEUE_SIZE};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// An authorized, upgraded connection, ready to pump.
pub struct Connection {
    user_id: String,
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    socket: WebSocketStream<TcpStream>,
    keepalive: KeepaliveConfig,
}

impl Connection {
    /// Wrap an upgraded socket for a user.
    pub fn new(
        user_id: String,
        addr: SocketAddr,
        registry: Arc<ConnectionRegistry>,
        socket: WebSocketStream<TcpStream>,
        keepalive: KeepaliveConfig,
    ) -> Self {
        Self {
            user_id,
            addr,
            registry,
            socket,
            keepalive,
        }
    }

    /// Register with the registry and spawn the read and write pumps.
    pub fn spawn(self) {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Event>(OUTBOUND_QUEUE_SIZE);
        let shutdown = CancellationToken::new();
        let conn_id = self
            .registry
            .register(&self.user_id, outbound_tx, shutdown.clone());

        let (sink, stream) = self.socket.split();

        tokio::spawn(write_pump(
            sink,
            outbound_rx,
            self.user_id.clone(),
            conn_id,
            self.addr,
            Arc::clone(&self.registry),
            shutdown.clone(),
            self.keepalive.ping_interval(),
        ));
        tokio::spawn(read_pump(
            stream,
            self.user_id,
            conn_id,
            self.addr,
            self.registry,
            shutdown,
            self.keepalive.read_timeout(),
        ));
    }
}

/// Read pump: drives inbound frames into the event router.
///
/// Terminates on read deadline, I/O error, close frame, undecodable frame,
/// or eviction. Routing errors are logged and do NOT terminate - a bad
/// event is cheaper to drop than the connection.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(user_id = %user_id, conn_id, addr = %addr), name = "read_pump")]
async fn read_pump(
    mut stream: WsStream,
    user_id: String,
    conn_id: u64,
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    read_timeout: std::time::Duration,
) {
    let mut deadline = Instant::now() + read_timeout;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Read pump stopped by shutdown");
                break;
            }
            result = tokio::time::timeout_at(deadline, stream.next()) => match result {
                // Keepalive expired without a Pong: classified as network
                // failure, same as any other read error.
                Err(_) => {
                    warn!("Read deadline elapsed");
                    break;
                }
                Ok(None) => {
                    info!("Client disconnected");
                    break;
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "Read error");
                    break;
                }
                Ok(Some(Ok(frame))) => match frame {
                    Message::Pong(_) => {
                        // Only a liveness reply refreshes the deadline.
                        deadline = Instant::now() + read_timeout;
                    }
                    Message::Ping(_) => {
                        // tungstenite queues the Pong reply itself.
                    }
                    Message::Close(_) => {
                        info!("Close frame received");
                        break;
                    }
                    Message::Text(text) => {
                        if !handle_frame(text.as_bytes(), &user_id, &registry).await {
                            break;
                        }
                    }
                    Message::Binary(data) => {
                        if !handle_frame(&data, &user_id, &registry).await {
                            break;
                        }
                    }
                    Message::Frame(_) => {}
                },
            }
        }
    }

    shutdown.cancel();
    registry.remove(&user_id, conn_id);
}

/// Decode one frame and route it. Returns false when the connection must
/// terminate (framing can no longer be trusted).
async fn handle_frame(raw: &[u8], user_id: &str, registry: &ConnectionRegistry) -> bool {
    let event: Event = match serde_json::from_slice(raw) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Undecodable frame, closing connection");
            return false;
        }
    };

    if let Err(e) = registry.route_event(event, user_id).await {
        // Unsupported types, validation failures, and directory errors all
        // drop the event without surfacing anything to the sender.
        warn!(error = %e, code = e.error_code(), "Event dropped");
    }
    true
}

/// Write pump: drains the outbound queue and emits keepalive probes.
///
/// Sending a probe does not touch the read deadline - only the Pong coming
/// back on the read side does. Terminates on write error, queue closure,
/// or eviction (both of the latter emit a close frame first).
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(user_id = %user_id, conn_id, addr = %addr), name = "write_pump")]
async fn write_pump(
    mut sink: WsSink,
    mut outbound_rx: mpsc::Receiver<Event>,
    user_id: String,
    conn_id: u64,
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
    ping_interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                // Evicted or read side died: tell the peer and stop.
                let _ = sink.send(Message::Close(None)).await;
                debug!("Write pump stopped by shutdown");
                break;
            }
            maybe_event = outbound_rx.recv() => match maybe_event {
                Some(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Failed to serialize outbound event");
                            break;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!(error = %e, "Write error");
                        break;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    debug!("Outbound queue closed");
                    break;
                }
            },
            _ = ticker.tick() => {
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    info!(error = %e, "Keepalive probe failed");
                    break;
                }
            }
        }
    }

    shutdown.cancel();
    registry.remove(&user_id, conn_id);
}
