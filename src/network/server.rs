//! WebSocket Game Server
//!
//! Thin adaptor between WebSocket connections and the simulation session.
//! The first message on a connection must be `join`; after that text frames
//! are parsed and routed to the session, and a writer task drains the
//! player's outbound channel plus heartbeat echoes.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerConfig;
use crate::game::input::ClientCommand;
use crate::network::broadcast::Outbound;
use crate::network::protocol::{ClientMessage, Heartbeat, ServerMessage};
use crate::network::session::{SessionError, SessionHandle};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection limit reached.
    #[error("Connection limit reached")]
    ConnectionLimitReached,

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Decrements the live connection count when a connection task ends.
struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The game server.
pub struct GameServer {
    config: ServerConfig,
    session: SessionHandle,
    connections: Arc<AtomicUsize>,
    shutdown: watch::Receiver<bool>,
}

impl GameServer {
    /// Create a server routing to `session`. Stops accepting once `shutdown`
    /// flips to true.
    pub fn new(config: ServerConfig, session: SessionHandle, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            config,
            session,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown,
        }
    }

    /// Bind and serve.
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(version = %self.config.version, "Game server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if let Err(err) = self.admit(stream, addr) {
                                warn!(%addr, error = %err, "connection refused");
                            }
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Get active connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    fn admit(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), GameServerError> {
        let previous = self.connections.fetch_add(1, Ordering::AcqRel);
        let guard = ConnectionGuard(self.connections.clone());
        if previous >= self.config.max_connections {
            return Err(GameServerError::ConnectionLimitReached);
        }

        debug!(%addr, "New connection");
        let session = self.session.clone();
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(err) = handle_connection(stream, addr, session, config, shutdown).await {
                debug!(%addr, error = %err, "connection ended with error");
            }
        });
        Ok(())
    }
}

/// Next text frame, skipping control frames. `None` on close or error.
async fn next_text(source: &mut WsSource) -> Option<String> {
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

async fn reject(sink: &mut WsSink, reason: &str) -> Result<(), GameServerError> {
    let message = ServerMessage::JoinRejected { reason: reason.to_string() };
    match message.to_json() {
        Ok(text) => sink.send(Message::Text(text)).await?,
        Err(err) => error!(error = %err, "encode failed"),
    }
    sink.close().await?;
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    session: SessionHandle,
    config: ServerConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), GameServerError> {
    let ws_stream = accept_async(stream).await?;
    let (mut sink, mut source) = ws_stream.split();

    let catalog_hash = match timeout(config.join_timeout, next_text(&mut source)).await {
        Err(_) => return reject(&mut sink, "join timeout").await,
        Ok(None) => return Ok(()),
        Ok(Some(text)) => match ClientMessage::from_json(&text) {
            Ok(ClientMessage::Join { effect_catalog_hash }) => effect_catalog_hash,
            Ok(_) => return reject(&mut sink, "first message must be join").await,
            Err(err) => {
                let _ = session.report_dropped(err.drop_reason());
                return reject(&mut sink, &err.to_string()).await;
            }
        },
    };

    let player_id = uuid::Uuid::new_v4().to_string();
    let accepted = match session.join(&player_id, catalog_hash).await {
        Ok(accepted) => accepted,
        Err(err) => {
            reject(&mut sink, &err.to_string()).await?;
            return match err {
                SessionError::CatalogMismatch { .. } | SessionError::World(_) => Ok(()),
                other => Err(other.into()),
            };
        }
    };
    info!(%addr, player = %player_id, "player joined");

    // The join response must precede any queued state
    sink.send(Message::Text(accepted.response.to_string())).await?;
    let mut outbound = accepted.outbound;
    let (echo_tx, mut echo_rx) = mpsc::channel::<Outbound>(8);
    let mut writer = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                biased;
                message = outbound.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
                Some(message) = echo_rx.recv() => message,
            };
            if sink.send(Message::Text(message.text.to_string())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if !route(&session, &player_id, &echo_tx, &text) {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(%addr, error = %e, "read failed");
                    break;
                }
                Some(Ok(_)) => {}
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = &mut writer => break,
        }
    }

    // The session drops this player's sender on leave, which ends the writer
    let _ = session.leave(&player_id).await;
    drop(echo_tx);
    if !writer.is_finished() && timeout(config.join_timeout, &mut writer).await.is_err() {
        writer.abort();
    }
    info!(%addr, player = %player_id, "player left");
    Ok(())
}

/// Route one frame from a joined client. Returns false when the client leaves.
fn route(session: &SessionHandle, player_id: &str, echo: &mpsc::Sender<Outbound>, text: &str) -> bool {
    let message = match ClientMessage::from_json(text) {
        Ok(message) => message,
        Err(err) => {
            debug!(player = %player_id, error = %err, "dropped client message");
            let _ = session.report_dropped(err.drop_reason());
            return true;
        }
    };

    let result = match message {
        ClientMessage::Command(command) => {
            if let ClientCommand::Heartbeat { sent_at, rtt } = &command {
                echo_heartbeat(echo, *sent_at, *rtt);
            }
            session.command(player_id, command)
        }
        ClientMessage::KeyframeRequest { sequence } => session.keyframe_request(player_id, sequence),
        ClientMessage::Leave => return false,
        ClientMessage::Join { .. } => {
            debug!(player = %player_id, "ignoring repeated join");
            Ok(())
        }
    };
    if let Err(err) = result {
        warn!(player = %player_id, error = %err, "command not delivered");
    }
    true
}

fn echo_heartbeat(echo: &mpsc::Sender<Outbound>, sent_at: i64, rtt: Option<f64>) {
    let reply = ServerMessage::Heartbeat(Heartbeat {
        sent_at,
        server_time: Some(chrono::Utc::now().timestamp_millis()),
        client_time: Some(sent_at),
        rtt,
    });
    match Outbound::encode(&reply, 0) {
        Ok(encoded) => {
            if let Err(err) = echo.try_send(encoded) {
                debug!(error = %err, "heartbeat echo dropped");
            }
        }
        Err(err) => error!(error = %err, "encode failed"),
    }
}
