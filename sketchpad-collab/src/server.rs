//! WebSocket sync server for the shared canvas.
//!
//! Architecture:
//! ```text
//! Client A ── conn task ──┐                       ┌──▸ outbound A
//!                         ├─▸ mpsc ─▸ Session ────┼──▸ outbound B
//! Client B ── conn task ──┘   (one    │           └──▸ outbound C
//!                              queue) ├── RoomStore
//!                                     └── DrawingStateProcessor
//! ```
//!
//! Connection tasks only decode frames and forward them. Every room
//! mutation and every broadcast happens inside the single `Session` task,
//! one command at a time, so the order in which commands leave the queue
//! is the order operations are applied and observed.
//!
//! Broadcast policy per event:
//! - join: `welcome` + `canvasState` to the joiner, then `userJoined` to all.
//! - draw: raw `draw` relay to everyone but the sender (low latency), then a
//!   full `canvasState` to everyone including the sender. The snapshot is
//!   the only recovery path for a lost relay; both must always be sent.
//! - cursor: `cursor` to all, sender included.
//! - undo/redo: `canvasState` to all, or nothing when there was nothing to do.
//! - clear: bare `clear` to all.
//! - leave: `userLeft` to the remaining connections.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{AtomicBroadcastStats, BroadcastGroup, BroadcastStats, Outbound};
use crate::drawing::{DrawingStateProcessor, OperationValidator};
use crate::protocol::{
    ClientMessage, CursorUpdate, DrawIntent, ProtocolError, Rejection, RemoteDraw, ServerMessage,
    Snapshot, UserInfo,
};
use crate::room::{RoomId, RoomStore, UserId};

pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_ROOM: &str = "main-room";

/// Interface override. Namespaced so a shell's own `HOST` is never picked up.
pub const HOST_ENV: &str = "SKETCHPAD_HOST";
pub const PORT_ENV: &str = "PORT";

/// Colors handed out to joining users, by room population modulo 8.
pub const PALETTE: [&str; 8] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7", "#DDA0DD", "#98D8C8", "#F7DC6F",
];

/// Palette color for a room that currently holds `population` users.
///
/// Colors repeat once a room exceeds eight users.
pub fn palette_color(population: usize) -> &'static str {
    PALETTE[population % PALETTE.len()]
}

// ───────────────────────────────────────────────────────────────────
// Configuration & errors
// ───────────────────────────────────────────────────────────────────

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// The single room every connection joins
    pub room_id: RoomId,
    /// Frames buffered per connection before drops
    pub outbound_capacity: usize,
    /// Commands buffered in front of the session
    pub command_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("{DEFAULT_HOST}:{DEFAULT_PORT}"),
            room_id: DEFAULT_ROOM.to_string(),
            outbound_capacity: 256,
            command_capacity: 1024,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `SKETCHPAD_HOST` and `PORT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(
            std::env::var(HOST_ENV).ok(),
            std::env::var(PORT_ENV).ok(),
        )
    }

    pub fn from_vars(host: Option<String>, port: Option<String>) -> Result<Self, ConfigError> {
        let port = match port {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(raw))?,
            None => DEFAULT_PORT,
        };
        let host = host.unwrap_or_else(|| DEFAULT_HOST.to_string());
        Ok(Self {
            bind_addr: format!("{host}:{port}"),
            ..Self::default()
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid PORT value {0:?}")]
    InvalidPort(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("session task stopped")]
    SessionClosed,
}

// ───────────────────────────────────────────────────────────────────
// Statistics
// ───────────────────────────────────────────────────────────────────

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub broadcast: BroadcastStats,
}

/// Lock-free counters shared by connection tasks and the session.
#[derive(Debug, Default)]
pub struct ServerCounters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_messages: AtomicU64,
    broadcast: Arc<AtomicBroadcastStats>,
}

impl ServerCounters {
    pub fn snapshot(&self) -> ServerStats {
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_messages: self.total_messages.load(Ordering::Relaxed),
            broadcast: self.broadcast.snapshot(),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Session: the serialized event handler
// ───────────────────────────────────────────────────────────────────

/// Work item for the session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// A connection completed its handshake.
    Join {
        user_id: UserId,
        outbound: mpsc::Sender<Outbound>,
    },
    /// A decoded client event.
    Inbound {
        user_id: UserId,
        message: ClientMessage,
    },
    /// A frame from `user_id` could not be decoded.
    Reject { user_id: UserId, reason: String },
    /// The connection is gone.
    Leave { user_id: UserId },
}

/// Owns the room state and the peer set; handles one command at a time.
pub struct Session {
    room_id: RoomId,
    store: RoomStore,
    processor: DrawingStateProcessor,
    peers: BroadcastGroup,
}

impl Session {
    pub fn new(
        room_id: impl Into<RoomId>,
        processor: DrawingStateProcessor,
        peers: BroadcastGroup,
    ) -> Self {
        Self {
            room_id: room_id.into(),
            store: RoomStore::new(),
            processor,
            peers,
        }
    }

    /// Drain the command queue until every sender is gone.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        log::info!("Session for room {} stopped", self.room_id);
    }

    /// Apply one command to completion, including its broadcasts.
    pub fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Join { user_id, outbound } => self.join(user_id, outbound),
            SessionCommand::Inbound { user_id, message } => {
                log::debug!("{} from {user_id}", message.event_name());
                match message {
                    ClientMessage::Draw(intent) => self.draw(&user_id, intent),
                    ClientMessage::Cursor { x, y } => self.cursor(&user_id, x, y),
                    ClientMessage::Undo => self.history(&user_id, true),
                    ClientMessage::Redo => self.history(&user_id, false),
                    ClientMessage::Clear => self.clear(&user_id),
                }
            }
            SessionCommand::Reject { user_id, reason } => self.reject(&user_id, reason),
            SessionCommand::Leave { user_id } => self.leave(&user_id),
        }
    }

    fn join(&mut self, user_id: UserId, outbound: mpsc::Sender<Outbound>) {
        let color = palette_color(self.store.population(&self.room_id));
        self.store.join(&self.room_id, &user_id, color);
        self.peers.attach(&user_id, outbound);

        self.reply(&user_id, &ServerMessage::Welcome(UserInfo {
            id: user_id.clone(),
            color: color.to_string(),
        }));
        self.reply(&user_id, &ServerMessage::CanvasState(self.snapshot()));
        self.emit(
            &ServerMessage::UserJoined(UserInfo {
                id: user_id.clone(),
                color: color.to_string(),
            }),
            None,
        );

        log::info!(
            "User {user_id} joined room {} with color {color} ({} present)",
            self.room_id,
            self.store.population(&self.room_id)
        );
    }

    fn draw(&mut self, user_id: &str, intent: DrawIntent) {
        match self
            .processor
            .process_draw(&mut self.store, &self.room_id, user_id, &intent)
        {
            Ok(_) => {
                // Partial echo first, then the snapshot that makes it convergent.
                self.emit(
                    &ServerMessage::Draw(RemoteDraw {
                        intent,
                        user_id: user_id.to_string(),
                    }),
                    Some(user_id),
                );
                self.emit_snapshot();
            }
            Err(e) => {
                log::warn!("Rejected draw from {user_id}: {e}");
                self.reject(user_id, e.to_string());
            }
        }
    }

    fn cursor(&mut self, user_id: &str, x: f64, y: f64) {
        if !self.store.update_cursor(&self.room_id, user_id, x, y) {
            return;
        }
        let Some(color) = self.store.user(&self.room_id, user_id).map(|u| u.color.clone()) else {
            return;
        };
        self.emit(
            &ServerMessage::Cursor(CursorUpdate {
                user_id: user_id.to_string(),
                x,
                y,
                color,
            }),
            None,
        );
    }

    fn history(&mut self, user_id: &str, undo: bool) {
        let result = if undo {
            self.processor.process_undo(&mut self.store, &self.room_id, user_id)
        } else {
            self.processor.process_redo(&mut self.store, &self.room_id, user_id)
        };
        let verb = if undo { "Undo" } else { "Redo" };

        match result {
            Ok(Some(_)) => {
                log::info!("{verb} performed by {user_id}");
                self.emit_snapshot();
            }
            Ok(None) => log::debug!("{verb} by {user_id}: nothing to do"),
            Err(e) => {
                log::warn!("{verb} by {user_id} rejected: {e}");
                self.reject(user_id, e.to_string());
            }
        }
    }

    fn clear(&mut self, user_id: &str) {
        match self
            .processor
            .process_clear(&mut self.store, &self.room_id, user_id)
        {
            Ok(_) => {
                log::info!("Canvas cleared by {user_id}");
                self.emit(&ServerMessage::Clear, None);
            }
            Err(e) => {
                log::warn!("Clear by {user_id} rejected: {e}");
                self.reject(user_id, e.to_string());
            }
        }
    }

    fn leave(&mut self, user_id: &str) {
        self.store.leave(&self.room_id, user_id);
        if self.peers.remove_peer(user_id) {
            self.emit(&ServerMessage::UserLeft(user_id.to_string()), None);
            log::info!("User {user_id} left room {}", self.room_id);
        }
    }

    fn reject(&self, user_id: &str, reason: String) {
        self.reply(user_id, &ServerMessage::Error(Rejection { reason }));
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            canvas_state: self.store.canvas_state(&self.room_id),
            users: self.store.users(&self.room_id),
        }
    }

    fn emit_snapshot(&self) {
        self.emit(&ServerMessage::CanvasState(self.snapshot()), None);
    }

    fn emit(&self, msg: &ServerMessage, exclude: Option<&str>) {
        if let Err(e) = self.peers.broadcast(msg, exclude) {
            log::error!("Failed to encode broadcast: {e}");
        }
    }

    fn reply(&self, user_id: &str, msg: &ServerMessage) {
        if let Err(e) = self.peers.send_to(user_id, msg) {
            log::error!("Failed to encode reply to {user_id}: {e}");
        }
    }

    pub fn store(&self) -> &RoomStore {
        &self.store
    }

    pub fn peers(&self) -> &BroadcastGroup {
        &self.peers
    }
}

// ───────────────────────────────────────────────────────────────────
// SyncServer
// ───────────────────────────────────────────────────────────────────

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    processor: DrawingStateProcessor,
    counters: Arc<ServerCounters>,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            processor: DrawingStateProcessor::new(),
            counters: Arc::new(ServerCounters::default()),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Replace the always-accept validator.
    pub fn with_validator(mut self, validator: impl OperationValidator + 'static) -> Self {
        self.processor = DrawingStateProcessor::with_validator(validator);
        self
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        log::info!("Sync server listening on {}", listener.local_addr()?);

        let peers = BroadcastGroup::with_stats(
            self.config.outbound_capacity,
            self.counters.broadcast.clone(),
        );
        let session = Session::new(self.config.room_id.clone(), self.processor, peers);
        let (commands, rx) = mpsc::channel(self.config.command_capacity.max(1));
        tokio::spawn(session.run(rx));

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let commands = commands.clone();
            let counters = self.counters.clone();
            let capacity = self.config.outbound_capacity.max(1);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, commands, capacity, counters).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Shared counters; stay readable after `run` consumes the server.
    pub fn counters(&self) -> Arc<ServerCounters> {
        self.counters.clone()
    }

    pub fn stats(&self) -> ServerStats {
        self.counters.snapshot()
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    commands: mpsc::Sender<SessionCommand>,
    capacity: usize,
    counters: Arc<ServerCounters>,
) -> Result<(), ServerError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let user_id = Uuid::new_v4().to_string();
    let (outbound, mut outbound_rx) = mpsc::channel::<Outbound>(capacity);

    counters.total_connections.fetch_add(1, Ordering::Relaxed);
    counters.active_connections.fetch_add(1, Ordering::Relaxed);
    log::info!("User connected: {user_id} ({addr})");

    let joined = commands
        .send(SessionCommand::Join {
            user_id: user_id.clone(),
            outbound,
        })
        .await;

    let result = if joined.is_err() {
        Err(ServerError::SessionClosed)
    } else {
        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            counters.total_messages.fetch_add(1, Ordering::Relaxed);
                            let command = match ClientMessage::decode(text.as_str()) {
                                Ok(message) => SessionCommand::Inbound {
                                    user_id: user_id.clone(),
                                    message,
                                },
                                Err(e) => {
                                    log::warn!("Failed to decode message from {user_id}: {e}");
                                    SessionCommand::Reject {
                                        user_id: user_id.clone(),
                                        reason: e.to_string(),
                                    }
                                }
                            };
                            if commands.send(command).await.is_err() {
                                break Err(ServerError::SessionClosed);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                                break Err(e.into());
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Err(e.into()),
                    }
                }

                frame = outbound_rx.recv() => {
                    match frame {
                        Some(text) => {
                            if let Err(e) = ws_sender.send(Message::Text(text.to_string().into())).await {
                                break Err(e.into());
                            }
                        }
                        None => break Ok(()),
                    }
                }
            }
        }
    };

    // Always release the slot, whatever ended the connection.
    let _ = commands
        .send(SessionCommand::Leave {
            user_id: user_id.clone(),
        })
        .await;
    counters.active_connections.fetch_sub(1, Ordering::Relaxed);
    log::info!("User disconnected: {user_id}");

    result
}
