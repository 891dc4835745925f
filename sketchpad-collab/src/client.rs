//! WebSocket sync client for the shared canvas.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - A local mirror of users and strokes, refreshed from server events
//! - Outgoing intents: draw, cursor, undo, redo, clear
//! - A typed event channel the application drains and forwards to a `Renderer`
//!
//! Snapshots are authoritative: each one fully replaces the local path list.
//! Remote draw relays are applied ahead of the snapshot that follows them.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::drawing::stroke_from_intent;
use crate::gesture::Renderer;
use crate::protocol::{
    ClientMessage, CursorUpdate, DrawIntent, ProtocolError, ServerMessage, Snapshot, UserInfo,
};
use crate::room::{Point, Stroke, User, UserId};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// The server told us who we are
    Welcome(UserInfo),
    /// Authoritative canvas state and users; replace and redraw
    Snapshot(Snapshot),
    /// A stroke another user just finished
    RemoteDraw(Stroke),
    Cursor(CursorUpdate),
    UserJoined(UserInfo),
    UserLeft(UserId),
    /// Canvas wiped by someone
    Clear,
    /// Our last request was refused
    Rejected(String),
}

impl SyncEvent {
    /// Forward this event to a drawing surface.
    pub fn render<R: Renderer + ?Sized>(&self, renderer: &mut R) {
        match self {
            Self::Snapshot(snapshot) => {
                renderer.redraw(&snapshot.canvas_state.paths);
                for user in snapshot.users.values() {
                    renderer.show_cursor(&user.id, user.cursor, &user.color);
                }
            }
            Self::UserJoined(info) => renderer.show_cursor(&info.id, Point::ORIGIN, &info.color),
            Self::RemoteDraw(stroke) => renderer.draw_stroke(stroke),
            Self::Cursor(c) => renderer.show_cursor(&c.user_id, Point::new(c.x, c.y), &c.color),
            Self::UserLeft(id) => renderer.remove_cursor(id),
            Self::Clear => renderer.clear(),
            _ => {}
        }
    }
}

/// Local shadow of the room, fed by server messages.
#[derive(Debug, Clone, Default)]
pub struct CanvasMirror {
    own_id: Option<UserId>,
    users: HashMap<UserId, User>,
    paths: Vec<Stroke>,
}

impl CanvasMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one server message into the mirror and return the event the
    /// application should see, if any.
    pub fn apply(&mut self, msg: ServerMessage) -> Option<SyncEvent> {
        match msg {
            ServerMessage::Welcome(info) => {
                self.own_id = Some(info.id.clone());
                Some(SyncEvent::Welcome(info))
            }
            ServerMessage::CanvasState(snapshot) => {
                self.users = snapshot.users.clone();
                self.paths = snapshot.canvas_state.paths.clone();
                Some(SyncEvent::Snapshot(snapshot))
            }
            ServerMessage::Draw(remote) => match stroke_from_intent(&remote.intent, &remote.user_id) {
                Ok(stroke) => {
                    self.paths.push(stroke.clone());
                    Some(SyncEvent::RemoteDraw(stroke))
                }
                Err(e) => {
                    log::warn!("Ignoring remote draw from {}: {e}", remote.user_id);
                    None
                }
            },
            ServerMessage::Cursor(update) => {
                if let Some(user) = self.users.get_mut(&update.user_id) {
                    user.cursor = Point::new(update.x, update.y);
                }
                Some(SyncEvent::Cursor(update))
            }
            ServerMessage::UserJoined(info) => {
                self.users
                    .insert(info.id.clone(), User::new(info.id.clone(), info.color.clone()));
                Some(SyncEvent::UserJoined(info))
            }
            ServerMessage::UserLeft(id) => {
                self.users.remove(&id);
                Some(SyncEvent::UserLeft(id))
            }
            ServerMessage::Clear => {
                self.paths.clear();
                Some(SyncEvent::Clear)
            }
            ServerMessage::Error(rejection) => {
                log::warn!("Server rejected request: {}", rejection.reason);
                Some(SyncEvent::Rejected(rejection.reason))
            }
        }
    }

    pub fn own_id(&self) -> Option<&str> {
        self.own_id.as_deref()
    }

    pub fn users(&self) -> &HashMap<UserId, User> {
        &self.users
    }

    pub fn paths(&self) -> &[Stroke] {
        &self.paths
    }
}

/// The sync client.
///
/// Manages a WebSocket connection to the sync server, keeps a
/// `CanvasMirror` current and forwards user intents.
pub struct ClientSyncAgent {
    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Shadow of the room
    mirror: Arc<RwLock<CanvasMirror>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<SyncEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<SyncEvent>,

    /// Server URL
    server_url: String,
}

impl ClientSyncAgent {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            mirror: Arc::new(RwLock::new(CanvasMirror::new())),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward the outgoing channel to the socket
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        *self.state.write().await = ConnectionState::Connected;
        deliver(&self.event_tx, SyncEvent::Connected);
        log::info!("Connected to {}", self.server_url);

        // Reader task: fold server events into the mirror
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let mirror = self.mirror.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let server_msg = match ServerMessage::decode(text.as_str()) {
                            Ok(m) => m,
                            Err(e) => {
                                log::warn!("Failed to decode server message: {e}");
                                continue;
                            }
                        };
                        let event = mirror.write().await.apply(server_msg);
                        if let Some(evt) = event {
                            deliver(&event_tx, evt);
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            *state.write().await = ConnectionState::Disconnected;
            deliver(&event_tx, SyncEvent::Disconnected);
        });

        Ok(())
    }

    /// Close the connection. The reader task reports `Disconnected` once the
    /// server acknowledges.
    pub fn disconnect(&mut self) {
        self.outgoing_tx = None;
    }

    /// Send a completed stroke.
    pub async fn send_draw(&self, intent: DrawIntent) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Draw(intent)).await
    }

    pub async fn send_cursor(&self, x: f64, y: f64) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Cursor { x, y }).await
    }

    pub async fn send_undo(&self) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Undo).await
    }

    pub async fn send_redo(&self) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Redo).await
    }

    pub async fn send_clear(&self) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Clear).await
    }

    async fn send(&self, msg: ClientMessage) -> Result<(), ProtocolError> {
        let state = *self.state.read().await;
        let Some(tx) = self.outgoing_tx.as_ref().filter(|_| state == ConnectionState::Connected) else {
            // Silently drop while offline
            log::debug!("Not connected, dropping {}", msg.event_name());
            return Ok(());
        };
        let encoded = msg.encode()?;
        tx.send(encoded)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Our id, once the server has sent `welcome`.
    pub async fn user_id(&self) -> Option<UserId> {
        self.mirror.read().await.own_id().map(str::to_string)
    }

    pub async fn users(&self) -> HashMap<UserId, User> {
        self.mirror.read().await.users().clone()
    }

    pub async fn paths(&self) -> Vec<Stroke> {
        self.mirror.read().await.paths().to_vec()
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

/// Hand an event to the application without waiting on it.
///
/// A full or abandoned channel drops the event; the mirror is already
/// updated, so the socket keeps being read.
fn deliver(event_tx: &mpsc::Sender<SyncEvent>, event: SyncEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            log::warn!("Event channel full, dropping event");
        }
        Err(TrySendError::Closed(_)) => {
            log::debug!("Event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::RecordingRenderer;
    use crate::protocol::{Rejection, RemoteDraw};
    use crate::room::{CanvasState, Tool};

    fn stroke(user: &str, x: f64) -> Stroke {
        Stroke {
            path: vec![Point::new(x, 0.0), Point::new(x, 10.0)],
            color: "#000000".into(),
            size: 5.0,
            tool: Tool::Brush,
            user_id: user.into(),
        }
    }

    fn snapshot(paths: Vec<Stroke>, users: &[&str]) -> ServerMessage {
        ServerMessage::CanvasState(Snapshot {
            canvas_state: CanvasState {
                paths,
                ..CanvasState::default()
            },
            users: users
                .iter()
                .map(|u| (u.to_string(), User::new(*u, "#FF6B6B")))
                .collect(),
        })
    }

    #[test]
    fn test_welcome_sets_identity() {
        let mut mirror = CanvasMirror::new();
        assert!(mirror.own_id().is_none());
        let info = UserInfo { id: "me".into(), color: "#4ECDC4".into() };
        assert_eq!(mirror.apply(ServerMessage::Welcome(info.clone())), Some(SyncEvent::Welcome(info)));
        assert_eq!(mirror.own_id(), Some("me"));
    }

    #[test]
    fn test_snapshot_replaces_paths_and_users() {
        let mut mirror = CanvasMirror::new();
        mirror.apply(snapshot(vec![stroke("a", 1.0), stroke("b", 2.0)], &["a", "b"]));
        assert_eq!(mirror.paths().len(), 2);

        mirror.apply(snapshot(vec![stroke("b", 2.0)], &["b"]));
        assert_eq!(mirror.paths(), &[stroke("b", 2.0)]);
        assert_eq!(mirror.users().len(), 1);
    }

    #[test]
    fn test_remote_draw_appends_before_snapshot() {
        let mut mirror = CanvasMirror::new();
        let intent = DrawIntent::segment(
            Point::new(1.0, 2.0),
            Point::new(3.0, 4.0),
            "#000000",
            5.0,
            Tool::Brush,
        );
        let event = mirror.apply(ServerMessage::Draw(RemoteDraw { intent, user_id: "b".into() }));

        let Some(SyncEvent::RemoteDraw(stroke)) = event else {
            panic!("expected remote draw, got {event:?}");
        };
        assert_eq!(stroke.path, vec![Point::new(1.0, 2.0), Point::new(3.0, 4.0)]);
        assert_eq!(stroke.user_id, "b");
        assert_eq!(mirror.paths().len(), 1);
    }

    #[test]
    fn test_malformed_remote_draw_ignored() {
        let mut mirror = CanvasMirror::new();
        let event = mirror.apply(ServerMessage::Draw(RemoteDraw {
            intent: DrawIntent::default(),
            user_id: "b".into(),
        }));
        assert!(event.is_none());
        assert!(mirror.paths().is_empty());
    }

    #[test]
    fn test_presence_tracking() {
        let mut mirror = CanvasMirror::new();
        mirror.apply(ServerMessage::UserJoined(UserInfo { id: "a".into(), color: "#FF6B6B".into() }));
        mirror.apply(ServerMessage::Cursor(CursorUpdate {
            user_id: "a".into(),
            x: 7.0,
            y: 8.0,
            color: "#FF6B6B".into(),
        }));
        assert_eq!(mirror.users()["a"].cursor, Point::new(7.0, 8.0));

        assert_eq!(mirror.apply(ServerMessage::UserLeft("a".into())), Some(SyncEvent::UserLeft("a".into())));
        assert!(mirror.users().is_empty());
    }

    #[test]
    fn test_clear_and_rejection() {
        let mut mirror = CanvasMirror::new();
        mirror.apply(snapshot(vec![stroke("a", 1.0)], &["a"]));
        assert_eq!(mirror.apply(ServerMessage::Clear), Some(SyncEvent::Clear));
        assert!(mirror.paths().is_empty());

        let event = mirror.apply(ServerMessage::Error(Rejection { reason: "bad".into() }));
        assert_eq!(event, Some(SyncEvent::Rejected("bad".into())));
    }

    #[test]
    fn test_events_drive_renderer() {
        let mut renderer = RecordingRenderer::default();

        SyncEvent::RemoteDraw(stroke("a", 1.0)).render(&mut renderer);
        let mut b = User::new("b", "#4ECDC4");
        b.cursor = Point::new(3.0, 4.0);
        SyncEvent::Snapshot(Snapshot {
            canvas_state: CanvasState {
                paths: vec![stroke("a", 1.0), stroke("b", 2.0)],
                ..CanvasState::default()
            },
            users: HashMap::from([("b".to_string(), b)]),
        })
        .render(&mut renderer);
        // Snapshot redraws from scratch and replays cursors
        assert_eq!(renderer.strokes.len(), 2);
        assert_eq!(renderer.cursors["b"], Point::new(3.0, 4.0));

        SyncEvent::UserJoined(UserInfo { id: "c".into(), color: "#45B7D1".into() })
            .render(&mut renderer);
        assert_eq!(renderer.cursors["c"], Point::ORIGIN);
        SyncEvent::UserLeft("c".into()).render(&mut renderer);

        SyncEvent::Cursor(CursorUpdate {
            user_id: "b".into(),
            x: 1.0,
            y: 1.0,
            color: "#4ECDC4".into(),
        })
        .render(&mut renderer);
        assert!(renderer.cursors.contains_key("b"));
        SyncEvent::UserLeft("b".into()).render(&mut renderer);
        assert!(renderer.cursors.is_empty());

        SyncEvent::Clear.render(&mut renderer);
        assert!(renderer.strokes.is_empty());
    }

    #[test]
    fn test_deliver_never_blocks_on_full_channel() {
        let (tx, mut rx) = mpsc::channel(1);
        deliver(&tx, SyncEvent::Connected);
        deliver(&tx, SyncEvent::Clear);
        assert_eq!(rx.try_recv().unwrap(), SyncEvent::Connected);
        assert!(rx.try_recv().is_err());

        drop(rx);
        deliver(&tx, SyncEvent::Disconnected);
    }

    #[test]
    fn test_client_creation() {
        let client = ClientSyncAgent::new("ws://localhost:4000");
        assert_eq!(client.server_url(), "ws://localhost:4000");
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = ClientSyncAgent::new("ws://localhost:4000");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert!(client.user_id().await.is_none());
        assert!(client.paths().await.is_empty());
    }

    #[tokio::test]
    async fn test_sends_offline_are_dropped() {
        let client = ClientSyncAgent::new("ws://localhost:4000");
        client.send_cursor(1.0, 2.0).await.unwrap();
        client.send_undo().await.unwrap();
        client.send_clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_failure_resets_state() {
        let mut client = ClientSyncAgent::new("ws://127.0.0.1:1");
        assert_eq!(client.connect().await, Err(ProtocolError::ConnectionClosed));
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_take_event_rx() {
        let mut client = ClientSyncAgent::new("ws://localhost:4000");
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }
}
