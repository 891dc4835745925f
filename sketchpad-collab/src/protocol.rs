//! JSON event protocol between drawing clients and the sync server.
//!
//! Every frame is one WebSocket text message:
//! ```text
//! { "event": "<name>", "data": <payload> }      // data omitted when empty
//! ```
//!
//! | direction | event         | payload                                        |
//! |-----------|---------------|------------------------------------------------|
//! | C → S     | `draw`        | `{path}` or `{fromX,fromY,toX,toY}` + `color,size,tool` |
//! | C → S     | `cursor`      | `{x, y}`                                       |
//! | C → S     | `undo`/`redo`/`clear` | (none)                                 |
//! | S → C     | `welcome`     | `{id, color}` (joining connection only)        |
//! | S → C     | `canvasState` | `{canvasState: {paths, undoStack, redoStack}, users}` |
//! | S → C     | `draw`        | raw draw payload + `userId`                    |
//! | S → C     | `cursor`      | `{userId, x, y, color}`                        |
//! | S → C     | `userJoined`  | `{id, color}`                                  |
//! | S → C     | `userLeft`    | raw user id string                             |
//! | S → C     | `clear`       | (none)                                         |
//! | S → C     | `error`       | `{reason}` (sender only)                       |

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::room::{CanvasState, Point, Tool, User, UserId};

/// A raw draw request as sent by a client.
///
/// Carries either an explicit `path` or a legacy two-point segment given
/// as four scalars. Both are optional on the wire so that a malformed
/// request still decodes and can be rejected with a reason.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawIntent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Point>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_y: Option<f64>,
    pub color: String,
    pub size: f64,
    #[serde(default)]
    pub tool: Tool,
}

impl DrawIntent {
    /// Draw request with an explicit point list.
    pub fn with_path(path: Vec<Point>, color: impl Into<String>, size: f64, tool: Tool) -> Self {
        Self {
            path: Some(path),
            color: color.into(),
            size,
            tool,
            ..Self::default()
        }
    }

    /// Legacy single-segment draw request.
    pub fn segment(from: Point, to: Point, color: impl Into<String>, size: f64, tool: Tool) -> Self {
        Self {
            from_x: Some(from.x),
            from_y: Some(from.y),
            to_x: Some(to.x),
            to_y: Some(to.y),
            color: color.into(),
            size,
            tool,
            ..Self::default()
        }
    }
}

/// Server relay of a draw intent to the other connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDraw {
    #[serde(flatten)]
    pub intent: DrawIntent,
    pub user_id: UserId,
}

/// Full room state used to (re)synchronize clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub canvas_state: CanvasState,
    pub users: HashMap<UserId, User>,
}

/// Cursor broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdate {
    pub user_id: UserId,
    pub x: f64,
    pub y: f64,
    pub color: String,
}

/// Identity and palette color of a participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: UserId,
    pub color: String,
}

/// Why the sender's last frame was refused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: String,
}

/// Client → server events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    Draw(DrawIntent),
    Cursor { x: f64, y: f64 },
    Undo,
    Redo,
    Clear,
}

/// Server → client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    Welcome(UserInfo),
    CanvasState(Snapshot),
    Draw(RemoteDraw),
    Cursor(CursorUpdate),
    UserJoined(UserInfo),
    UserLeft(UserId),
    Clear,
    Error(Rejection),
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }

    /// Wire name of the event, for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Draw(_) => "draw",
            Self::Cursor { .. } => "cursor",
            Self::Undo => "undo",
            Self::Redo => "redo",
            Self::Clear => "clear",
        }
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Connection closed")]
    ConnectionClosed,
}
