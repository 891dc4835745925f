//! Authoritative room state: connected users, the operation log and the canvas.
//!
//! ```text
//! RoomStore
//!   └── room_id ──┬── users       user_id → User (color, cursor)
//!                 ├── operations  append-only Operation log
//!                 └── canvasState paths | undoStack | redoStack
//! ```
//!
//! Pure in-memory data structure with no network awareness. A room exists
//! only while it has at least one user; it is created lazily on the first
//! join and discarded, with all of its strokes and history, when the last
//! user leaves.
//!
//! Undo and redo share `undoStack`: undo moves the requester's most recent
//! stroke from `paths` onto it, redo moves the requester's most recently
//! undone stroke back to the *end* of `paths`. `redoStack` is kept empty and
//! only exists for wire compatibility.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Connection identity assigned by the server.
pub type UserId = String;

/// Room name.
pub type RoomId = String;

// ───────────────────────────────────────────────────────────────────
// Geometry & strokes
// ───────────────────────────────────────────────────────────────────

/// A sample along a drawn path, in canvas coordinates.
///
/// Serialized as `{"x": .., "y": ..}`. Deserialization also accepts the
/// compact `[x, y]` pair form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "PointRepr")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::ORIGIN
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PointRepr {
    Pair([f64; 2]),
    Object { x: f64, y: f64 },
}

impl From<PointRepr> for Point {
    fn from(repr: PointRepr) -> Self {
        match repr {
            PointRepr::Pair([x, y]) => Point { x, y },
            PointRepr::Object { x, y } => Point { x, y },
        }
    }
}

/// Drawing tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Brush,
    /// Paints with the canvas background color.
    Eraser,
}

/// One completed drawn path. Immutable once accepted by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    pub path: Vec<Point>,
    pub color: String,
    pub size: f64,
    pub tool: Tool,
    pub user_id: UserId,
}

impl Stroke {
    /// Consecutive point pairs, in drawing order.
    pub fn segments(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        self.path.windows(2).map(|w| (w[0], w[1]))
    }

    /// Color the stroke is painted with on a canvas of the given background.
    pub fn paint_color<'a>(&'a self, background: &'a str) -> &'a str {
        match self.tool {
            Tool::Brush => &self.color,
            Tool::Eraser => background,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Users & operations
// ───────────────────────────────────────────────────────────────────

/// A connected participant. Exists only while connected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub color: String,
    #[serde(default)]
    pub cursor: Point,
}

impl User {
    pub fn new(id: impl Into<UserId>, color: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            color: color.into(),
            cursor: Point::ORIGIN,
        }
    }
}

/// Kind of accepted intent recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Draw,
    Undo,
    Redo,
    Clear,
}

/// Append-only log entry. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub user_id: UserId,
    /// Stroke drawn, undone or redone. `None` for clear and for
    /// intents that have not been applied yet.
    pub data: Option<Stroke>,
    /// Wall-clock milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Operation {
    /// Stamp a new operation with the current wall-clock time.
    pub fn new(kind: OperationKind, user_id: impl Into<UserId>, data: Option<Stroke>) -> Self {
        Self {
            kind,
            user_id: user_id.into(),
            data,
            timestamp: now_millis(),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ───────────────────────────────────────────────────────────────────
// Room
// ───────────────────────────────────────────────────────────────────

/// Canvas contents. `paths` is in server-acceptance order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasState {
    pub paths: Vec<Stroke>,
    pub undo_stack: Vec<Stroke>,
    /// Always empty; undo and redo share `undo_stack`.
    pub redo_stack: Vec<Stroke>,
}

/// An isolated collaborative session.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub users: HashMap<UserId, User>,
    pub operations: Vec<Operation>,
    pub canvas: CanvasState,
}

impl Room {
    pub fn new(id: impl Into<RoomId>) -> Self {
        Self {
            id: id.into(),
            users: HashMap::new(),
            operations: Vec::new(),
            canvas: CanvasState::default(),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// RoomStore
// ───────────────────────────────────────────────────────────────────

/// Owns every live room. Mutated only by the server session.
#[derive(Debug, Default)]
pub struct RoomStore {
    rooms: HashMap<RoomId, Room>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the room, allocating an empty one if absent.
    pub fn create_room(&mut self, room_id: &str) -> &mut Room {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Room::new(room_id))
    }

    /// Insert (or overwrite) a user with a cursor at the origin.
    pub fn join(&mut self, room_id: &str, user_id: &str, color: &str) -> &Room {
        let room = self.create_room(room_id);
        room.users
            .insert(user_id.to_string(), User::new(user_id, color));
        room
    }

    /// Remove a user. The room is deleted entirely once it is empty.
    pub fn leave(&mut self, room_id: &str, user_id: &str) -> Option<User> {
        let room = self.rooms.get_mut(room_id)?;
        let removed = room.users.remove(user_id);
        if room.users.is_empty() {
            self.rooms.remove(room_id);
            log::info!("Room {room_id} removed (empty)");
        }
        removed
    }

    /// Move a user's cursor. Returns false if the room or user is absent.
    pub fn update_cursor(&mut self, room_id: &str, user_id: &str, x: f64, y: f64) -> bool {
        match self
            .rooms
            .get_mut(room_id)
            .and_then(|room| room.users.get_mut(user_id))
        {
            Some(user) => {
                user.cursor = Point::new(x, y);
                true
            }
            None => false,
        }
    }

    /// Append to the log; draw operations also append their stroke to `paths`.
    pub fn append_operation(&mut self, room_id: &str, operation: Operation) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        if operation.kind == OperationKind::Draw {
            if let Some(stroke) = &operation.data {
                room.canvas.paths.push(stroke.clone());
            }
        }
        room.operations.push(operation);
        true
    }

    /// Move the most recent stroke authored by `user_id` from `paths`
    /// onto the undo stack.
    pub fn undo(&mut self, room_id: &str, user_id: &str) -> Option<Stroke> {
        let canvas = &mut self.rooms.get_mut(room_id)?.canvas;
        let index = canvas.paths.iter().rposition(|s| s.user_id == user_id)?;
        let stroke = canvas.paths.remove(index);
        canvas.undo_stack.push(stroke.clone());
        Some(stroke)
    }

    /// Move the most recently undone stroke authored by `user_id` back to
    /// the end of `paths` (not its original position).
    pub fn redo(&mut self, room_id: &str, user_id: &str) -> Option<Stroke> {
        let canvas = &mut self.rooms.get_mut(room_id)?.canvas;
        let index = canvas.undo_stack.iter().rposition(|s| s.user_id == user_id)?;
        let stroke = canvas.undo_stack.remove(index);
        canvas.paths.push(stroke.clone());
        Some(stroke)
    }

    /// Reset canvas state and operation log together.
    pub fn clear(&mut self, room_id: &str) -> bool {
        match self.rooms.get_mut(room_id) {
            Some(room) => {
                room.canvas = CanvasState::default();
                room.operations.clear();
                true
            }
            None => false,
        }
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn user(&self, room_id: &str, user_id: &str) -> Option<&User> {
        self.rooms.get(room_id)?.users.get(user_id)
    }

    /// Snapshot of the room's users; empty if the room does not exist.
    pub fn users(&self, room_id: &str) -> HashMap<UserId, User> {
        self.rooms
            .get(room_id)
            .map(|r| r.users.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the operation log.
    pub fn operations(&self, room_id: &str) -> Vec<Operation> {
        self.rooms
            .get(room_id)
            .map(|r| r.operations.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the canvas; empty if the room does not exist.
    pub fn canvas_state(&self, room_id: &str) -> CanvasState {
        self.rooms
            .get(room_id)
            .map(|r| r.canvas.clone())
            .unwrap_or_default()
    }

    /// Number of users currently in the room.
    pub fn population(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |r| r.users.len())
    }

    pub fn contains_room(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
