//! Domain logic turning raw client intents into canonical operations.
//!
//! ```text
//! DrawIntent ──normalize──▸ Stroke ──validate──▸ Operation ──▸ RoomStore
//! undo / redo ──validate──▸ RoomStore::undo/redo ──▸ Option<Operation>
//! ```
//!
//! The processor holds no room state of its own; callers pass the
//! `RoomStore` they own.

use std::collections::HashMap;

use crate::protocol::DrawIntent;
use crate::room::{CanvasState, Operation, OperationKind, Point, Room, RoomStore, Stroke, User, UserId};

/// Why an intent was not admitted into the log.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OperationError {
    #[error("draw requires a path or a complete fromX/fromY/toX/toY segment")]
    MissingGeometry,
    #[error("draw path is empty")]
    EmptyPath,
    #[error("room not found: {0}")]
    UnknownRoom(String),
    #[error("operation rejected: {0}")]
    Rejected(String),
}

/// Hook consulted before any operation mutates a room.
///
/// `room` is `None` when the room does not exist yet. Undo and redo are
/// validated as intents, before the affected stroke is known, so their
/// `data` is always `None` here.
pub trait OperationValidator: Send + Sync {
    fn validate(&self, room: Option<&Room>, operation: &Operation) -> Result<(), String>;
}

/// Admits every operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl OperationValidator for AcceptAll {
    fn validate(&self, _room: Option<&Room>, _operation: &Operation) -> Result<(), String> {
        Ok(())
    }
}

/// Canonical point list of a draw intent.
///
/// An explicit `path` wins over the legacy four-scalar segment.
pub fn normalize_path(intent: &DrawIntent) -> Result<Vec<Point>, OperationError> {
    if let Some(path) = &intent.path {
        if path.is_empty() {
            return Err(OperationError::EmptyPath);
        }
        return Ok(path.clone());
    }
    match (intent.from_x, intent.from_y, intent.to_x, intent.to_y) {
        (Some(fx), Some(fy), Some(tx), Some(ty)) => Ok(vec![Point::new(fx, fy), Point::new(tx, ty)]),
        _ => Err(OperationError::MissingGeometry),
    }
}

/// Build the immutable stroke a draw intent describes.
pub fn stroke_from_intent(intent: &DrawIntent, user_id: &str) -> Result<Stroke, OperationError> {
    Ok(Stroke {
        path: normalize_path(intent)?,
        color: intent.color.clone(),
        size: intent.size,
        tool: intent.tool,
        user_id: user_id.to_string(),
    })
}

/// State handed to a newly joined user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewUserState {
    pub canvas_state: CanvasState,
    pub operations: Vec<Operation>,
    pub users: HashMap<UserId, User>,
}

/// Turns draw/undo/redo/clear intents into operations applied to a store.
pub struct DrawingStateProcessor {
    validator: Box<dyn OperationValidator>,
}

impl Default for DrawingStateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DrawingStateProcessor {
    /// Processor that admits every well-formed operation.
    pub fn new() -> Self {
        Self::with_validator(AcceptAll)
    }

    pub fn with_validator(validator: impl OperationValidator + 'static) -> Self {
        Self {
            validator: Box::new(validator),
        }
    }

    /// Run the validator against the current state of `room_id`.
    pub fn validate_operation(
        &self,
        store: &RoomStore,
        room_id: &str,
        operation: &Operation,
    ) -> Result<(), OperationError> {
        self.validator
            .validate(store.room(room_id), operation)
            .map_err(OperationError::Rejected)
    }

    /// Normalize, validate and append a draw operation.
    pub fn process_draw(
        &self,
        store: &mut RoomStore,
        room_id: &str,
        user_id: &str,
        intent: &DrawIntent,
    ) -> Result<Operation, OperationError> {
        let stroke = stroke_from_intent(intent, user_id)?;
        let operation = Operation::new(OperationKind::Draw, user_id, Some(stroke));
        self.validate_operation(store, room_id, &operation)?;

        if !store.append_operation(room_id, operation.clone()) {
            return Err(OperationError::UnknownRoom(room_id.to_string()));
        }
        Ok(operation)
    }

    /// Undo the requester's most recent stroke. `Ok(None)` means there was
    /// nothing to undo and nothing should be broadcast.
    pub fn process_undo(
        &self,
        store: &mut RoomStore,
        room_id: &str,
        user_id: &str,
    ) -> Result<Option<Operation>, OperationError> {
        self.apply_history(store, room_id, user_id, OperationKind::Undo)
    }

    /// Redo the requester's most recently undone stroke. `Ok(None)` means
    /// there was nothing to redo.
    pub fn process_redo(
        &self,
        store: &mut RoomStore,
        room_id: &str,
        user_id: &str,
    ) -> Result<Option<Operation>, OperationError> {
        self.apply_history(store, room_id, user_id, OperationKind::Redo)
    }

    fn apply_history(
        &self,
        store: &mut RoomStore,
        room_id: &str,
        user_id: &str,
        kind: OperationKind,
    ) -> Result<Option<Operation>, OperationError> {
        let intent = Operation::new(kind, user_id, None);
        self.validate_operation(store, room_id, &intent)?;

        let stroke = match kind {
            OperationKind::Undo => store.undo(room_id, user_id),
            _ => store.redo(room_id, user_id),
        };
        let Some(stroke) = stroke else {
            return Ok(None);
        };

        let operation = Operation::new(kind, user_id, Some(stroke));
        store.append_operation(room_id, operation.clone());
        Ok(Some(operation))
    }

    /// Wipe canvas and log. The returned operation is not itself logged.
    pub fn process_clear(
        &self,
        store: &mut RoomStore,
        room_id: &str,
        user_id: &str,
    ) -> Result<Operation, OperationError> {
        let operation = Operation::new(OperationKind::Clear, user_id, None);
        self.validate_operation(store, room_id, &operation)?;

        if !store.clear(room_id) {
            return Err(OperationError::UnknownRoom(room_id.to_string()));
        }
        Ok(operation)
    }

    pub fn state_for_new_user(&self, store: &RoomStore, room_id: &str) -> NewUserState {
        NewUserState {
            canvas_state: store.canvas_state(room_id),
            operations: store.operations(room_id),
            users: store.users(room_id),
        }
    }

    pub fn operation_history(&self, store: &RoomStore, room_id: &str) -> Vec<Operation> {
        store.operations(room_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::Tool;

    const ROOM: &str = "main-room";

    fn store_with(users: &[&str]) -> RoomStore {
        let mut store = RoomStore::new();
        for u in users {
            store.join(ROOM, u, "#FF6B6B");
        }
        store
    }

    fn line(x: f64) -> DrawIntent {
        DrawIntent::with_path(
            vec![Point::new(x, 0.0), Point::new(x, 10.0)],
            "#000000",
            5.0,
            Tool::Brush,
        )
    }

    struct NoErasers;

    impl OperationValidator for NoErasers {
        fn validate(&self, _room: Option<&Room>, operation: &Operation) -> Result<(), String> {
            match &operation.data {
                Some(stroke) if stroke.tool == Tool::Eraser => Err("erasers disabled".into()),
                _ => Ok(()),
            }
        }
    }

    struct ReadOnly;

    impl OperationValidator for ReadOnly {
        fn validate(&self, _room: Option<&Room>, _operation: &Operation) -> Result<(), String> {
            Err("read only".into())
        }
    }

    #[test]
    fn test_normalize_explicit_path() {
        let path = normalize_path(&line(3.0)).unwrap();
        assert_eq!(path, vec![Point::new(3.0, 0.0), Point::new(3.0, 10.0)]);
    }

    #[test]
    fn test_normalize_legacy_segment() {
        let intent = DrawIntent::segment(
            Point::new(1.0, 2.0),
            Point::new(3.0, 4.0),
            "#000000",
            5.0,
            Tool::Brush,
        );
        assert_eq!(
            normalize_path(&intent).unwrap(),
            vec![Point::new(1.0, 2.0), Point::new(3.0, 4.0)]
        );
    }

    #[test]
    fn test_path_wins_over_segment() {
        let mut intent = line(7.0);
        intent.from_x = Some(100.0);
        intent.from_y = Some(100.0);
        intent.to_x = Some(200.0);
        intent.to_y = Some(200.0);
        assert_eq!(normalize_path(&intent).unwrap()[0], Point::new(7.0, 0.0));
    }

    #[test]
    fn test_incomplete_segment_rejected() {
        let intent = DrawIntent {
            from_x: Some(1.0),
            from_y: Some(2.0),
            to_x: Some(3.0),
            color: "#000000".into(),
            size: 5.0,
            ..DrawIntent::default()
        };
        assert_eq!(normalize_path(&intent), Err(OperationError::MissingGeometry));
    }

    #[test]
    fn test_empty_path_rejected() {
        let intent = DrawIntent::with_path(Vec::new(), "#000000", 5.0, Tool::Brush);
        assert_eq!(normalize_path(&intent), Err(OperationError::EmptyPath));
    }

    #[test]
    fn test_process_draw_appends_stroke() {
        let mut store = store_with(&["a"]);
        let processor = DrawingStateProcessor::new();

        let op = processor.process_draw(&mut store, ROOM, "a", &line(1.0)).unwrap();
        assert_eq!(op.kind, OperationKind::Draw);
        assert_eq!(op.data.as_ref().unwrap().user_id, "a");

        let canvas = store.canvas_state(ROOM);
        assert_eq!(canvas.paths.len(), 1);
        assert_eq!(canvas.paths[0].color, "#000000");
        assert_eq!(processor.operation_history(&store, ROOM), vec![op]);
    }

    #[test]
    fn test_malformed_draw_leaves_state_untouched() {
        let mut store = store_with(&["a"]);
        let processor = DrawingStateProcessor::new();
        let intent = DrawIntent {
            color: "#000000".into(),
            size: 5.0,
            ..DrawIntent::default()
        };

        assert_eq!(
            processor.process_draw(&mut store, ROOM, "a", &intent),
            Err(OperationError::MissingGeometry)
        );
        assert!(store.canvas_state(ROOM).paths.is_empty());
        assert!(store.operations(ROOM).is_empty());
    }

    #[test]
    fn test_draw_into_missing_room() {
        let mut store = RoomStore::new();
        let processor = DrawingStateProcessor::new();
        assert_eq!(
            processor.process_draw(&mut store, ROOM, "a", &line(1.0)),
            Err(OperationError::UnknownRoom(ROOM.into()))
        );
    }

    #[test]
    fn test_custom_validator_rejects() {
        let mut store = store_with(&["a"]);
        let processor = DrawingStateProcessor::with_validator(NoErasers);

        let mut eraser = line(1.0);
        eraser.tool = Tool::Eraser;
        let err = processor.process_draw(&mut store, ROOM, "a", &eraser).unwrap_err();
        assert_eq!(err, OperationError::Rejected("erasers disabled".into()));
        assert!(store.canvas_state(ROOM).paths.is_empty());

        assert!(processor.process_draw(&mut store, ROOM, "a", &line(2.0)).is_ok());
    }

    #[test]
    fn test_validator_guards_history_and_clear() {
        let mut store = store_with(&["a"]);
        DrawingStateProcessor::new()
            .process_draw(&mut store, ROOM, "a", &line(1.0))
            .unwrap();

        let processor = DrawingStateProcessor::with_validator(ReadOnly);
        assert!(processor.process_undo(&mut store, ROOM, "a").is_err());
        assert!(processor.process_clear(&mut store, ROOM, "a").is_err());
        assert_eq!(store.canvas_state(ROOM).paths.len(), 1);
    }

    #[test]
    fn test_undo_redo_wrap_operations() {
        let mut store = store_with(&["a"]);
        let processor = DrawingStateProcessor::new();
        processor.process_draw(&mut store, ROOM, "a", &line(1.0)).unwrap();

        let undo = processor.process_undo(&mut store, ROOM, "a").unwrap().unwrap();
        assert_eq!(undo.kind, OperationKind::Undo);
        assert_eq!(undo.data.as_ref().unwrap().path[0], Point::new(1.0, 0.0));

        let redo = processor.process_redo(&mut store, ROOM, "a").unwrap().unwrap();
        assert_eq!(redo.kind, OperationKind::Redo);
        assert_eq!(redo.data, undo.data);

        let kinds: Vec<OperationKind> = store.operations(ROOM).iter().map(|o| o.kind).collect();
        assert_eq!(kinds, vec![OperationKind::Draw, OperationKind::Undo, OperationKind::Redo]);
    }

    #[test]
    fn test_nothing_to_undo_or_redo() {
        let mut store = store_with(&["a", "b"]);
        let processor = DrawingStateProcessor::new();
        processor.process_draw(&mut store, ROOM, "b", &line(1.0)).unwrap();

        assert_eq!(processor.process_undo(&mut store, ROOM, "a"), Ok(None));
        assert_eq!(processor.process_redo(&mut store, ROOM, "a"), Ok(None));
        // No-ops are not logged
        assert_eq!(store.operations(ROOM).len(), 1);
    }

    #[test]
    fn test_clear_resets_log() {
        let mut store = store_with(&["a"]);
        let processor = DrawingStateProcessor::new();
        processor.process_draw(&mut store, ROOM, "a", &line(1.0)).unwrap();

        let op = processor.process_clear(&mut store, ROOM, "a").unwrap();
        assert_eq!(op.kind, OperationKind::Clear);
        assert!(store.operations(ROOM).is_empty());
        assert!(store.canvas_state(ROOM).paths.is_empty());
    }

    #[test]
    fn test_state_for_new_user() {
        let mut store = store_with(&["a", "b"]);
        let processor = DrawingStateProcessor::new();
        processor.process_draw(&mut store, ROOM, "a", &line(1.0)).unwrap();

        let state = processor.state_for_new_user(&store, ROOM);
        assert_eq!(state.canvas_state.paths.len(), 1);
        assert_eq!(state.operations.len(), 1);
        assert_eq!(state.users.len(), 2);

        let empty = processor.state_for_new_user(&store, "elsewhere");
        assert_eq!(empty, NewUserState::default());
    }
}
