//! # sketchpad-collab: Real-time sync layer for a shared drawing canvas
//!
//! Every participant draws on one canvas; the server holds the
//! authoritative stroke list and rebroadcasts it after every change.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    WebSocket     ┌─────────────┐
//! │ ClientSyncAgent │ ◄──────────────► │ SyncServer  │
//! │ (per user)      │    JSON events   │ (central)   │
//! └───────┬─────────┘                  └──────┬──────┘
//!         │                                   │ one command queue
//!         ▼                                   ▼
//! ┌─────────────────┐                  ┌─────────────┐
//! │ CanvasMirror    │                  │ Session     │
//! │ (local shadow)  │                  │ (serialized)│
//! └───────┬─────────┘                  └──────┬──────┘
//!         │                                   │
//!         ▼                          ┌────────┴────────┐
//! ┌─────────────────┐                │ DrawingState-   │
//! │ Renderer        │                │ Processor       │
//! │ (external)      │                └────────┬────────┘
//! └─────────────────┘                         ▼
//!                                    ┌─────────────────┐
//!                                    │ RoomStore       │
//!                                    └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`room`]: Data model and the in-memory `RoomStore`
//! - [`drawing`]: Intent normalization, validation hook, undo/redo/clear
//! - [`protocol`]: JSON wire events
//! - [`broadcast`]: Per-connection fan-out with backpressure
//! - [`server`]: WebSocket sync server
//! - [`client`]: WebSocket sync client and local mirror
//! - [`gesture`]: Renderer interface and per-gesture point buffering

pub mod room;
pub mod drawing;
pub mod protocol;
pub mod broadcast;
pub mod server;
pub mod client;
pub mod gesture;

// Re-exports for convenience
pub use room::{
    CanvasState, Operation, OperationKind, Point, Room, RoomId, RoomStore, Stroke, Tool, User,
    UserId,
};
pub use drawing::{AcceptAll, DrawingStateProcessor, NewUserState, OperationError, OperationValidator};
pub use protocol::{
    ClientMessage, CursorUpdate, DrawIntent, ProtocolError, Rejection, RemoteDraw, ServerMessage,
    Snapshot, UserInfo,
};
pub use broadcast::{BroadcastGroup, BroadcastStats};
pub use server::{
    ConfigError, ServerConfig, ServerError, ServerStats, Session, SessionCommand, SyncServer,
    DEFAULT_PORT, DEFAULT_ROOM, PALETTE,
};
pub use client::{CanvasMirror, ClientSyncAgent, ConnectionState, SyncEvent};
pub use gesture::{BrushSettings, GestureRecorder, Renderer};
