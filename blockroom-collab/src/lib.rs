//! # blockroom-collab — Room server for block-based collaborative editing
//!
//! Hosts `blockroom-core` rooms behind a WebSocket server with JSON frames.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ Browser A   │ ◄─────────────────► │ RoomServer  │
//! │ Browser B   │     JSON frames     │             │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                          ┌─────────────────┼─────────────────┐
//!                          ▼                                   ▼
//!                   ┌─────────────┐                     ┌─────────────┐
//!                   │ RoomManager │                     │ Channels    │
//!                   │ (per-room   │                     │ (fan-out)   │
//!                   │  mutex)     │                     └─────────────┘
//!                   └──────┬──────┘
//!                          ▼
//!                   ┌─────────────┐
//!                   │ RoomStore   │  fs / memory / rocksdb
//!                   └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`manager`] — room registry, single-flight loads, serialized mutation
//! - [`storage`] — persistence gateway and its backends
//! - [`protocol`] — JSON wire frames
//! - [`broadcast`] — per-room fan-out with backpressure
//! - [`server`] — WebSocket transport
//! - [`config`] — server configuration and CLI

pub mod broadcast;
pub mod config;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use broadcast::{BroadcastGroup, BroadcastStats, Channels, Departure, Envelope, RoomFull};
pub use config::{Cli, ServerConfig, StoreKind};
pub use error::RoomError;
pub use manager::{ManagerConfig, ManagerStats, Persisted, RoomManager};
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use server::{RoomServer, ServerStats};
pub use storage::{FsRoomStore, MemoryRoomStore, RoomStore, StoreError};
#[cfg(feature = "rocks")]
pub use storage::{RocksRoomStore, RoomMetadata};
