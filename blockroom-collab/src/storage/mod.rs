//! Persistence gateway for room snapshots.
//!
//! Architecture:
//! ```text
//! ┌─────────────┐  create / load / save  ┌──────────────────┐
//! │ RoomManager │ ─────────────────────► │ dyn RoomStore     │
//! │ (in-memory) │                        ├──────────────────┤
//! └─────────────┘                        │ FsRoomStore      │  <data_dir>/<id>.json
//!                                        │ MemoryRoomStore  │  HashMap (tests)
//!                                        │ RocksRoomStore   │  LZ4 snapshots (feature "rocks")
//!                                        └──────────────────┘
//! ```
//!
//! Every implementation stores whole-room snapshots with atomic replace
//! semantics: a reader never observes a partially written room.

pub mod fs;
pub mod memory;
#[cfg(feature = "rocks")]
pub mod rocks;

pub use fs::FsRoomStore;
pub use memory::MemoryRoomStore;
#[cfg(feature = "rocks")]
pub use rocks::{RocksRoomStore, RoomMetadata};

use async_trait::async_trait;
use blockroom_core::Room;
use thiserror::Error;

/// Longest accepted room id.
pub const MAX_ROOM_ID_LEN: usize = 128;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("room already exists: {0}")]
    AlreadyExists(String),

    #[error("room not found: {0}")]
    NotFound(String),

    #[error("invalid room id: {0:?}")]
    InvalidId(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Room ids double as storage keys and file names: ASCII alphanumerics,
/// `-` and `_`, 1 to [`MAX_ROOM_ID_LEN`] characters.
pub fn is_valid_room_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ROOM_ID_LEN
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

pub(crate) fn check_room_id(id: &str) -> Result<(), StoreError> {
    if is_valid_room_id(id) {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

/// Run synchronous storage work on the blocking pool.
///
/// The closure runs to completion even if the returned future is dropped.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
}

/// Durable home of room snapshots.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Persist a new empty room. Fails with `AlreadyExists` if one is stored.
    async fn create(&self, room_id: &str) -> Result<Room, StoreError>;

    /// Read a stored room. Fails with `NotFound` if none is stored.
    async fn load(&self, room_id: &str) -> Result<Room, StoreError>;

    /// Atomically replace the stored snapshot of an existing room.
    async fn save(&self, room: &Room) -> Result<(), StoreError>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_validation() {
        assert!(is_valid_room_id("design-review_2"));
        assert!(!is_valid_room_id(""));
        assert!(!is_valid_room_id("../etc/passwd"));
        assert!(!is_valid_room_id("a b"));
        assert!(!is_valid_room_id(&"x".repeat(MAX_ROOM_ID_LEN + 1)));
        assert!(is_valid_room_id(&"x".repeat(MAX_ROOM_ID_LEN)));
    }

    #[test]
    fn test_store_error_display() {
        assert_eq!(StoreError::NotFound("r".into()).to_string(), "room not found: r");
        assert_eq!(StoreError::AlreadyExists("r".into()).to_string(), "room already exists: r");
    }
}
