//! Errors surfaced by the room manager to its callers.

use std::time::Duration;
use thiserror::Error;

use crate::storage::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("room already exists: {0}")]
    RoomAlreadyExists(String),

    #[error("invalid room id: {0:?}")]
    InvalidRoomId(String),

    #[error("persistence failed for room {room}: {message}")]
    PersistenceIo { room: String, message: String },

    #[error("persistence timed out for room {room} after {after:?}")]
    PersistenceTimeout { room: String, after: Duration },
}

impl RoomError {
    pub fn from_store(room: &str, err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists(id) => RoomError::RoomAlreadyExists(id),
            StoreError::NotFound(id) => RoomError::RoomNotFound(id),
            StoreError::InvalidId(id) => RoomError::InvalidRoomId(id),
            other => RoomError::PersistenceIo {
                room: room.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Save or load failed; in-memory state is unaffected.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            RoomError::PersistenceIo { .. } | RoomError::PersistenceTimeout { .. }
        )
    }
}
