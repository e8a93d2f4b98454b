//! JSON wire protocol spoken over WebSocket text frames.
//!
//! Every frame is one object tagged by `"event"`:
//! ```text
//! client → server   join { roomId, userId }     first frame, binds the connection
//!                   load                        request the full room
//!                   edit { operation }          operation tagged by "type":
//!                                               change | enter | backspace | delete
//!                   ping
//!
//! server → client   init { blocks, cursors }    reply to load
//!                   change { userId, updatedCursors, dispatch, createStart? }
//!                   cursor:remove { userId }
//!                   error { message }
//!                   pong
//! ```

use blockroom_core::{Block, Broadcast, Cursor, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Join { room_id: String, user_id: String },
    Load,
    Edit { operation: Operation },
    Ping,
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerMessage {
    #[serde(rename = "init")]
    Init {
        blocks: Vec<Block>,
        cursors: Vec<Cursor>,
    },
    #[serde(rename = "change")]
    Change(Broadcast),
    #[serde(rename = "cursor:remove", rename_all = "camelCase")]
    CursorRemove { user_id: String },
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "pong")]
    Pong,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}
