//! Edit gestures and the broadcast delta they produce.

use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockId, Register};
use crate::cursor::{Cursor, CursorUpdate};

/// One edit gesture as received from a participant.
///
/// Every variant lowers to an [`Edit`] whose anchor is the id of `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Operation {
    /// Text of `target` changed.
    Change { cursor: CursorUpdate, target: Block },
    /// `target` was split; `block` holds the tail and goes right after it.
    Enter {
        cursor: CursorUpdate,
        target: Block,
        block: Block,
    },
    /// `target` was merged into the block before it, now `merged`.
    Backspace {
        cursor: CursorUpdate,
        target: Block,
        merged: Block,
    },
    /// The block after `target` was pulled into it and is removed.
    Delete {
        cursor: CursorUpdate,
        target: Block,
        removed: Block,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Change { .. } => "change",
            Operation::Enter { .. } => "enter",
            Operation::Backspace { .. } => "backspace",
            Operation::Delete { .. } => "delete",
        }
    }

    /// Lower the gesture to its register and anchor.
    pub fn into_edit(self) -> Edit {
        match self {
            Operation::Change { cursor, target } => Edit {
                cursor,
                target_id: target.id.clone(),
                register: Register::updated([target]),
            },
            Operation::Enter { cursor, target, block } => Edit {
                cursor,
                target_id: target.id.clone(),
                register: Register::updated([target]).with_created([block]),
            },
            Operation::Backspace { cursor, target, merged } => Edit {
                cursor,
                target_id: target.id.clone(),
                register: Register::updated([merged]).with_deleted([target]),
            },
            Operation::Delete { cursor, target, removed } => Edit {
                cursor,
                target_id: target.id.clone(),
                register: Register::updated([target]).with_deleted([removed]),
            },
        }
    }
}

/// Gesture-agnostic form consumed by the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edit {
    pub cursor: CursorUpdate,
    pub target_id: BlockId,
    pub register: Register,
}

impl From<Operation> for Edit {
    fn from(op: Operation) -> Self {
        op.into_edit()
    }
}

/// Delta other participants replay locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Broadcast {
    pub user_id: String,
    pub updated_cursors: Vec<Cursor>,
    pub dispatch: Register,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_start: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_lowers_to_update_and_create() {
        let op = Operation::Enter {
            cursor: CursorUpdate::at("b", 0),
            target: Block::new("a", "hel"),
            block: Block::new("b", "lo"),
        };
        let edit = op.into_edit();
        assert_eq!(edit.target_id, BlockId::new("a"));
        assert_eq!(edit.register.updated, vec![Block::new("a", "hel")]);
        assert_eq!(edit.register.created, vec![Block::new("b", "lo")]);
        assert!(edit.register.deleted.is_empty());
    }

    #[test]
    fn test_backspace_anchors_on_deleted_block() {
        let op = Operation::Backspace {
            cursor: CursorUpdate::at("a", 3),
            target: Block::new("b", "bar"),
            merged: Block::new("a", "foobar"),
        };
        let edit = Edit::from(op);
        assert_eq!(edit.target_id, BlockId::new("b"));
        assert_eq!(edit.register.updated, vec![Block::new("a", "foobar")]);
        assert_eq!(edit.register.deleted, vec![Block::new("b", "bar")]);
    }

    #[test]
    fn test_delete_removes_following_block() {
        let op = Operation::Delete {
            cursor: CursorUpdate::at("a", 3),
            target: Block::new("a", "foobar"),
            removed: Block::new("b", "bar"),
        };
        let edit = op.into_edit();
        assert_eq!(edit.target_id, BlockId::new("a"));
        assert_eq!(edit.register.deleted, vec![Block::new("b", "bar")]);
    }

    #[test]
    fn test_operation_tagged_json() {
        let json = r#"{
            "type": "change",
            "cursor": {"blockId": "a", "position": 2},
            "target": {"id": "a", "text": "hi"}
        }"#;
        let op: Operation = serde_json::from_str(json).unwrap();
        assert_eq!(op.name(), "change");
        match op {
            Operation::Change { cursor, target } => {
                assert_eq!(cursor.position, 2);
                assert_eq!(cursor.user_id, None);
                assert_eq!(target, Block::new("a", "hi"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_broadcast_skips_absent_create_start() {
        let broadcast = Broadcast {
            user_id: "u".into(),
            updated_cursors: Vec::new(),
            dispatch: Register::default(),
            create_start: None,
        };
        let json = serde_json::to_value(&broadcast).unwrap();
        assert!(json.get("createStart").is_none());
        assert_eq!(json["userId"], "u");
    }
}
