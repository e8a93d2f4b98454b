//! Room state: one document's blocks and the cursors of its participants.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::block::{Block, BlockId, Register};
use crate::cursor::{self, Cursor, CursorTracker};
use crate::operation::{Broadcast, Edit};
use crate::reconcile::{self, ReconcileReport};

/// Authoritative state of one room.
///
/// Invariants held after every [`Room::apply_edit`]:
/// - block ids are unique;
/// - at most one cursor per `user_id`;
/// - a cursor's `block_id` is `None` only when `blocks` is empty, otherwise it
///   names a present block and `position` is within that block's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub cursors: Vec<Cursor>,
}

/// Result of applying one edit to a room.
#[derive(Debug, Clone)]
pub struct Applied {
    pub broadcast: Broadcast,
    pub report: ReconcileReport,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            blocks: Vec::new(),
            cursors: Vec::new(),
        }
    }

    pub fn cursor(&self, user_id: &str) -> Option<&Cursor> {
        self.cursors.iter().find(|c| c.user_id == user_id)
    }

    /// Reconcile blocks, upsert the acting cursor, then normalize every cursor.
    pub fn apply_edit<R: RngCore>(
        &mut self,
        edit: Edit,
        user_id: &str,
        tracker: &mut CursorTracker<R>,
    ) -> Applied {
        let report = reconcile::apply(&mut self.blocks, &edit.register, Some(&edit.target_id));
        let acting = tracker.upsert(self, edit.cursor, user_id);
        let changed = cursor::normalize(self);

        let mut updated_cursors = Vec::with_capacity(1 + changed.len());
        if let Some(c) = self.cursor(&acting.user_id) {
            updated_cursors.push(c.clone());
        }
        updated_cursors.extend(
            self.cursors
                .iter()
                .filter(|c| c.user_id != acting.user_id && changed.contains(&c.user_id))
                .cloned(),
        );

        let dispatch = replayable(edit.register, &report.duplicate_creates);
        let create_start = if dispatch.created.is_empty() {
            None
        } else {
            report.create_start
        };

        Applied {
            broadcast: Broadcast {
                user_id: acting.user_id,
                updated_cursors,
                dispatch,
                create_start,
            },
            report,
        }
    }

    /// Drop cursors of users not in `active`. Returns the removed user ids.
    pub fn prune_cursors(&mut self, active: &HashSet<String>) -> Vec<String> {
        let mut removed = Vec::new();
        self.cursors.retain(|c| {
            let keep = active.contains(&c.user_id);
            if !keep {
                removed.push(c.user_id.clone());
            }
            keep
        });
        removed
    }

    pub fn remove_cursor(&mut self, user_id: &str) -> Option<Cursor> {
        let idx = self.cursors.iter().position(|c| c.user_id == user_id)?;
        Some(self.cursors.remove(idx))
    }
}

/// Rewrite `register` so peers replaying it reach the same blocks.
///
/// A created id whose every occurrence hit an existing block was overwritten
/// in place, so it goes out as an update. Otherwise the first occurrence was
/// inserted and later ones fold into it.
fn replayable(mut register: Register, duplicates: &[BlockId]) -> Register {
    if duplicates.is_empty() {
        return register;
    }
    let batch = std::mem::take(&mut register.created);
    let existed = |id: &BlockId| {
        duplicates.iter().filter(|d| *d == id).count() == batch.iter().filter(|b| &b.id == id).count()
    };

    let mut created: Vec<Block> = Vec::with_capacity(batch.len());
    for block in &batch {
        if existed(&block.id) {
            register.updated.push(block.clone());
        } else if let Some(earlier) = created.iter_mut().find(|b| b.id == block.id) {
            *earlier = block.clone();
        } else {
            created.push(block.clone());
        }
    }
    register.created = created;
    register
}
