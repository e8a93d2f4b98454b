//! Block reconciliation: applying a [`Register`] to an ordered block list.
//!
//! Semantics are last-writer-wins per block id. Within one call the phases run
//! in a fixed order:
//!
//! ```text
//! updated ──► created ──► deleted
//!   │            │           │
//!   │            │           └─ remove by id, absent ids are no-ops
//!   │            └─ insert after the anchor, batch order kept,
//!   │               append when the anchor is gone
//!   └─ replace in place, append unknown ids
//! ```
//!
//! Unresolvable references never fail the call. They are collected in the
//! returned [`ReconcileReport`] so the caller can log and count them.

use crate::block::{Block, BlockId, Register};

/// Diagnostics from one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Index at which the created batch was inserted, if anything was created.
    pub create_start: Option<usize>,
    /// The anchor id was given but could not be found after updates ran.
    pub anchor_missing: bool,
    /// Updated ids that were not present and got appended.
    pub appended_updates: Vec<BlockId>,
    /// Deleted ids that were already absent.
    pub missing_deletes: Vec<BlockId>,
    /// Created ids that already existed; their text was overwritten in place.
    pub duplicate_creates: Vec<BlockId>,
}

impl ReconcileReport {
    /// Whether the register referenced something that could not be resolved.
    pub fn is_anomalous(&self) -> bool {
        self.anchor_missing
            || !self.missing_deletes.is_empty()
            || !self.duplicate_creates.is_empty()
    }
}

fn position_of(blocks: &[Block], id: &BlockId) -> Option<usize> {
    blocks.iter().position(|b| &b.id == id)
}

/// Apply `register` to `blocks` in place.
///
/// `anchor` is the id of the block the gesture targeted; created blocks are
/// inserted directly after it.
pub fn apply(blocks: &mut Vec<Block>, register: &Register, anchor: Option<&BlockId>) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    for block in &register.updated {
        match position_of(blocks, &block.id) {
            Some(idx) => blocks[idx] = block.clone(),
            None => {
                report.appended_updates.push(block.id.clone());
                blocks.push(block.clone());
            }
        }
    }

    if !register.created.is_empty() {
        let anchor_idx = anchor.and_then(|id| position_of(blocks, id));
        report.anchor_missing = anchor_idx.is_none();
        let start = anchor_idx.map_or(blocks.len(), |idx| idx + 1);
        report.create_start = Some(start);

        let mut at = start;
        for block in &register.created {
            if let Some(idx) = position_of(blocks, &block.id) {
                report.duplicate_creates.push(block.id.clone());
                blocks[idx] = block.clone();
                continue;
            }
            blocks.insert(at, block.clone());
            at += 1;
        }
    } else if let Some(id) = anchor {
        report.anchor_missing = position_of(blocks, id).is_none();
    }

    for block in &register.deleted {
        match position_of(blocks, &block.id) {
            Some(idx) => {
                blocks.remove(idx);
            }
            None => report.missing_deletes.push(block.id.clone()),
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(blocks: &[Block]) -> Vec<&str> {
        blocks.iter().map(|b| b.id.as_str()).collect()
    }

    #[test]
    fn test_update_replaces_in_place() {
        let mut blocks = vec![Block::new("a", "1"), Block::new("b", "2"), Block::new("c", "3")];
        let report = apply(&mut blocks, &Register::updated([Block::new("b", "two")]), None);

        assert_eq!(ids(&blocks), ["a", "b", "c"]);
        assert_eq!(blocks[1].text, "two");
        assert!(!report.is_anomalous());
    }

    #[test]
    fn test_update_unknown_id_appends() {
        let mut blocks = vec![Block::new("a", "1")];
        let report = apply(&mut blocks, &Register::updated([Block::new("z", "new")]), None);

        assert_eq!(ids(&blocks), ["a", "z"]);
        assert_eq!(report.appended_updates, vec![BlockId::new("z")]);
    }

    #[test]
    fn test_enter_splits_block() {
        let mut blocks = vec![Block::new("a", "hello")];
        let reg = Register::updated([Block::new("a", "hel")]).with_created([Block::new("b", "lo")]);
        let report = apply(&mut blocks, &reg, Some(&BlockId::new("a")));

        assert_eq!(blocks, vec![Block::new("a", "hel"), Block::new("b", "lo")]);
        assert_eq!(report.create_start, Some(1));
        assert!(!report.anchor_missing);
    }

    #[test]
    fn test_create_batch_keeps_order_after_anchor() {
        let mut blocks = vec![Block::new("a", ""), Block::new("d", "")];
        let reg = Register::default().with_created([Block::new("b", ""), Block::new("c", "")]);
        apply(&mut blocks, &reg, Some(&BlockId::new("a")));

        assert_eq!(ids(&blocks), ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_create_with_missing_anchor_appends() {
        let mut blocks = vec![Block::new("a", ""), Block::new("b", "")];
        let reg = Register::default().with_created([Block::new("n", "")]);
        let report = apply(&mut blocks, &reg, Some(&BlockId::new("gone")));

        assert_eq!(ids(&blocks), ["a", "b", "n"]);
        assert_eq!(report.create_start, Some(2));
        assert!(report.anchor_missing);
        assert!(report.is_anomalous());
    }

    #[test]
    fn test_create_existing_id_overwrites() {
        let mut blocks = vec![Block::new("a", ""), Block::new("b", "old")];
        let reg = Register::default().with_created([Block::new("b", "new")]);
        let report = apply(&mut blocks, &reg, Some(&BlockId::new("a")));

        assert_eq!(blocks, vec![Block::new("a", ""), Block::new("b", "new")]);
        assert_eq!(report.duplicate_creates, vec![BlockId::new("b")]);
    }

    #[test]
    fn test_backspace_merges_into_previous() {
        let mut blocks = vec![Block::new("a", "foo"), Block::new("b", "bar")];
        let reg = Register::updated([Block::new("a", "foobar")]).with_deleted([Block::new("b", "bar")]);
        let report = apply(&mut blocks, &reg, Some(&BlockId::new("b")));

        assert_eq!(blocks, vec![Block::new("a", "foobar")]);
        assert!(!report.is_anomalous());
    }

    #[test]
    fn test_delete_absent_is_noop() {
        let mut blocks = vec![Block::new("a", "x")];
        let before = blocks.clone();
        let reg = Register::default().with_deleted([Block::new("q", "")]);
        let report = apply(&mut blocks, &reg, None);

        assert_eq!(blocks, before);
        assert_eq!(report.missing_deletes, vec![BlockId::new("q")]);
    }

    #[test]
    fn test_updates_run_before_creates_and_deletes() {
        // Anchor only exists once the update has appended it.
        let mut blocks = vec![Block::new("a", "")];
        let reg = Register::updated([Block::new("t", "target")])
            .with_created([Block::new("n", "")])
            .with_deleted([Block::new("a", "")]);
        let report = apply(&mut blocks, &reg, Some(&BlockId::new("t")));

        assert_eq!(ids(&blocks), ["t", "n"]);
        assert_eq!(report.create_start, Some(2));
        assert!(!report.anchor_missing);
    }

    #[test]
    fn test_unknown_anchor_without_creates_is_reported() {
        let mut blocks = vec![Block::new("a", "")];
        let report = apply(&mut blocks, &Register::default(), Some(&BlockId::new("x")));
        assert!(report.anchor_missing);
        assert!(report.create_start.is_none());
        assert!(report.is_anomalous());
    }
}
