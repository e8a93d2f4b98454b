//! Property tests for reconciliation and cursor normalization.

use blockroom_core::reconcile::apply;
use blockroom_core::{Block, BlockId, CursorTracker, CursorUpdate, Edit, Register, Room};
use proptest::prelude::*;
use std::collections::HashSet;

fn block_strategy() -> impl Strategy<Value = Block> {
    ("[a-h]", "[a-z😀]{0,8}").prop_map(|(id, text)| Block::new(id, text))
}

fn unique_blocks() -> impl Strategy<Value = Vec<Block>> {
    prop::collection::vec(block_strategy(), 0..8).prop_map(|blocks| {
        let mut seen = HashSet::new();
        blocks.into_iter().filter(|b| seen.insert(b.id.clone())).collect()
    })
}

fn register_strategy() -> impl Strategy<Value = Register> {
    (
        prop::collection::vec(block_strategy(), 0..3),
        prop::collection::vec(block_strategy(), 0..3),
        prop::collection::vec(block_strategy(), 0..3),
    )
        .prop_map(|(created, updated, deleted)| Register { created, updated, deleted })
}

fn assert_cursors_valid(room: &Room) {
    for cursor in &room.cursors {
        match &cursor.block_id {
            None => assert!(room.blocks.is_empty(), "null cursor in non-empty room"),
            Some(id) => {
                let block = room
                    .blocks
                    .iter()
                    .find(|b| &b.id == id)
                    .expect("cursor references missing block");
                assert!(cursor.position <= block.len());
            }
        }
    }
}

proptest! {
    #[test]
    fn deleting_absent_id_is_noop(blocks in unique_blocks(), text in "[a-z]{0,4}") {
        let mut after = blocks.clone();
        let reg = Register::default().with_deleted([Block::new("absent-id", text)]);
        apply(&mut after, &reg, None);
        prop_assert_eq!(after, blocks);
    }

    #[test]
    fn repeated_update_is_idempotent(blocks in unique_blocks(), update in block_strategy()) {
        let reg = Register::updated([update]);
        let mut once = blocks.clone();
        apply(&mut once, &reg, None);
        let mut twice = once.clone();
        apply(&mut twice, &reg, None);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn cursors_stay_valid_after_any_edits(
        initial in unique_blocks(),
        edits in prop::collection::vec(
            (register_strategy(), "[a-h]", "[a-h]", 0usize..12, 0usize..4),
            1..12,
        ),
    ) {
        let mut room = Room::new("prop");
        room.blocks = initial;
        let mut tracker = CursorTracker::seeded(3);

        for (register, anchor, cursor_block, position, user) in edits {
            let edit = Edit {
                cursor: CursorUpdate::at(cursor_block, position),
                target_id: BlockId::new(anchor),
                register,
            };
            room.apply_edit(edit, &format!("user-{user}"), &mut tracker);
            assert_cursors_valid(&room);

            let ids: HashSet<_> = room.blocks.iter().map(|b| b.id.clone()).collect();
            prop_assert_eq!(ids.len(), room.blocks.len());
        }
    }

    #[test]
    fn colors_distinct_up_to_palette_size(n in 1usize..=20) {
        let mut room = Room::new("colors");
        room.blocks = vec![Block::new("a", "")];
        let mut tracker = CursorTracker::seeded(11);
        for i in 0..n {
            tracker.upsert(&mut room, CursorUpdate::at("a", 0), &format!("u{i}"));
        }
        let colors: HashSet<_> = room.cursors.iter().map(|c| c.color.as_str()).collect();
        prop_assert_eq!(colors.len(), n);
    }
}
