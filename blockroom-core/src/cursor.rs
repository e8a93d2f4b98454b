//! Participant cursors: color assignment, upsert and normalization.
//!
//! Every active participant owns exactly one [`Cursor`] per room. Cursors are
//! re-validated against the block list after each mutation so that a delete
//! issued by one participant can never leave another participant's caret
//! pointing at a vanished block or past the end of a shrunken one.

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Deserializer, Serialize};

use crate::block::{text_len, BlockId};
use crate::room::Room;

/// Fixed display palette. Order matters: free colors are handed out from the
/// front so the first 20 concurrent participants get distinct colors.
pub const PALETTE: [&str; 20] = [
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8",
    "#f58231", "#911eb4", "#46f0f0", "#f032e6",
    "#bcf60c", "#fabebe", "#008080", "#e6beff",
    "#9a6324", "#fffac8", "#800000", "#aaffc3",
    "#808000", "#ffd8b1", "#000075", "#808080",
];

/// Stored caret/selection of one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub user_id: String,
    /// `None` only while the room has no blocks.
    pub block_id: Option<BlockId>,
    #[serde(default, deserialize_with = "offset")]
    pub position: usize,
    #[serde(default, deserialize_with = "optional_offset", skip_serializing_if = "Option::is_none")]
    pub selection_end: Option<usize>,
    #[serde(default)]
    pub color: String,
}

/// Cursor as sent by a client. Color is always decided server-side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdate {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub block_id: Option<BlockId>,
    #[serde(default, deserialize_with = "offset")]
    pub position: usize,
    #[serde(default, deserialize_with = "optional_offset")]
    pub selection_end: Option<usize>,
}

// Clients compute offsets with plain arithmetic and can send negatives;
// those mean "start of block".
fn offset<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    Ok(usize::try_from(i64::deserialize(deserializer)?).unwrap_or(0))
}

fn optional_offset<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
    Ok(Option::<i64>::deserialize(deserializer)?.map(|v| usize::try_from(v).unwrap_or(0)))
}

impl CursorUpdate {
    pub fn at(block_id: impl Into<BlockId>, position: usize) -> Self {
        Self {
            block_id: Some(block_id.into()),
            position,
            ..Self::default()
        }
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_selection_end(mut self, end: usize) -> Self {
        self.selection_end = Some(end);
        self
    }
}

/// Upserts cursors and assigns colors.
///
/// The random source is only consulted once all palette colors are taken; it
/// is injected so that fallback picks are reproducible under test.
pub struct CursorTracker<R: RngCore = StdRng> {
    rng: R,
}

impl CursorTracker<StdRng> {
    /// Tracker seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    /// Tracker with a fixed seed.
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: RngCore> CursorTracker<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Pick a display color for `user_id` given the cursors already present.
    pub fn assign_color(&mut self, cursors: &[Cursor], user_id: &str) -> String {
        if let Some(existing) = cursors
            .iter()
            .find(|c| c.user_id == user_id && !c.color.is_empty())
        {
            return existing.color.clone();
        }

        let free = PALETTE
            .iter()
            .find(|color| !cursors.iter().any(|c| c.color == **color));
        match free {
            Some(color) => color.to_string(),
            None => PALETTE[self.rng.gen_range(0..PALETTE.len())].to_string(),
        }
    }

    /// Insert or replace the cursor of one participant.
    ///
    /// `fallback_user_id` is the participant bound to the connection. An
    /// update carrying no user id is attributed to it, and an update naming a
    /// different user is re-attributed rather than allowed to overwrite that
    /// user's cursor.
    pub fn upsert(&mut self, room: &mut Room, update: CursorUpdate, fallback_user_id: &str) -> Cursor {
        let user_id = match update.user_id {
            Some(id) if id == fallback_user_id => id,
            Some(id) if !id.is_empty() => {
                log::warn!(
                    "Room {}: cursor for {id} sent by {fallback_user_id}, re-attributing",
                    room.id
                );
                fallback_user_id.to_string()
            }
            _ => fallback_user_id.to_string(),
        };

        let color = self.assign_color(&room.cursors, &user_id);
        let cursor = Cursor {
            user_id,
            block_id: update.block_id,
            position: update.position,
            selection_end: update.selection_end,
            color,
        };

        match room.cursors.iter_mut().find(|c| c.user_id == cursor.user_id) {
            Some(slot) => *slot = cursor.clone(),
            None => room.cursors.push(cursor.clone()),
        }
        cursor
    }
}

/// Re-validate every cursor in `room` against its current blocks.
///
/// Returns the user ids whose cursor record changed.
pub fn normalize(room: &mut Room) -> Vec<String> {
    let mut changed = Vec::new();
    let last = room.blocks.last();

    for cursor in &mut room.cursors {
        let before = cursor.clone();
        let target = cursor
            .block_id
            .as_ref()
            .and_then(|id| room.blocks.iter().find(|b| &b.id == id));

        match (target, last) {
            (Some(block), _) => {
                let len = text_len(&block.text);
                cursor.position = cursor.position.min(len);
                cursor.selection_end = cursor.selection_end.map(|end| end.min(len));
            }
            (None, Some(block)) => {
                cursor.block_id = Some(block.id.clone());
                cursor.position = text_len(&block.text);
                cursor.selection_end = None;
            }
            (None, None) => {
                cursor.block_id = None;
                cursor.position = 0;
                cursor.selection_end = None;
            }
        }

        if *cursor != before {
            changed.push(cursor.user_id.clone());
        }
    }

    changed
}
