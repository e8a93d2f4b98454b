//! # blockroom-core — Room state engine for block-based collaborative editing
//!
//! Pure, synchronous model of one shared document ("room"): an ordered list of
//! text blocks plus one cursor per connected participant.
//!
//! ## Flow of one edit
//!
//! ```text
//! Operation (change / enter / backspace / delete)
//!       │  into_edit()
//!       ▼
//! Edit { cursor, target_id, register }
//!       │
//!       ▼
//! reconcile::apply()        updated → created → deleted
//!       │
//!       ▼
//! CursorTracker::upsert()   acting participant's cursor + color
//!       │
//!       ▼
//! cursor::normalize()       every cursor re-clamped
//!       │
//!       ▼
//! Broadcast { updatedCursors, dispatch, createStart }
//! ```
//!
//! ## Modules
//!
//! - [`block`] — `Block`, `BlockId`, `Register`
//! - [`reconcile`] — last-writer-wins block reconciliation
//! - [`cursor`] — color palette, cursor upsert and normalization
//! - [`operation`] — gesture enum and broadcast delta
//! - [`room`] — the `Room` aggregate
//!
//! Concurrency lives one layer up: callers must serialize calls that mutate
//! the same `Room`.

pub mod block;
pub mod cursor;
pub mod operation;
pub mod reconcile;
pub mod room;

pub use block::{text_len, Block, BlockId, Register};
pub use cursor::{normalize, Cursor, CursorTracker, CursorUpdate, PALETTE};
pub use operation::{Broadcast, Edit, Operation};
pub use reconcile::ReconcileReport;
pub use room::{Applied, Room};
