//! Blocks and registers.
//!
//! A room's document is an ordered sequence of [`Block`]s. Each edit gesture
//! produces a [`Register`] describing which blocks it created, rewrote and
//! removed; the reconciler applies that register to the sequence.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Opaque block identifier supplied by clients.
///
/// Ids are compared as strings. Older room files stored numeric ids, so the
/// human-readable decoder also accepts JSON numbers and keeps their textual
/// form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for BlockId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseId {
    Text(String),
    Int(i64),
    Float(f64),
}

impl<'de> Deserialize<'de> for BlockId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Binary formats can't drive an untagged enum.
        if !deserializer.is_human_readable() {
            return String::deserialize(deserializer).map(BlockId);
        }
        Ok(match LooseId::deserialize(deserializer)? {
            LooseId::Text(s) => BlockId(s),
            LooseId::Int(n) => BlockId(n.to_string()),
            LooseId::Float(n) => BlockId(n.to_string()),
        })
    }
}

/// One identified unit of document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub text: String,
}

impl Block {
    pub fn new(id: impl Into<BlockId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }

    /// Length of the text in UTF-16 code units, the unit cursor positions use.
    pub fn len(&self) -> usize {
        text_len(&self.text)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Length of `text` in UTF-16 code units.
///
/// Browser clients address carets by UTF-16 offset, so clamping has to use
/// the same unit or carets after astral characters drift.
pub fn text_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Net block changes produced by one edit gesture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created: Vec<Block>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updated: Vec<Block>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted: Vec<Block>,
}

impl Register {
    pub fn updated(blocks: impl IntoIterator<Item = Block>) -> Self {
        Self {
            updated: blocks.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_created(mut self, blocks: impl IntoIterator<Item = Block>) -> Self {
        self.created.extend(blocks);
        self
    }

    pub fn with_deleted(mut self, blocks: impl IntoIterator<Item = Block>) -> Self {
        self.deleted.extend(blocks);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}
