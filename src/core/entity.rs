//! Entity Identity
//!
//! Humans keep their natural account id. Bots have none, so an id is
//! derived from the bot persona name and placed in the negative range,
//! which no account id ever occupies.

use std::fmt;
use serde::{Serialize, Deserialize};

use super::hash::hash_persona_name;

/// Size of the bot id range: ids fall in `[-BOT_ID_RANGE, -1]`.
pub const BOT_ID_RANGE: u64 = 999_999_999;

/// Identifier of one match participant (human or bot).
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(i64);

impl EntityId {
    /// Create from a raw value.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Create from a human account id.
    ///
    /// Returns `None` for ids above `i64::MAX`, which would otherwise
    /// land in the bot range.
    pub fn from_account(account_id: u64) -> Option<Self> {
        i64::try_from(account_id).ok().map(Self)
    }

    /// Derive a stable id for a bot from its persona name.
    pub fn for_bot(persona_name: &str) -> Self {
        let bucket = hash_persona_name(persona_name) % BOT_ID_RANGE;
        Self(-(bucket as i64) - 1)
    }

    /// Raw value.
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Whether this id lives in the bot range.
    pub const fn is_bot(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
