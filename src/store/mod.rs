//! Persistence Collaborator
//!
//! The engine never writes to storage directly. It queues typed
//! [`WriteIntent`]s; a single [`worker::PersistenceWorker`] applies them
//! in arrival order against a [`MatchStore`].
//!
//! ## Module Structure
//!
//! - `memory`: in-process [`MatchStore`] backed by `BTreeMap`s
//! - `worker`: single-consumer write queue with retry-once on conflict
//! - `history`: change recomputation from stored snapshots

pub mod history;
pub mod memory;
pub mod worker;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::entity::EntityId;
use crate::game::normalize::SnapshotUpdate;
use crate::game::snapshot::PlayerSnapshot;
use crate::game::state::RosterEntry;

pub use history::{recompute_changes, recompute_from_rows};
pub use memory::InMemoryStore;
pub use worker::{PersistenceHandle, PersistenceWorker};

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors a store can report.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Write conflict; roll back and reissue once.
    #[error("transient write conflict: {0}")]
    Transient(String),

    /// Unknown match.
    #[error("match not found: {0}")]
    MatchNotFound(String),

    /// Entity is not on the match roster.
    #[error("entity {entity} not in match {match_id}")]
    PlayerNotFound {
        /// Match id
        match_id: String,
        /// Entity id
        entity: EntityId,
    },

    /// Stored payload could not be encoded or decoded.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// Anything else the backend reports.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the write may succeed if reissued.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Which feed a stored snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Per-entity public state
    Public,
    /// Client-owner-only state
    Private,
}

/// One persisted snapshot row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    /// Insertion order
    pub id: u64,
    /// Owning match
    pub match_id: String,
    /// Feed
    pub channel: Channel,
    /// Entity (public channel only)
    pub entity_id: Option<EntityId>,
    /// Channel ordering key
    pub sequence_number: u64,
    /// Capture time
    pub captured_at: DateTime<Utc>,
    /// Encoded snapshot
    pub payload: serde_json::Value,
}

impl StoredSnapshot {
    /// Decode a public row back into a snapshot. Private rows yield `None`.
    pub fn decode_public(&self) -> Result<Option<PlayerSnapshot>> {
        match self.channel {
            Channel::Public => Ok(Some(serde_json::from_value(self.payload.clone())?)),
            Channel::Private => Ok(None),
        }
    }
}

/// Roster row with the final place recorded so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPlayerRecord {
    /// Roster data
    #[serde(flatten)]
    pub entry: RosterEntry,
    /// Final place, once known
    pub final_place: Option<u32>,
}

/// Persisted match header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Match id
    pub match_id: String,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time, once closed
    pub ended_at: Option<DateTime<Utc>>,
    /// Winner, if one was inferred
    pub winner: Option<EntityId>,
    /// Roster
    pub players: Vec<MatchPlayerRecord>,
}

/// Storage contract required by the persistence worker and the API.
///
/// Implementations are shared across tasks, hence `Send + Sync` and
/// `&self` receivers.
pub trait MatchStore: Send + Sync {
    /// Create a match. Creating an existing id is a no-op.
    fn create_match(
        &self,
        match_id: &str,
        roster: &[RosterEntry],
        started_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Append a snapshot to a match.
    fn insert_snapshot(&self, match_id: &str, snapshot: &SnapshotUpdate) -> Result<()>;

    /// Record an entity's final place.
    fn update_final_place(&self, match_id: &str, entity: EntityId, place: u32) -> Result<()>;

    /// Set the winner (if any) and end time in one unit.
    fn close_match(
        &self,
        match_id: &str,
        winner: Option<EntityId>,
        ended_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Remove a match and its snapshots.
    fn delete_match(&self, match_id: &str) -> Result<()>;

    /// Abort any half-applied write before a reissue.
    fn rollback(&self) -> Result<()> {
        Ok(())
    }

    /// All matches, newest first.
    fn list_matches(&self) -> Result<Vec<MatchRecord>>;

    /// Stored snapshots of a match in insertion order.
    fn match_snapshots(&self, match_id: &str) -> Result<Vec<StoredSnapshot>>;
}

/// A discrete write, applied in queue order.
#[derive(Debug, Clone)]
pub enum WriteIntent {
    /// New match with its roster.
    CreateMatch {
        /// Match id
        match_id: String,
        /// Confirmed roster
        roster: Vec<RosterEntry>,
        /// Start time
        started_at: DateTime<Utc>,
    },
    /// Accepted snapshot.
    InsertSnapshot {
        /// Match id
        match_id: String,
        /// Snapshot
        snapshot: SnapshotUpdate,
    },
    /// Final place reported for one entity.
    UpdateFinalPlace {
        /// Match id
        match_id: String,
        /// Entity
        entity: EntityId,
        /// Place
        place: u32,
    },
    /// Winner assignment and end time.
    CloseMatch {
        /// Match id
        match_id: String,
        /// Inferred winner
        winner: Option<EntityId>,
        /// End time
        ended_at: DateTime<Utc>,
    },
    /// Drop a stored match.
    DeleteMatch {
        /// Match id
        match_id: String,
    },
    /// Stop the worker after everything queued before it.
    Shutdown,
}

impl WriteIntent {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            WriteIntent::CreateMatch { .. } => "create_match",
            WriteIntent::InsertSnapshot { .. } => "insert_snapshot",
            WriteIntent::UpdateFinalPlace { .. } => "update_final_place",
            WriteIntent::CloseMatch { .. } => "close_match",
            WriteIntent::DeleteMatch { .. } => "delete_match",
            WriteIntent::Shutdown => "shutdown",
        }
    }

    /// Apply this intent to a store. `Shutdown` is a no-op here.
    pub fn apply(&self, store: &dyn MatchStore) -> Result<()> {
        match self {
            WriteIntent::CreateMatch { match_id, roster, started_at } => {
                store.create_match(match_id, roster, *started_at)
            }
            WriteIntent::InsertSnapshot { match_id, snapshot } => {
                store.insert_snapshot(match_id, snapshot)
            }
            WriteIntent::UpdateFinalPlace { match_id, entity, place } => {
                store.update_final_place(match_id, *entity, *place)
            }
            WriteIntent::CloseMatch { match_id, winner, ended_at } => {
                store.close_match(match_id, *winner, *ended_at)
            }
            WriteIntent::DeleteMatch { match_id } => store.delete_match(match_id),
            WriteIntent::Shutdown => Ok(()),
        }
    }
}
