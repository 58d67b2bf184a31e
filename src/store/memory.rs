//! In-process match store.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{
    Channel, MatchPlayerRecord, MatchRecord, MatchStore, Result, StoreError, StoredSnapshot,
};
use crate::core::entity::EntityId;
use crate::game::normalize::SnapshotUpdate;
use crate::game::state::RosterEntry;

#[derive(Debug, Default)]
struct Tables {
    matches: BTreeMap<String, MatchRecord>,
    snapshots: BTreeMap<String, Vec<StoredSnapshot>>,
    next_snapshot_id: u64,
}

/// Match store held in memory. Cloning shares the same tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch one match header.
    pub fn get_match(&self, match_id: &str) -> Option<MatchRecord> {
        self.tables.read().matches.get(match_id).cloned()
    }

    /// Total stored snapshots across all matches.
    pub fn snapshot_count(&self) -> usize {
        self.tables.read().snapshots.values().map(Vec::len).sum()
    }
}

impl MatchStore for InMemoryStore {
    fn create_match(
        &self,
        match_id: &str,
        roster: &[RosterEntry],
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.matches.contains_key(match_id) {
            return Ok(());
        }

        let players = roster
            .iter()
            .cloned()
            .map(|entry| MatchPlayerRecord { entry, final_place: None })
            .collect();

        tables.matches.insert(
            match_id.to_string(),
            MatchRecord {
                match_id: match_id.to_string(),
                started_at,
                ended_at: None,
                winner: None,
                players,
            },
        );
        tables.snapshots.entry(match_id.to_string()).or_default();
        Ok(())
    }

    fn insert_snapshot(&self, match_id: &str, snapshot: &SnapshotUpdate) -> Result<()> {
        let (channel, payload) = match snapshot {
            SnapshotUpdate::Public(snap) => (Channel::Public, serde_json::to_value(snap)?),
            SnapshotUpdate::Private(snap) => (Channel::Private, serde_json::to_value(snap)?),
        };

        let mut tables = self.tables.write();
        if !tables.matches.contains_key(match_id) {
            return Err(StoreError::MatchNotFound(match_id.to_string()));
        }

        let id = tables.next_snapshot_id;
        tables.next_snapshot_id += 1;
        tables
            .snapshots
            .entry(match_id.to_string())
            .or_default()
            .push(StoredSnapshot {
                id,
                match_id: match_id.to_string(),
                channel,
                entity_id: snapshot.entity_id(),
                sequence_number: snapshot.sequence_number(),
                captured_at: snapshot.captured_at(),
                payload,
            });
        Ok(())
    }

    fn update_final_place(&self, match_id: &str, entity: EntityId, place: u32) -> Result<()> {
        let mut tables = self.tables.write();
        let Some(record) = tables.matches.get_mut(match_id) else {
            return Err(StoreError::MatchNotFound(match_id.to_string()));
        };
        let Some(player) = record.players.iter_mut().find(|p| p.entry.entity_id == entity) else {
            return Err(StoreError::PlayerNotFound {
                match_id: match_id.to_string(),
                entity,
            });
        };
        player.final_place = Some(place);
        Ok(())
    }

    fn close_match(
        &self,
        match_id: &str,
        winner: Option<EntityId>,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        let Some(record) = tables.matches.get_mut(match_id) else {
            return Err(StoreError::MatchNotFound(match_id.to_string()));
        };

        if let Some(winner) = winner {
            let Some(player) = record.players.iter_mut().find(|p| p.entry.entity_id == winner) else {
                return Err(StoreError::PlayerNotFound {
                    match_id: match_id.to_string(),
                    entity: winner,
                });
            };
            player.final_place = Some(1);
            record.winner = Some(winner);
        }
        record.ended_at = Some(ended_at);
        Ok(())
    }

    fn delete_match(&self, match_id: &str) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.matches.remove(match_id).is_none() {
            return Err(StoreError::MatchNotFound(match_id.to_string()));
        }
        tables.snapshots.remove(match_id);
        Ok(())
    }

    fn list_matches(&self) -> Result<Vec<MatchRecord>> {
        let tables = self.tables.read();
        let mut matches: Vec<MatchRecord> = tables.matches.values().cloned().collect();
        matches.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(matches)
    }

    fn match_snapshots(&self, match_id: &str) -> Result<Vec<StoredSnapshot>> {
        let tables = self.tables.read();
        if !tables.matches.contains_key(match_id) {
            return Err(StoreError::MatchNotFound(match_id.to_string()));
        }
        Ok(tables.snapshots.get(match_id).cloned().unwrap_or_default())
    }
}
