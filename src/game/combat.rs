//! Combat Outcome Detection
//!
//! The telemetry never reports "a combat just ended". It reports running
//! win/loss/draw counters against the current opponent. A combat has
//! resolved whenever the counter sum for an (entity, opponent slot)
//! pair goes up.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::entity::EntityId;
use crate::game::snapshot::{CombatTally, PlayerSnapshot};

/// Outcome of one resolved combat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombatResult {
    /// Win
    Win,
    /// Loss
    Loss,
    /// Draw
    Draw,
}

/// One resolved combat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CombatRecord {
    /// Round the combat belongs to
    pub round: u32,
    /// Reporting entity
    pub entity_id: EntityId,
    /// Opponent entity
    pub opponent_account_id: EntityId,
    /// Opponent seat
    pub opponent_player_slot: u32,
    /// Result from the reporting entity's point of view
    pub result: CombatResult,
    /// Capture time of the update that revealed it
    pub timestamp: DateTime<Utc>,
}

/// Per-pairing counters plus combat history for one match.
#[derive(Debug, Clone, Default)]
pub struct CombatDetector {
    tallies: BTreeMap<(EntityId, u32), CombatTally>,
    history: BTreeMap<EntityId, Vec<CombatRecord>>,
    pending: Vec<CombatRecord>,
}

impl CombatDetector {
    /// Create an empty detector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed an accepted update.
    ///
    /// `players` is the current match view, used to resolve the opponent
    /// slot. The stored tally is updated even when the opponent cannot be
    /// resolved, so the same combat is never counted twice.
    pub fn observe(
        &mut self,
        updated: &PlayerSnapshot,
        players: &BTreeMap<EntityId, PlayerSnapshot>,
        round: u32,
    ) -> Option<CombatRecord> {
        let slot = updated.opponent_player_slot?;
        let current = updated.vs_opponent_record();
        let previous = self
            .tallies
            .insert((updated.entity_id, slot), current)
            .unwrap_or_default();

        if current.total() <= previous.total() {
            return None;
        }

        let result = if current.wins > previous.wins {
            CombatResult::Win
        } else if current.losses > previous.losses {
            CombatResult::Loss
        } else {
            CombatResult::Draw
        };

        let opponent = players
            .values()
            .find(|p| p.entity_id != updated.entity_id && p.player_slot == slot)?;

        let record = CombatRecord {
            round,
            entity_id: updated.entity_id,
            opponent_account_id: opponent.entity_id,
            opponent_player_slot: slot,
            result,
            timestamp: updated.captured_at,
        };

        self.history
            .entry(updated.entity_id)
            .or_default()
            .push(record.clone());
        self.pending.push(record.clone());
        Some(record)
    }

    /// Full combat history of one entity.
    pub fn history(&self, entity: &EntityId) -> &[CombatRecord] {
        self.history.get(entity).map_or(&[], Vec::as_slice)
    }

    /// Combats resolved since the last drain.
    pub fn drain_pending(&mut self) -> Vec<CombatRecord> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::snapshot::fixtures::fresh;

    fn players() -> BTreeMap<EntityId, PlayerSnapshot> {
        let mut map = BTreeMap::new();
        let me = fresh(1, 1, 1);
        let them = fresh(77, 4, 1);
        map.insert(me.entity_id, me);
        map.insert(them.entity_id, them);
        map
    }

    fn with_record(wins: u32, losses: u32, draws: u32, slot: u32) -> PlayerSnapshot {
        let mut snap = fresh(1, 1, 2);
        snap.opponent_player_slot = Some(slot);
        snap.vs_opponent_wins = wins;
        snap.vs_opponent_losses = losses;
        snap.vs_opponent_draws = draws;
        snap
    }

    #[test]
    fn test_win_against_resolved_opponent() {
        let players = players();
        let mut detector = CombatDetector::new();

        assert!(detector.observe(&with_record(2, 1, 0, 4), &players, 5).is_some());
        let record = detector.observe(&with_record(3, 1, 0, 4), &players, 6).unwrap();

        assert_eq!(record.result, CombatResult::Win);
        assert_eq!(record.opponent_account_id, EntityId::new(77));
        assert_eq!(record.round, 6);
    }

    #[test]
    fn test_unchanged_tally_emits_nothing() {
        let players = players();
        let mut detector = CombatDetector::new();

        detector.observe(&with_record(1, 0, 0, 4), &players, 1);
        assert!(detector.observe(&with_record(1, 0, 0, 4), &players, 1).is_none());
    }

    #[test]
    fn test_loss_and_draw_labels() {
        let players = players();
        let mut detector = CombatDetector::new();

        detector.observe(&with_record(0, 0, 0, 4), &players, 1);
        let loss = detector.observe(&with_record(0, 1, 0, 4), &players, 2).unwrap();
        let draw = detector.observe(&with_record(0, 1, 1, 4), &players, 3).unwrap();

        assert_eq!(loss.result, CombatResult::Loss);
        assert_eq!(draw.result, CombatResult::Draw);
    }

    #[test]
    fn test_unknown_opponent_still_updates_tally() {
        let players = players();
        let mut detector = CombatDetector::new();

        assert!(detector.observe(&with_record(1, 0, 0, 6), &players, 1).is_none());
        // Same counters reported again once slot 6 is known must not
        // produce a late record.
        let mut later = players.clone();
        let ghost = fresh(66, 6, 1);
        later.insert(ghost.entity_id, ghost);
        assert!(detector.observe(&with_record(1, 0, 0, 6), &later, 1).is_none());
        assert!(detector.history(&EntityId::new(1)).is_empty());
    }

    #[test]
    fn test_history_and_pending_drain() {
        let players = players();
        let mut detector = CombatDetector::new();

        detector.observe(&with_record(1, 0, 0, 4), &players, 1);
        detector.observe(&with_record(1, 1, 0, 4), &players, 2);

        assert_eq!(detector.drain_pending().len(), 2);
        assert!(detector.drain_pending().is_empty());
        assert_eq!(detector.history(&EntityId::new(1)).len(), 2);
    }

    #[test]
    fn test_no_opponent_slot() {
        let players = players();
        let mut detector = CombatDetector::new();
        let snap = fresh(1, 1, 2);
        assert!(detector.observe(&snap, &players, 1).is_none());
    }
}
