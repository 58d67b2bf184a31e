//! Active Match State
//!
//! Everything known about the one match being tracked: roster, latest
//! snapshot per entity, sequence counters, round clock, combat history
//! and the change log. Owned by the engine; no globals.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::entity::EntityId;
use crate::core::hash::compute_match_id;
use crate::game::buffer::CommittedRoster;
use crate::game::changes::{ChangeEvent, ChangeTracker};
use crate::game::combat::{CombatDetector, CombatRecord};
use crate::game::round::{RoundTracker, RoundTransition};
use crate::game::sequence::Sequencer;
use crate::game::snapshot::{
    PlayerSnapshot, PrivateSnapshot, RoundContext, STARTING_HEALTH,
};

/// Resting phase of the engine.
///
/// Ending and abandonment are transitions, not resting phases: the
/// engine reports them as [`LifecycleEvent`]s and is back in `NoMatch`
/// before the payload finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// Nothing buffered, no match.
    NoMatch,
    /// Collecting candidates.
    Buffering,
    /// A match is being tracked.
    Active,
}

/// A lifecycle transition caused by one payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Quorum reached.
    Started {
        /// New match id
        match_id: String,
    },
    /// Match reached a terminal state.
    Ended {
        /// Match id
        match_id: String,
        /// Inferred winner
        winner: Option<EntityId>,
    },
    /// Match presumed abandoned.
    Abandoned {
        /// Match id
        match_id: String,
        /// Why
        reason: String,
    },
}

/// One confirmed participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Entity id
    pub entity_id: EntityId,
    /// Seat
    pub player_slot: u32,
    /// Human persona name
    pub persona_name: Option<String>,
    /// Bot persona name
    pub bot_persona_name: Option<String>,
    /// Human flag
    pub is_human_player: bool,
}

impl From<&PlayerSnapshot> for RosterEntry {
    fn from(snap: &PlayerSnapshot) -> Self {
        Self {
            entity_id: snap.entity_id,
            player_slot: snap.player_slot,
            persona_name: snap.persona_name.clone(),
            bot_persona_name: snap.bot_persona_name.clone(),
            is_human_player: snap.is_human_player,
        }
    }
}

/// Compact view of the active match for broadcasts and status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSummary {
    /// Match id
    pub match_id: String,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// Round clock
    pub round: RoundContext,
    /// Entity driving the round clock
    pub tracked_entity: Option<EntityId>,
    /// Roster size
    pub player_count: usize,
    /// Inferred winner, once known
    pub winner: Option<EntityId>,
}

/// Effects of one applied public update.
#[derive(Debug, Clone, Default)]
pub struct AppliedUpdate {
    /// Change events against the entity's previous snapshot
    pub changes: Vec<ChangeEvent>,
    /// Combat resolved by this update
    pub combat: Option<CombatRecord>,
    /// Round clock change
    pub transition: Option<RoundTransition>,
    /// New non-zero final place, if it changed
    pub final_place: Option<u32>,
}

/// How a match reached its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Runner-up reported; the remaining entity was given first place.
    Winner(EntityId),
    /// Every entity has a final place.
    AllPlaced,
}

/// State of the active match.
#[derive(Debug, Clone)]
pub struct MatchState {
    match_id: String,
    started_at: DateTime<Utc>,
    roster: Vec<RosterEntry>,
    players: BTreeMap<EntityId, PlayerSnapshot>,
    private: Option<PrivateSnapshot>,
    sequencer: Sequencer,
    rounds: RoundTracker,
    combats: CombatDetector,
    changes: ChangeTracker,
    winner: Option<EntityId>,
    completed: bool,
}

impl MatchState {
    /// Start a match from a committed roster.
    ///
    /// The committed snapshots become the first state of each entity and
    /// seed the sequence counters and change baselines.
    pub fn start(committed: CommittedRoster, started_at: DateTime<Utc>) -> Self {
        let match_id = compute_match_id(&committed.slots());
        let roster = committed.snapshots.iter().map(RosterEntry::from).collect();

        let mut state = Self {
            match_id,
            started_at,
            roster,
            players: BTreeMap::new(),
            private: None,
            sequencer: Sequencer::new(),
            rounds: RoundTracker::new(),
            combats: CombatDetector::new(),
            changes: ChangeTracker::new(),
            winner: None,
            completed: false,
        };

        let context = state.rounds.context();
        for mut snap in committed.snapshots {
            snap.round = Some(context);
            state.sequencer.accept_public(snap.entity_id, snap.sequence_number);
            state.changes.seed(&snap);
            state.players.insert(snap.entity_id, snap);
        }

        if let Some(private) = committed.private {
            state.sequencer.accept_private(private.sequence_number);
            state.private = Some(private);
        }

        state
    }

    /// Match id.
    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    /// Start time.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Confirmed roster, in entity order.
    pub fn roster(&self) -> &[RosterEntry] {
        &self.roster
    }

    /// Latest snapshot per entity.
    pub fn players(&self) -> &BTreeMap<EntityId, PlayerSnapshot> {
        &self.players
    }

    /// Latest snapshot of one entity.
    pub fn player(&self, entity: &EntityId) -> Option<&PlayerSnapshot> {
        self.players.get(entity)
    }

    /// Latest private snapshot.
    pub fn private(&self) -> Option<&PrivateSnapshot> {
        self.private.as_ref()
    }

    /// Whether the entity is part of this match.
    pub fn contains(&self, entity: &EntityId) -> bool {
        self.players.contains_key(entity)
    }

    /// Current round clock.
    pub fn round(&self) -> RoundContext {
        self.rounds.context()
    }

    /// Change log of this match.
    pub fn changes(&self) -> &ChangeTracker {
        &self.changes
    }

    /// Combat history of one entity.
    pub fn combat_history(&self, entity: &EntityId) -> &[CombatRecord] {
        self.combats.history(entity)
    }

    /// Inferred winner.
    pub fn winner(&self) -> Option<EntityId> {
        self.winner
    }

    /// Whether completion has already fired.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Roster and sequence gate for a public update.
    ///
    /// Entities outside the roster are ignored. On accept the sequence
    /// counter is already advanced.
    pub fn accept_public(&mut self, snapshot: &PlayerSnapshot) -> bool {
        self.contains(&snapshot.entity_id)
            && self
                .sequencer
                .accept_public(snapshot.entity_id, snapshot.sequence_number)
    }

    /// Whether an update from the client owner means a new local game
    /// has started over this one. Returns the reason if so.
    pub fn owner_reset_reason(&self, owner: EntityId, snapshot: &PlayerSnapshot) -> Option<String> {
        if snapshot.entity_id != owner {
            return None;
        }
        let previous = self.players.get(&owner)?;

        if snapshot.health == STARTING_HEALTH && previous.health < STARTING_HEALTH {
            return Some(format!(
                "Client owner started new game (health {} -> {})",
                previous.health, snapshot.health
            ));
        }

        if previous.player_slot != 0
            && snapshot.player_slot != 0
            && snapshot.player_slot != previous.player_slot
        {
            return Some(format!(
                "Client owner started new game (slot {} -> {})",
                previous.player_slot, snapshot.player_slot
            ));
        }

        None
    }

    /// Apply an accepted public update.
    ///
    /// The snapshot is stored first, then the round clock, combat
    /// detector and change detector run against it.
    pub fn apply_public(&mut self, mut snapshot: PlayerSnapshot) -> AppliedUpdate {
        let entity = snapshot.entity_id;
        let previous_place = self.players.get(&entity).map_or(0, |p| p.final_place);
        let round_before = self.rounds.round();

        self.players.insert(entity, snapshot.clone());
        let transition = self.rounds.observe(&snapshot, &self.players);

        snapshot.round = Some(self.rounds.context());
        self.players.insert(entity, snapshot.clone());

        let combat = self.combats.observe(&snapshot, &self.players, round_before);
        let changes = self.changes.observe(&snapshot);

        let final_place = (snapshot.final_place != 0 && snapshot.final_place != previous_place)
            .then_some(snapshot.final_place);

        AppliedUpdate { changes, combat, transition, final_place }
    }

    /// Apply a private update. Returns false if it was stale.
    pub fn apply_private(&mut self, snapshot: PrivateSnapshot) -> bool {
        if !self.sequencer.accept_private(snapshot.sequence_number) {
            return false;
        }
        self.private = Some(snapshot);
        true
    }

    /// Decide whether the match is over. Fires at most once per match.
    ///
    /// A runner-up with no winner yet gives first place to the lowest-id
    /// entity still unplaced. Otherwise the match ends once every entity
    /// has a place.
    pub fn check_completion(&mut self) -> Option<Completion> {
        if self.completed || self.players.is_empty() {
            return None;
        }

        let runner_up = self.players.values().any(|p| p.final_place == 2);
        let has_winner = self.players.values().any(|p| p.final_place == 1);

        if runner_up && !has_winner {
            let remaining = self
                .players
                .values()
                .find(|p| !p.is_placed())
                .map(|p| p.entity_id);

            if let Some(winner) = remaining {
                if let Some(snap) = self.players.get_mut(&winner) {
                    snap.final_place = 1;
                }
                self.winner = Some(winner);
                self.completed = true;
                return Some(Completion::Winner(winner));
            }
        }

        if self.players.values().all(PlayerSnapshot::is_placed) {
            self.completed = true;
            return Some(Completion::AllPlaced);
        }

        None
    }

    /// Combats resolved since the last publish.
    pub fn drain_combats(&mut self) -> Vec<CombatRecord> {
        self.combats.drain_pending()
    }

    /// Compact summary.
    pub fn summary(&self) -> MatchSummary {
        MatchSummary {
            match_id: self.match_id.clone(),
            started_at: self.started_at,
            round: self.rounds.context(),
            tracked_entity: self.rounds.tracked(),
            player_count: self.players.len(),
            winner: self.winner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::buffer::PreMatchBuffer;
    use crate::game::snapshot::fixtures::{base_time, fresh, private};
    use crate::game::snapshot::RoundPhase;

    fn started() -> MatchState {
        let mut buffer = PreMatchBuffer::default();
        for i in 1..=8 {
            buffer.offer_public(fresh(i, i as u32, 1));
        }
        buffer.offer_private(private(1, base_time()));
        let committed = buffer.commit().unwrap();
        MatchState::start(committed, base_time())
    }

    fn next(state: &MatchState, id: i64) -> PlayerSnapshot {
        let mut snap = state.player(&EntityId::new(id)).unwrap().clone();
        snap.sequence_number += 1;
        snap
    }

    fn apply(state: &mut MatchState, snap: PlayerSnapshot) -> Option<AppliedUpdate> {
        state.accept_public(&snap).then(|| state.apply_public(snap))
    }

    #[test]
    fn test_start_seeds_state() {
        let state = started();
        assert_eq!(state.players().len(), 8);
        assert_eq!(state.roster().len(), 8);
        assert_eq!(state.match_id().len(), 16);
        assert!(state.private().is_some());
        assert_eq!(state.round(), RoundContext { number: 1, phase: RoundPhase::Prep });
    }

    #[test]
    fn test_outsider_and_stale_rejected() {
        let mut state = started();
        assert!(!state.accept_public(&fresh(99, 1, 50)));
        assert!(!state.accept_public(&fresh(1, 1, 1)));
        assert!(state.accept_public(&fresh(1, 1, 2)));
    }

    #[test]
    fn test_apply_stamps_round_and_diffs() {
        let mut state = started();
        let mut snap = next(&state, 3);
        snap.health = 90;

        let applied = apply(&mut state, snap).unwrap();
        assert_eq!(applied.changes.len(), 1);
        assert_eq!(applied.changes[0].kind.name(), "hp_change");
        assert!(state.player(&EntityId::new(3)).unwrap().round.is_some());
    }

    #[test]
    fn test_final_place_reported_once() {
        let mut state = started();
        let mut snap = next(&state, 4);
        snap.final_place = 8;
        assert_eq!(apply(&mut state, snap).unwrap().final_place, Some(8));

        let again = next(&state, 4);
        assert_eq!(apply(&mut state, again).unwrap().final_place, None);
    }

    #[test]
    fn test_runner_up_assigns_winner_once() {
        let mut state = started();
        for (id, place) in (1..=6).zip([8u32, 7, 6, 5, 4, 3]) {
            let mut snap = next(&state, id);
            snap.final_place = place;
            apply(&mut state, snap);
            assert_eq!(state.check_completion(), None);
        }

        let mut snap = next(&state, 7);
        snap.final_place = 2;
        apply(&mut state, snap);

        assert_eq!(state.check_completion(), Some(Completion::Winner(EntityId::new(8))));
        assert_eq!(state.player(&EntityId::new(8)).unwrap().final_place, 1);
        assert_eq!(state.check_completion(), None);
        assert_eq!(state.winner(), Some(EntityId::new(8)));
    }

    #[test]
    fn test_all_placed_without_runner_up() {
        let mut state = started();
        for id in 1..=8 {
            let mut snap = next(&state, id);
            snap.final_place = if id == 1 { 1 } else { id as u32 + 1 };
            apply(&mut state, snap);
        }
        assert_eq!(state.check_completion(), Some(Completion::AllPlaced));
        assert!(state.is_completed());
    }

    #[test]
    fn test_owner_reset_detection() {
        let mut state = started();
        let owner = EntityId::new(2);

        let mut hurt = next(&state, 2);
        hurt.health = 60;
        apply(&mut state, hurt);

        let mut reset = next(&state, 2);
        reset.health = 100;
        assert!(state.owner_reset_reason(owner, &reset).is_some());
        assert!(state.owner_reset_reason(EntityId::new(3), &reset).is_none());

        let mut moved = next(&state, 2);
        moved.player_slot = 5;
        assert!(state.owner_reset_reason(owner, &moved).is_some());
    }

    #[test]
    fn test_private_sequence() {
        let mut state = started();
        assert!(!state.apply_private(private(1, base_time())));
        assert!(state.apply_private(private(2, base_time())));
    }
}
