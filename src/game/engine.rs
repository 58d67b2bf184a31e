//! Live Match Engine
//!
//! Owns the lifecycle: buffering candidates before a match, committing
//! the roster at quorum, applying updates to the active match, and
//! ending or abandoning it. One payload is processed at a time by
//! whoever holds the engine; persistence and broadcast are handed off
//! and never awaited.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::core::entity::EntityId;
use crate::game::buffer::{CommittedRoster, PreMatchBuffer};
use crate::game::changes::ChangeEvent;
use crate::game::combat::CombatRecord;
use crate::game::normalize::SnapshotUpdate;
use crate::game::round::RoundTransition;
use crate::game::snapshot::{PlayerSnapshot, PrivateSnapshot};
use crate::game::state::{
    Completion, LifecycleEvent, LifecyclePhase, MatchState, MatchSummary,
};
use crate::network::protocol::{extract_updates, GsiPayload, MatchUpdate, ServerMessage};
use crate::network::publisher::Publisher;
use crate::store::{PersistenceHandle, WriteIntent};

/// Engine shared between the ingest tasks and the API. Holding the lock
/// for a whole payload keeps payloads from interleaving.
pub type SharedEngine = Arc<tokio::sync::Mutex<LiveMatchEngine>>;

/// Engine errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The operation would touch the match currently being tracked.
    #[error("match {0} is active")]
    MatchActive(String),
}

/// What one payload did.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    /// Updates that passed the gates and changed state
    pub accepted: usize,
    /// Lifecycle transitions, in order
    pub events: Vec<LifecycleEvent>,
    /// Messages handed to the publisher
    pub published: usize,
}

/// Engine status for the API.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Resting phase
    pub phase: LifecyclePhase,
    /// Active match, if any
    pub current_match: Option<MatchSummary>,
    /// Distinct candidates waiting for quorum
    pub candidates: usize,
    /// Payloads processed since boot
    pub payloads_processed: u64,
    /// Matches started since boot
    pub matches_started: u64,
    /// When the last payload arrived
    pub last_payload_at: Option<DateTime<Utc>>,
    /// Write intents not yet applied
    pub persistence_queue_depth: usize,
}

// Effects accumulated while one payload is processed.
#[derive(Default)]
struct PayloadEffects {
    outcome: ProcessOutcome,
    updated: bool,
    changes: Vec<ChangeEvent>,
}

/// The live match engine.
pub struct LiveMatchEngine {
    config: EngineConfig,
    buffer: PreMatchBuffer,
    active: Option<MatchState>,
    persistence: PersistenceHandle,
    publisher: Arc<dyn Publisher>,
    payloads_processed: u64,
    matches_started: u64,
    last_payload_at: Option<DateTime<Utc>>,
}

impl LiveMatchEngine {
    /// Create an idle engine.
    pub fn new(
        config: EngineConfig,
        persistence: PersistenceHandle,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            buffer: PreMatchBuffer::new(config.quorum, config.buffer_cap),
            config,
            active: None,
            persistence,
            publisher,
            payloads_processed: 0,
            matches_started: 0,
            last_payload_at: None,
        }
    }

    /// Current resting phase.
    pub fn phase(&self) -> LifecyclePhase {
        if self.active.is_some() {
            LifecyclePhase::Active
        } else if !self.buffer.is_empty() {
            LifecyclePhase::Buffering
        } else {
            LifecyclePhase::NoMatch
        }
    }

    /// The active match, if any.
    pub fn active_match(&self) -> Option<&MatchState> {
        self.active.as_ref()
    }

    /// Process one pushed payload.
    pub fn process_payload(
        &mut self,
        payload: &GsiPayload,
        received_at: DateTime<Utc>,
    ) -> ProcessOutcome {
        let updates = extract_updates(payload, received_at);
        debug!(records = payload.record_count(), updates = updates.len(), "Payload received");
        self.process_updates(updates, received_at)
    }

    /// Process the normalized updates of one payload, in order.
    ///
    /// At most one `MatchUpdate` is published per payload, after every
    /// update has been applied.
    #[instrument(skip_all, fields(updates = updates.len()))]
    pub fn process_updates(
        &mut self,
        updates: Vec<SnapshotUpdate>,
        received_at: DateTime<Utc>,
    ) -> ProcessOutcome {
        self.payloads_processed += 1;
        self.last_payload_at = Some(received_at);

        let mut effects = PayloadEffects::default();
        for update in updates {
            match update {
                SnapshotUpdate::Private(snap) => self.handle_private(snap, &mut effects),
                SnapshotUpdate::Public(snap) => {
                    self.handle_public(snap, received_at, &mut effects)
                }
            }
        }

        if effects.updated {
            let changes = std::mem::take(&mut effects.changes);
            if let Some(state) = self.active.as_mut() {
                let update = live_update(state, changes);
                self.publisher.publish(ServerMessage::MatchUpdate(update));
                effects.outcome.published += 1;
            }
        }

        effects.outcome
    }

    fn handle_private(&mut self, snap: PrivateSnapshot, effects: &mut PayloadEffects) {
        let Some(state) = self.active.as_mut() else {
            self.buffer.offer_private(snap);
            return;
        };

        if !state.apply_private(snap.clone()) {
            return;
        }

        self.persistence.submit(WriteIntent::InsertSnapshot {
            match_id: state.match_id().to_string(),
            snapshot: SnapshotUpdate::Private(snap),
        });
        effects.outcome.accepted += 1;
        effects.updated = true;
    }

    fn handle_public(
        &mut self,
        snap: PlayerSnapshot,
        received_at: DateTime<Utc>,
        effects: &mut PayloadEffects,
    ) {
        let Some(state) = self.active.as_mut() else {
            self.offer_candidate(snap, received_at, effects);
            return;
        };

        if !state.accept_public(&snap) {
            return;
        }

        let reset_reason = self
            .config
            .owner
            .and_then(|owner| state.owner_reset_reason(owner, &snap));
        if let Some(reason) = reset_reason {
            self.abandon_active(reason, received_at, effects);
            return;
        }

        let entity = snap.entity_id;
        let applied = state.apply_public(snap);
        let match_id = state.match_id().to_string();

        if let Some(stored) = state.player(&entity) {
            self.persistence.submit(WriteIntent::InsertSnapshot {
                match_id: match_id.clone(),
                snapshot: SnapshotUpdate::Public(stored.clone()),
            });
        }

        if let Some(place) = applied.final_place {
            info!(match_id = %match_id, entity = %entity, place, "Final place reported");
            self.persistence.submit(WriteIntent::UpdateFinalPlace {
                match_id: match_id.clone(),
                entity,
                place,
            });
        }

        match applied.transition {
            Some(RoundTransition::CombatStarted { round }) => {
                debug!(round, "Combat phase started");
            }
            Some(RoundTransition::RoundAdvanced { round, tracked }) => {
                debug!(round, tracked = ?tracked, "Round advanced");
            }
            None => {}
        }

        if let Some(combat) = &applied.combat {
            debug!(
                entity = %combat.entity_id,
                opponent = %combat.opponent_account_id,
                result = ?combat.result,
                "Combat resolved"
            );
        }

        effects.changes.extend(applied.changes);
        effects.outcome.accepted += 1;
        effects.updated = true;

        if let Some(completion) = state.check_completion() {
            self.finish_match(completion, received_at, effects);
        }
    }

    fn offer_candidate(
        &mut self,
        snap: PlayerSnapshot,
        received_at: DateTime<Utc>,
        effects: &mut PayloadEffects,
    ) {
        if !self.buffer.offer_public(snap) {
            return;
        }

        if let Some(committed) = self.buffer.commit() {
            self.start_match(committed, received_at, effects);
        }
    }

    fn start_match(
        &mut self,
        committed: CommittedRoster,
        started_at: DateTime<Utc>,
        effects: &mut PayloadEffects,
    ) {
        if committed.private.is_none() {
            debug!("No current private snapshot at match start");
        }

        let state = MatchState::start(committed, started_at);
        let match_id = state.match_id().to_string();

        self.persistence.submit(WriteIntent::CreateMatch {
            match_id: match_id.clone(),
            roster: state.roster().to_vec(),
            started_at,
        });
        for snap in state.players().values() {
            self.persistence.submit(WriteIntent::InsertSnapshot {
                match_id: match_id.clone(),
                snapshot: SnapshotUpdate::Public(snap.clone()),
            });
        }
        if let Some(private) = state.private() {
            self.persistence.submit(WriteIntent::InsertSnapshot {
                match_id: match_id.clone(),
                snapshot: SnapshotUpdate::Private(private.clone()),
            });
        }

        self.matches_started += 1;
        info!(match_id = %match_id, players = state.players().len(), "Match started");

        self.active = Some(state);
        effects.outcome.accepted += self.config.quorum;
        effects.outcome.events.push(LifecycleEvent::Started { match_id });
        effects.updated = true;
    }

    fn finish_match(
        &mut self,
        completion: Completion,
        ended_at: DateTime<Utc>,
        effects: &mut PayloadEffects,
    ) {
        let Some(mut state) = self.active.take() else {
            return;
        };

        let winner = match completion {
            Completion::Winner(winner) => Some(winner),
            Completion::AllPlaced => state.winner().or_else(|| {
                state
                    .players()
                    .values()
                    .find(|p| p.final_place == 1)
                    .map(|p| p.entity_id)
            }),
        };
        let match_id = state.match_id().to_string();

        self.persistence.submit(WriteIntent::CloseMatch {
            match_id: match_id.clone(),
            winner,
            ended_at,
        });

        let update = live_update(&mut state, std::mem::take(&mut effects.changes));
        self.publisher.publish(ServerMessage::MatchUpdate(update));
        self.publisher.publish(ServerMessage::MatchEnded {
            match_id: match_id.clone(),
            winner,
            timestamp: ended_at,
        });
        effects.outcome.published += 2;

        info!(match_id = %match_id, winner = ?winner, "Match ended");

        self.buffer.clear();
        effects.updated = false;
        effects.outcome.events.push(LifecycleEvent::Ended { match_id, winner });
    }

    fn abandon_active(
        &mut self,
        reason: String,
        at: DateTime<Utc>,
        effects: &mut PayloadEffects,
    ) -> Option<String> {
        let state = self.active.take()?;
        let match_id = state.match_id().to_string();

        self.persistence.submit(WriteIntent::CloseMatch {
            match_id: match_id.clone(),
            winner: None,
            ended_at: at,
        });
        self.publisher.publish(ServerMessage::MatchAbandoned {
            match_id: match_id.clone(),
            reason: reason.clone(),
            timestamp: at,
        });
        effects.outcome.published += 1;

        warn!(match_id = %match_id, reason = %reason, "Match abandoned");

        self.buffer.clear();
        effects.updated = false;
        effects.changes.clear();
        effects.outcome.events.push(LifecycleEvent::Abandoned {
            match_id: match_id.clone(),
            reason,
        });
        Some(match_id)
    }

    /// Abandon the active match by hand. Returns its id, or `None` if no
    /// match was active.
    pub fn abandon(&mut self, reason: impl Into<String>, at: DateTime<Utc>) -> Option<String> {
        let mut effects = PayloadEffects::default();
        self.abandon_active(reason.into(), at, &mut effects)
    }

    /// Queue deletion of a stored match. The active match cannot be
    /// deleted.
    pub fn delete_match(&self, match_id: &str) -> Result<(), EngineError> {
        if self.active.as_ref().is_some_and(|s| s.match_id() == match_id) {
            return Err(EngineError::MatchActive(match_id.to_string()));
        }
        self.persistence.submit(WriteIntent::DeleteMatch {
            match_id: match_id.to_string(),
        });
        Ok(())
    }

    /// Live change log of the active match, newest first.
    pub fn changes(&self, entity: Option<EntityId>, limit: Option<usize>) -> Vec<ChangeEvent> {
        self.active
            .as_ref()
            .map(|s| s.changes().get_changes(entity, limit))
            .unwrap_or_default()
    }

    /// Full combat history of one entity in the active match.
    pub fn combat_history(&self, entity: &EntityId) -> Vec<CombatRecord> {
        self.active
            .as_ref()
            .map(|s| s.combat_history(entity).to_vec())
            .unwrap_or_default()
    }

    /// Current view for a subscriber that just asked for it.
    ///
    /// Pending combats stay queued for the next broadcast.
    pub fn current_view(&self) -> Option<MatchUpdate> {
        self.active.as_ref().map(|state| MatchUpdate {
            match_info: state.summary(),
            public_player_states: state.players().values().cloned().collect(),
            private_player_state: state.private().cloned(),
            round: state.round(),
            new_combats: Vec::new(),
            changes: Vec::new(),
        })
    }

    /// Status for the API.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            phase: self.phase(),
            current_match: self.active.as_ref().map(MatchState::summary),
            candidates: self.buffer.candidate_count(),
            payloads_processed: self.payloads_processed,
            matches_started: self.matches_started,
            last_payload_at: self.last_payload_at,
            persistence_queue_depth: self.persistence.pending(),
        }
    }
}

fn live_update(state: &mut MatchState, changes: Vec<ChangeEvent>) -> MatchUpdate {
    MatchUpdate {
        new_combats: state.drain_combats(),
        match_info: state.summary(),
        public_player_states: state.players().values().cloned().collect(),
        private_player_state: state.private().cloned(),
        round: state.round(),
        changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::snapshot::fixtures::{base_time, fresh, private, unit};
    use crate::game::snapshot::RoundPhase;
    use crate::network::publisher::RecordingPublisher;
    use crate::store::{InMemoryStore, PersistenceWorker};
    use chrono::Duration;

    struct Harness {
        engine: LiveMatchEngine,
        publisher: RecordingPublisher,
        store: InMemoryStore,
        worker: Option<PersistenceWorker>,
    }

    fn harness(config: EngineConfig) -> Harness {
        let store = InMemoryStore::new();
        let (worker, handle) = PersistenceWorker::new(Arc::new(store.clone()));
        let publisher = RecordingPublisher::new();
        let engine = LiveMatchEngine::new(config, handle, Arc::new(publisher.clone()));
        Harness { engine, publisher, store, worker: Some(worker) }
    }

    fn roster_updates() -> Vec<SnapshotUpdate> {
        (1..=8)
            .map(|i| SnapshotUpdate::Public(fresh(i, i as u32, 1)))
            .collect()
    }

    fn started(config: EngineConfig) -> Harness {
        let mut h = harness(config);
        h.engine.process_updates(roster_updates(), base_time());
        h.publisher.take();
        h
    }

    fn next(h: &Harness, id: i64) -> PlayerSnapshot {
        let mut snap = h
            .engine
            .active_match()
            .and_then(|s| s.player(&EntityId::new(id)))
            .cloned()
            .unwrap();
        snap.sequence_number += 1;
        snap.round = None;
        snap
    }

    #[test]
    fn test_quorum_starts_match() {
        let mut h = harness(EngineConfig::default());
        assert_eq!(h.engine.phase(), LifecyclePhase::NoMatch);

        let mut updates = roster_updates();
        let last = updates.pop().unwrap();
        let outcome = h.engine.process_updates(updates, base_time());
        assert!(outcome.events.is_empty());
        assert_eq!(h.engine.phase(), LifecyclePhase::Buffering);

        let outcome = h.engine.process_updates(vec![last], base_time());
        assert!(matches!(outcome.events[..], [LifecycleEvent::Started { .. }]));
        assert_eq!(h.engine.phase(), LifecyclePhase::Active);
        assert_eq!(outcome.published, 1);
        assert_eq!(h.engine.status().matches_started, 1);
    }

    #[test]
    fn test_non_fresh_snapshots_do_not_count() {
        let mut h = harness(EngineConfig::default());
        let mut updates = roster_updates();
        if let SnapshotUpdate::Public(snap) = &mut updates[7] {
            snap.wins = 3;
        }
        h.engine.process_updates(updates, base_time());
        assert_eq!(h.engine.phase(), LifecyclePhase::Buffering);
        assert_eq!(h.engine.status().candidates, 7);
    }

    #[test]
    fn test_rest_of_payload_applies_to_new_match() {
        let mut h = harness(EngineConfig::default());
        let mut updates = roster_updates();
        let mut later = fresh(3, 3, 2);
        later.gold = 3;
        updates.push(SnapshotUpdate::Public(later));

        let outcome = h.engine.process_updates(updates, base_time());
        assert_eq!(outcome.accepted, 9);
        let state = h.engine.active_match().unwrap();
        assert_eq!(state.player(&EntityId::new(3)).unwrap().gold, 3);
    }

    #[test]
    fn test_duplicate_and_outsider_ignored() {
        let mut h = started(EngineConfig::default());

        let outcome = h.engine.process_updates(
            vec![
                SnapshotUpdate::Public(fresh(2, 2, 1)),
                SnapshotUpdate::Public(fresh(42, 3, 9)),
            ],
            base_time(),
        );
        assert_eq!(outcome.accepted, 0);
        assert_eq!(outcome.published, 0);
        assert!(h.publisher.is_empty());
    }

    #[test]
    fn test_one_broadcast_per_payload() {
        let mut h = started(EngineConfig::default());
        let mut a = next(&h, 1);
        a.health = 90;
        let mut b = next(&h, 2);
        b.gold = 10;

        let outcome = h.engine.process_updates(
            vec![SnapshotUpdate::Public(a), SnapshotUpdate::Public(b)],
            base_time(),
        );
        assert_eq!(outcome.accepted, 2);

        let messages = h.publisher.take();
        assert_eq!(messages.len(), 1);
        let ServerMessage::MatchUpdate(update) = &messages[0] else {
            panic!("expected match update");
        };
        assert_eq!(update.public_player_states.len(), 8);
        assert_eq!(update.changes.len(), 1);
        assert_eq!(update.changes[0].kind.name(), "hp_change");
    }

    #[test]
    fn test_round_clock_and_combat_flow() {
        let mut h = started(EngineConfig::default());
        let tracked = EntityId::new(1);

        let mut prep = next(&h, 1);
        prep.gold = 4;
        h.engine.process_updates(vec![SnapshotUpdate::Public(prep)], base_time());
        assert_eq!(
            h.engine.active_match().unwrap().summary().tracked_entity,
            Some(tracked)
        );

        let mut combat = next(&h, 1);
        combat.combat_type = 1;
        combat.opponent_player_slot = Some(5);
        h.engine.process_updates(vec![SnapshotUpdate::Public(combat)], base_time());
        assert_eq!(
            h.engine.active_match().unwrap().round().phase,
            RoundPhase::Combat
        );

        let mut done = next(&h, 1);
        done.combat_type = 0;
        done.vs_opponent_wins = 1;
        h.engine.process_updates(vec![SnapshotUpdate::Public(done)], base_time());

        let state = h.engine.active_match().unwrap();
        assert_eq!(state.round().number, 2);
        assert_eq!(state.round().phase, RoundPhase::Prep);
        assert_eq!(h.engine.combat_history(&tracked).len(), 1);

        let messages = h.publisher.take();
        let ServerMessage::MatchUpdate(update) = messages.last().unwrap() else {
            panic!("expected match update");
        };
        assert_eq!(update.new_combats.len(), 1);
        assert_eq!(update.new_combats[0].round, 1);
        assert_eq!(update.new_combats[0].opponent_account_id, EntityId::new(5));
    }

    #[test]
    fn test_runner_up_ends_match() {
        let mut h = started(EngineConfig::default());
        let mut updates = Vec::new();
        for (id, place) in (1..=7).zip([8u32, 7, 6, 5, 4, 3, 2]) {
            let mut snap = next(&h, id);
            snap.final_place = place;
            updates.push(SnapshotUpdate::Public(snap));
        }

        let outcome = h.engine.process_updates(updates, base_time());
        let winner = EntityId::new(8);
        assert!(outcome.events.iter().any(|e| matches!(
            e,
            LifecycleEvent::Ended { winner: Some(w), .. } if *w == winner
        )));
        assert_eq!(h.engine.phase(), LifecyclePhase::NoMatch);

        let messages = h.publisher.take();
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], ServerMessage::MatchUpdate(_)));
        assert!(matches!(messages[1], ServerMessage::MatchEnded { winner: Some(w), .. } if w == winner));
    }

    #[test]
    fn test_updates_after_end_buffer_for_next_match() {
        let mut h = started(EngineConfig::default());
        h.engine.abandon("manual", base_time());
        assert_eq!(h.engine.phase(), LifecyclePhase::NoMatch);

        h.engine.process_updates(vec![SnapshotUpdate::Public(fresh(3, 3, 1))], base_time());
        assert_eq!(h.engine.phase(), LifecyclePhase::Buffering);
    }

    #[test]
    fn test_owner_health_reset_abandons() {
        let owner = EntityId::new(4);
        let mut h = started(EngineConfig { owner: Some(owner), ..EngineConfig::default() });

        let mut hurt = next(&h, 4);
        hurt.health = 70;
        h.engine.process_updates(vec![SnapshotUpdate::Public(hurt)], base_time());
        h.publisher.take();

        let mut reset = next(&h, 4);
        reset.health = 100;
        let match_id = h.engine.active_match().unwrap().match_id().to_string();
        let outcome = h.engine.process_updates(vec![SnapshotUpdate::Public(reset)], base_time());

        assert_eq!(
            outcome.events,
            vec![LifecycleEvent::Abandoned {
                match_id,
                reason: "Client owner started new game (health 70 -> 100)".into(),
            }]
        );
        assert_eq!(h.engine.phase(), LifecyclePhase::NoMatch);
        let messages = h.publisher.take();
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], ServerMessage::MatchAbandoned { .. }));
    }

    #[test]
    fn test_owner_heuristic_disabled_without_owner() {
        let mut h = started(EngineConfig::default());
        let mut hurt = next(&h, 4);
        hurt.health = 70;
        h.engine.process_updates(vec![SnapshotUpdate::Public(hurt)], base_time());

        let mut reset = next(&h, 4);
        reset.health = 100;
        let outcome = h.engine.process_updates(vec![SnapshotUpdate::Public(reset)], base_time());
        assert!(outcome.events.is_empty());
        assert_eq!(h.engine.phase(), LifecyclePhase::Active);
    }

    #[test]
    fn test_stale_private_dropped_at_start() {
        let mut h = harness(EngineConfig::default());
        let stale = private(40, base_time() - Duration::seconds(30));
        h.engine.process_updates(vec![SnapshotUpdate::Private(stale)], base_time());
        h.engine.process_updates(roster_updates(), base_time());

        assert!(h.engine.active_match().unwrap().private().is_none());

        let outcome = h
            .engine
            .process_updates(vec![SnapshotUpdate::Private(private(1, base_time()))], base_time());
        assert_eq!(outcome.accepted, 1);
        assert!(h.engine.active_match().unwrap().private().is_some());
    }

    #[test]
    fn test_delete_refused_for_active_match() {
        let h = started(EngineConfig::default());
        let id = h.engine.active_match().unwrap().match_id().to_string();
        assert_eq!(h.engine.delete_match(&id), Err(EngineError::MatchActive(id.clone())));
        assert!(h.engine.delete_match("other").is_ok());
    }

    #[test]
    fn test_abandon_without_match() {
        let mut h = harness(EngineConfig::default());
        assert_eq!(h.engine.abandon("manual", base_time()), None);
        assert!(h.publisher.is_empty());
    }

    #[test]
    fn test_change_log_cleared_on_reset() {
        let mut h = started(EngineConfig::default());
        let mut snap = next(&h, 1);
        snap.units.push(unit(10, 7, 1, 0, -1));
        h.engine.process_updates(vec![SnapshotUpdate::Public(snap)], base_time());
        assert_eq!(h.engine.changes(Some(EntityId::new(1)), None).len(), 1);

        h.engine.abandon("manual", base_time());
        assert!(h.engine.changes(None, None).is_empty());
    }

    #[tokio::test]
    async fn test_writes_reach_store_in_order() {
        let mut h = harness(EngineConfig::default());
        let join = h.worker.take().unwrap().spawn();

        h.engine.process_updates(roster_updates(), base_time());
        let match_id = h.engine.active_match().unwrap().match_id().to_string();

        let mut updates = Vec::new();
        for (id, place) in (1..=7).zip([8u32, 7, 6, 5, 4, 3, 2]) {
            let mut snap = next(&h, id);
            snap.final_place = place;
            updates.push(SnapshotUpdate::Public(snap));
        }
        let end = base_time() + Duration::minutes(30);
        h.engine.process_updates(updates, end);

        let handle = h.engine.persistence.clone();
        let stats = handle
            .shutdown(join, std::time::Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(stats.dropped, 0);

        let record = h.store.get_match(&match_id).unwrap();
        assert_eq!(record.ended_at, Some(end));
        assert_eq!(record.winner, Some(EntityId::new(8)));
        let places: Vec<Option<u32>> = record.players.iter().map(|p| p.final_place).collect();
        assert_eq!(places, vec![Some(8), Some(7), Some(6), Some(5), Some(4), Some(3), Some(2), Some(1)]);
        assert_eq!(h.store.snapshot_count(), 15);
    }
}
