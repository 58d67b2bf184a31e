//! Round and Phase Tracking
//!
//! No telemetry field carries the round number. It is inferred from the
//! `combat_type` transitions of one tracked entity: 0 means preparation,
//! anything else means combat.

use std::collections::BTreeMap;

use tracing::debug;

use crate::core::entity::EntityId;
use crate::game::snapshot::{PlayerSnapshot, RoundContext, RoundPhase};

/// A clock change caused by one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundTransition {
    /// Preparation ended, combat began.
    CombatStarted {
        /// Round number (unchanged)
        round: u32,
    },
    /// Combat ended and a new round began.
    RoundAdvanced {
        /// New round number
        round: u32,
        /// Newly elected tracked entity
        tracked: Option<EntityId>,
    },
}

/// Round clock driven by the tracked entity.
#[derive(Debug, Clone)]
pub struct RoundTracker {
    round: u32,
    phase: RoundPhase,
    tracked: Option<EntityId>,
    last_combat_type: i32,
}

impl Default for RoundTracker {
    fn default() -> Self {
        Self {
            round: 1,
            phase: RoundPhase::Prep,
            tracked: None,
            last_combat_type: 0,
        }
    }
}

impl RoundTracker {
    /// Create a tracker at round 1, preparation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current round number.
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Round and phase together.
    pub fn context(&self) -> RoundContext {
        RoundContext { number: self.round, phase: self.phase }
    }

    /// Entity currently driving the clock.
    pub fn tracked(&self) -> Option<EntityId> {
        self.tracked
    }

    /// Feed an accepted update.
    ///
    /// `players` must already contain `updated`. If the tracked entity is
    /// unset, gone, or placed, a new one is elected and the clock adopts
    /// its combat state without counting a transition.
    pub fn observe(
        &mut self,
        updated: &PlayerSnapshot,
        players: &BTreeMap<EntityId, PlayerSnapshot>,
    ) -> Option<RoundTransition> {
        let valid = self
            .tracked
            .and_then(|id| players.get(&id))
            .map_or(false, |snap| !snap.is_placed());

        if !valid {
            self.tracked = elect_highest_health(players);
            if let Some(snap) = self.tracked.and_then(|id| players.get(&id)) {
                self.last_combat_type = snap.combat_type;
                self.phase = RoundPhase::from_combat_type(snap.combat_type);
            }
            debug!(tracked = ?self.tracked, round = self.round, "Elected round tracker");
            return None;
        }

        if Some(updated.entity_id) != self.tracked {
            return None;
        }

        let previous = self.last_combat_type;
        let current = updated.combat_type;
        self.last_combat_type = current;

        if previous == 0 && current != 0 {
            self.phase = RoundPhase::Combat;
            return Some(RoundTransition::CombatStarted { round: self.round });
        }

        if previous != 0 && current == 0 {
            self.round += 1;
            self.phase = RoundPhase::Prep;
            self.tracked = elect_highest_health(players);
            // The new source starts from preparation regardless of what
            // its last report says.
            self.last_combat_type = 0;
            debug!(round = self.round, tracked = ?self.tracked, "Round advanced");
            return Some(RoundTransition::RoundAdvanced {
                round: self.round,
                tracked: self.tracked,
            });
        }

        None
    }

    /// Back to round 1 with no tracked entity.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Highest-health entity that has not been placed.
///
/// Ties go to the lowest id.
pub fn elect_highest_health(players: &BTreeMap<EntityId, PlayerSnapshot>) -> Option<EntityId> {
    let mut best: Option<(&EntityId, i32)> = None;
    for (id, snap) in players {
        if snap.is_placed() {
            continue;
        }
        match best {
            Some((_, health)) if snap.health <= health => {}
            _ => best = Some((id, snap.health)),
        }
    }
    best.map(|(id, _)| *id)
}
