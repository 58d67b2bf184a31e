//! Pre-Match Buffer
//!
//! Collects fresh-game snapshots while no match is active and decides
//! when enough distinct entities have shown up to start one.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::core::entity::EntityId;
use crate::game::snapshot::{PlayerSnapshot, PrivateSnapshot};

/// Entities required to start a match.
pub const DEFAULT_QUORUM: usize = 8;

/// Retention cap for buffered public snapshots.
pub const DEFAULT_BUFFER_CAP: usize = 1000;

/// What a quorum hands over to the active match.
#[derive(Debug, Clone)]
pub struct CommittedRoster {
    /// Highest-sequence buffered snapshot per candidate, in entity order
    pub snapshots: Vec<PlayerSnapshot>,
    /// Buffered private snapshot, if it survived the staleness check
    pub private: Option<PrivateSnapshot>,
    /// Earliest capture time of any public snapshot accepted into the buffer
    pub earliest_public: Option<DateTime<Utc>>,
}

impl CommittedRoster {
    /// `(entity, slot)` pairs for match id derivation.
    pub fn slots(&self) -> Vec<(EntityId, u32)> {
        self.snapshots
            .iter()
            .map(|s| (s.entity_id, s.player_slot))
            .collect()
    }
}

/// Candidate collection before a match is recognized.
#[derive(Debug, Clone)]
pub struct PreMatchBuffer {
    quorum: usize,
    cap: usize,
    /// First valid snapshot seen per entity
    candidates: BTreeMap<EntityId, PlayerSnapshot>,
    /// Every valid snapshot, oldest first
    retained: VecDeque<PlayerSnapshot>,
    /// Earliest capture time ever accepted; survives eviction
    earliest_public: Option<DateTime<Utc>>,
    /// Latest private snapshot
    private: Option<PrivateSnapshot>,
}

impl Default for PreMatchBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_QUORUM, DEFAULT_BUFFER_CAP)
    }
}

impl PreMatchBuffer {
    /// Create an empty buffer.
    pub fn new(quorum: usize, cap: usize) -> Self {
        Self {
            quorum: quorum.max(1),
            cap: cap.max(1),
            candidates: BTreeMap::new(),
            retained: VecDeque::new(),
            earliest_public: None,
            private: None,
        }
    }

    /// Offer a public snapshot.
    ///
    /// Snapshots that do not look like a fresh game are ignored.
    /// Returns true once the quorum is reached.
    pub fn offer_public(&mut self, snapshot: PlayerSnapshot) -> bool {
        if !snapshot.is_fresh_game() {
            return self.has_quorum();
        }

        self.candidates
            .entry(snapshot.entity_id)
            .or_insert_with(|| snapshot.clone());

        self.earliest_public = Some(match self.earliest_public {
            Some(earliest) => earliest.min(snapshot.captured_at),
            None => snapshot.captured_at,
        });

        self.retained.push_back(snapshot);
        while self.retained.len() > self.cap {
            self.retained.pop_front();
        }

        self.has_quorum()
    }

    /// Offer a private snapshot. Only the highest sequence is kept.
    pub fn offer_private(&mut self, snapshot: PrivateSnapshot) {
        let newer = self
            .private
            .as_ref()
            .map_or(true, |held| snapshot.sequence_number > held.sequence_number);
        if newer {
            self.private = Some(snapshot);
        }
    }

    /// Whether exactly `quorum` distinct entities are waiting.
    pub fn has_quorum(&self) -> bool {
        self.candidates.len() == self.quorum
    }

    /// Number of distinct candidates.
    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    /// Number of retained snapshots.
    pub fn retained_len(&self) -> usize {
        self.retained.len()
    }

    /// Whether nothing has been buffered.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty() && self.private.is_none()
    }

    /// Hand the buffered state over to a new match and clear.
    ///
    /// Returns `None` if the quorum has not been reached.
    pub fn commit(&mut self) -> Option<CommittedRoster> {
        if !self.has_quorum() {
            return None;
        }

        let mut latest: BTreeMap<EntityId, PlayerSnapshot> = BTreeMap::new();
        for snap in self.retained.drain(..) {
            if !self.candidates.contains_key(&snap.entity_id) {
                continue;
            }
            match latest.get(&snap.entity_id) {
                Some(held) if held.sequence_number >= snap.sequence_number => {}
                _ => {
                    latest.insert(snap.entity_id, snap);
                }
            }
        }

        // Candidates whose buffered copies were all evicted fall back
        // to the first record seen.
        let candidates = std::mem::take(&mut self.candidates);
        for (id, first) in candidates {
            latest.entry(id).or_insert(first);
        }

        let earliest_public = self.earliest_public.take();

        let private = self.private.take().filter(|p| match earliest_public {
            Some(earliest) => p.captured_at >= earliest,
            None => true,
        });

        Some(CommittedRoster {
            snapshots: latest.into_values().collect(),
            private,
            earliest_public,
        })
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.candidates.clear();
        self.retained.clear();
        self.earliest_public = None;
        self.private = None;
    }
}
