//! Sequencing and Deduplication
//!
//! Per-entity monotonic counters. An update is accepted only when its
//! sequence number is strictly greater than the last accepted one for
//! the same domain. Duplicates and replays are normal transport
//! behavior and are dropped silently.

use std::collections::BTreeMap;

use crate::core::entity::EntityId;

/// Last-accepted sequence numbers for one active match.
///
/// Two independent domains: one counter per public entity, and one
/// shared counter for the private channel.
#[derive(Debug, Clone, Default)]
pub struct Sequencer {
    public: BTreeMap<EntityId, u64>,
    private: Option<u64>,
}

impl Sequencer {
    /// Create an empty sequencer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept or reject a public update.
    ///
    /// On accept the counter is advanced before returning, so a
    /// re-delivery is rejected even if later processing fails.
    pub fn accept_public(&mut self, entity: EntityId, sequence: u64) -> bool {
        match self.public.get(&entity) {
            Some(last) if *last >= sequence => false,
            _ => {
                self.public.insert(entity, sequence);
                true
            }
        }
    }

    /// Accept or reject a private update.
    pub fn accept_private(&mut self, sequence: u64) -> bool {
        match self.private {
            Some(last) if last >= sequence => false,
            _ => {
                self.private = Some(sequence);
                true
            }
        }
    }
}
