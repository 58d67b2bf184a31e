//! Match and Identity Hashing
//!
//! Provides deterministic hashing for:
//! - Match identifiers derived from the confirmed roster
//! - Bot entity ids derived from persona names
//!
//! All hashes are SHA-256 with a domain separator, so the same input
//! yields the same output on every process and platform.

use sha2::{Sha256, Digest};

use super::entity::EntityId;

/// Hash output type (256 bits / 32 bytes)
pub type Hash256 = [u8; 32];

/// Number of hex characters kept for a match identifier.
pub const MATCH_ID_HEX_LEN: usize = 16;

/// Deterministic hasher with a domain separator.
///
/// Order of updates is critical for determinism.
pub struct DomainHasher {
    hasher: Sha256,
}

impl DomainHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for match identifiers.
    pub fn for_match_id() -> Self {
        Self::new(b"UNDERLORDS_MATCH_V1")
    }

    /// Create hasher for bot identities.
    pub fn for_bot_identity() -> Self {
        Self::new(b"UNDERLORDS_BOT_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an i64 value (little-endian).
    #[inline]
    pub fn update_i64(&mut self, value: i64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> Hash256 {
        self.hasher.finalize().into()
    }
}

/// Compute the match identifier for a confirmed roster.
///
/// The input is a set of `(entity, player_slot)` pairs. Pairs are sorted
/// before hashing, so arrival order never changes the result.
pub fn compute_match_id(roster: &[(EntityId, u32)]) -> String {
    let mut pairs: Vec<(EntityId, u32)> = roster.to_vec();
    pairs.sort();
    pairs.dedup();

    let mut hasher = DomainHasher::for_match_id();
    hasher.update_u32(pairs.len() as u32);
    for (entity, slot) in &pairs {
        hasher.update_i64(entity.get());
        hasher.update_u32(*slot);
    }

    let digest = hasher.finalize();
    let mut id = hex::encode(digest);
    id.truncate(MATCH_ID_HEX_LEN);
    id
}

/// Hash a bot persona name into a 64-bit value.
pub fn hash_persona_name(name: &str) -> u64 {
    let mut hasher = DomainHasher::for_bot_identity();
    hasher.update_bytes(name.as_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}

// =============================================================================
// TESTS
// =============================================================================
