//! Protocol Messages
//!
//! Inbound: the batched game-state payload pushed by the game client.
//! Outbound: JSON messages sent to realtime subscribers over WebSocket.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::entity::EntityId;
use crate::game::changes::ChangeEvent;
use crate::game::combat::CombatRecord;
use crate::game::normalize::{normalize_private, normalize_public, SnapshotUpdate};
use crate::game::snapshot::{PlayerSnapshot, PrivateSnapshot, RoundContext};
use crate::game::state::MatchSummary;

// =============================================================================
// INBOUND GAME-STATE PAYLOAD
// =============================================================================

/// One push from the game client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GsiPayload {
    /// Blocks of data objects
    pub block: Vec<GsiBlock>,
}

/// A block within a payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GsiBlock {
    /// Data objects
    pub data: Vec<GsiDataObject>,
}

/// A data object, holding at most one record of each channel.
///
/// Records stay as raw JSON here; the normalizer decides whether each
/// one is usable, so a bad record never poisons its neighbours.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GsiDataObject {
    /// Client-owner-only record
    pub private_player_state: Option<serde_json::Value>,
    /// Per-entity record
    pub public_player_state: Option<serde_json::Value>,
}

impl GsiPayload {
    /// Parse a payload body. Unknown keys are ignored; missing keys are empty.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Total data objects across all blocks.
    pub fn record_count(&self) -> usize {
        self.block.iter().map(|b| b.data.len()).sum()
    }
}

/// Normalize every record in a payload.
///
/// Private records come first, in payload order, followed by public
/// records in payload order. Malformed records are skipped with a
/// debug log.
pub fn extract_updates(payload: &GsiPayload, captured_at: DateTime<Utc>) -> Vec<SnapshotUpdate> {
    let mut privates = Vec::new();
    let mut publics = Vec::new();

    for object in payload.block.iter().flat_map(|b| b.data.iter()) {
        if let Some(raw) = &object.private_player_state {
            match normalize_private(raw, captured_at) {
                Ok(snap) => privates.push(SnapshotUpdate::Private(snap)),
                Err(e) => debug!("Skipping private record: {}", e),
            }
        }
        if let Some(raw) = &object.public_player_state {
            match normalize_public(raw, captured_at) {
                Ok(snap) => publics.push(SnapshotUpdate::Public(snap)),
                Err(e) => debug!("Skipping public record: {}", e),
            }
        }
    }

    privates.extend(publics);
    privates
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages a realtime subscriber may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for the current match view right away.
    SyncRequest,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back
        timestamp: u64,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent to realtime subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Current aggregate view of the active match.
    MatchUpdate(MatchUpdate),

    /// The active match finished.
    MatchEnded {
        /// Match id
        match_id: String,
        /// Inferred winner
        winner: Option<EntityId>,
        /// End time
        timestamp: DateTime<Utc>,
    },

    /// The active match was abandoned.
    MatchAbandoned {
        /// Match id
        match_id: String,
        /// Why
        reason: String,
        /// Abandon time
        timestamp: DateTime<Utc>,
    },

    /// No match is being tracked (reply to a sync request).
    Idle,

    /// Pong response.
    Pong {
        /// Echoed client timestamp
        timestamp: u64,
        /// Server time in ms since epoch
        server_time: u64,
    },

    /// Error message.
    Error {
        /// Human-readable message
        message: String,
    },
}

/// Broadcast-ready view of the active match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchUpdate {
    /// Match header
    pub match_info: MatchSummary,
    /// Latest public snapshot of every entity
    pub public_player_states: Vec<PlayerSnapshot>,
    /// Latest private snapshot
    pub private_player_state: Option<PrivateSnapshot>,
    /// Round clock
    pub round: RoundContext,
    /// Combats resolved since the previous update
    pub new_combats: Vec<CombatRecord>,
    /// Change events produced by the payload behind this update
    pub changes: Vec<ChangeEvent>,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
