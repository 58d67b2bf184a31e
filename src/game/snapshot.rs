//! Normalized Snapshot Types
//!
//! Point-in-time state records for one entity (public channel) or for
//! the client owner (private channel). Produced by the normalizer and
//! stored by the match state.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::entity::EntityId;

// =============================================================================
// BOARD
// =============================================================================

/// Highest board row index. Rows `0..=BOARD_MAX_ROW` are the board.
pub const BOARD_MAX_ROW: i32 = 3;

/// Row index reported for bench slots.
pub const BENCH_ROW: i32 = -1;

/// Health every player starts a game with.
pub const STARTING_HEALTH: i32 = 100;

/// Unit position. `y` encodes board row, bench, or off-board.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardPosition {
    /// Column
    pub x: i32,
    /// Row (`-1` = bench)
    pub y: i32,
}

/// Where a unit sits, derived from its row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// On the board (rows 0..=3)
    Board,
    /// On the bench (row -1)
    Bench,
    /// Anywhere else
    OffBoard,
}

impl BoardPosition {
    /// Create a new position.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Classify the row.
    pub fn placement(self) -> Placement {
        if (0..=BOARD_MAX_ROW).contains(&self.y) {
            Placement::Board
        } else if self.y == BENCH_ROW {
            Placement::Bench
        } else {
            Placement::OffBoard
        }
    }
}

/// One unit owned by a player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Stable index for the unit's board lifetime
    pub entindex: i64,
    /// Unit type
    pub unit_id: i64,
    /// 1 = base, 2/3 = upgraded
    pub rank: u8,
    /// Board position
    pub position: BoardPosition,
    /// Sell value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gold_value: Option<i32>,
    /// Kills this unit has scored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill_count: Option<i32>,
}

/// One item slot. Slots are append-only; only the assignment changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSlot {
    /// Slot index
    pub slot_index: i32,
    /// Item type
    pub item_id: i64,
    /// Unit carrying the item, if any
    pub assigned_unit_entindex: Option<i64>,
}

/// An active synergy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Synergy {
    /// Synergy keyword id
    pub keyword: i64,
    /// Unique units contributing to it
    pub unique_unit_count: u32,
    /// Bench units that would add to it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bench_additional_unit_count: Option<u32>,
}

// =============================================================================
// ROUND
// =============================================================================

/// Round phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// Preparation (shop, board setup)
    #[default]
    Prep,
    /// Combat
    Combat,
}

impl RoundPhase {
    /// Phase implied by a combat type value.
    pub fn from_combat_type(combat_type: i32) -> Self {
        if combat_type == 0 {
            RoundPhase::Prep
        } else {
            RoundPhase::Combat
        }
    }
}

/// Round clock at the moment a snapshot was accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundContext {
    /// Round number (starts at 1)
    pub number: u32,
    /// Phase
    pub phase: RoundPhase,
}

impl Default for RoundContext {
    fn default() -> Self {
        Self { number: 1, phase: RoundPhase::Prep }
    }
}

// =============================================================================
// PUBLIC SNAPSHOT
// =============================================================================

/// Normalized public state of one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    /// Resolved entity id
    pub entity_id: EntityId,
    /// Per-entity ordering key
    pub sequence_number: u64,
    /// Human persona name
    pub persona_name: Option<String>,
    /// Bot persona name
    pub bot_persona_name: Option<String>,
    /// Whether the entity is a human
    pub is_human_player: bool,
    /// Seat in the lobby (1..=8)
    pub player_slot: u32,

    // Vitals
    /// Health
    pub health: i32,
    /// Gold
    pub gold: i32,
    /// Level
    pub level: i32,
    /// Experience toward next level
    pub xp: i32,
    /// Experience required for next level
    pub next_level_xp: i32,
    /// Total wins
    pub wins: i32,
    /// Total losses
    pub losses: i32,
    /// Current win streak
    pub win_streak: i32,
    /// Current loss streak
    pub lose_streak: i32,
    /// Net worth
    pub net_worth: i32,
    /// Final place (0 = still playing)
    pub final_place: u32,

    // Combat linkage
    /// 0 during preparation, non-zero during combat
    pub combat_type: i32,
    /// Last combat result code
    pub combat_result: i32,
    /// Combat duration in seconds
    pub combat_duration: f64,
    /// Slot of the current opponent
    pub opponent_player_slot: Option<u32>,
    /// Wins against the current opponent
    pub vs_opponent_wins: u32,
    /// Losses against the current opponent
    pub vs_opponent_losses: u32,
    /// Draws against the current opponent
    pub vs_opponent_draws: u32,

    // Board
    /// Max units on board
    pub board_unit_limit: i32,
    /// Underlord hero id
    pub underlord: Option<i64>,
    /// Selected underlord talents
    pub underlord_selected_talents: Vec<i64>,
    /// Units in board order
    pub units: Vec<Unit>,
    /// Item slots in creation order
    pub item_slots: Vec<ItemSlot>,
    /// Active synergies
    pub synergies: Vec<Synergy>,

    // Account
    /// Rank tier
    pub rank_tier: Option<i32>,
    /// Platform code
    pub platform: Option<i32>,
    /// Connection status code
    pub connection_status: Option<i32>,
    /// Seconds disconnected
    pub disconnected_time: Option<f64>,

    /// Round clock stamped when the snapshot was accepted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<RoundContext>,
    /// Local capture time (audit/broadcast only, never used for ordering)
    pub captured_at: DateTime<Utc>,
}

impl PlayerSnapshot {
    /// Whether this snapshot looks like the first moments of a fresh game.
    pub fn is_fresh_game(&self) -> bool {
        self.health == STARTING_HEALTH
            && self.level == 1
            && self.wins == 0
            && self.losses == 0
            && self.xp == 0
    }

    /// The (wins, losses, draws) triple against the current opponent.
    pub fn vs_opponent_record(&self) -> CombatTally {
        CombatTally {
            wins: self.vs_opponent_wins,
            losses: self.vs_opponent_losses,
            draws: self.vs_opponent_draws,
        }
    }

    /// Whether the entity has been placed (eliminated or finished).
    pub fn is_placed(&self) -> bool {
        self.final_place != 0
    }
}

/// Cumulative combat counters against one opponent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatTally {
    /// Wins
    pub wins: u32,
    /// Losses
    pub losses: u32,
    /// Draws
    pub draws: u32,
}

impl CombatTally {
    /// Total combats counted.
    pub fn total(&self) -> u32 {
        self.wins + self.losses + self.draws
    }
}

// =============================================================================
// PRIVATE SNAPSHOT
// =============================================================================

/// Normalized private state of the client owner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivateSnapshot {
    /// Private channel ordering key
    pub sequence_number: u64,
    /// Owner's seat
    pub player_slot: Option<u32>,
    /// Shop locked
    pub shop_locked: Option<bool>,
    /// Current reroll cost
    pub reroll_cost: Option<i32>,
    /// Gold earned this round
    pub gold_earned_this_round: Option<i32>,
    /// Shop generation id
    pub shop_generation_id: Option<i64>,
    /// Whether an underlord can be selected
    pub can_select_underlord: Option<bool>,
    /// Unclaimed rewards
    pub unclaimed_reward_count: Option<i32>,
    /// Item reward reroll used this round
    pub used_item_reward_reroll_this_round: Option<bool>,
    /// Whether the match grants rewards
    pub grants_rewards: Option<bool>,
    /// Shop offering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop_units: Option<serde_json::Value>,
    /// Underlord picker offering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlord_picker_offering: Option<serde_json::Value>,
    /// Challenges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenges: Option<serde_json::Value>,
    /// Oldest unclaimed reward
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_unclaimed_reward: Option<serde_json::Value>,
    /// Local capture time
    pub captured_at: DateTime<Utc>,
}
