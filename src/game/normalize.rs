//! Snapshot Normalization
//!
//! Maps raw game-state records onto the canonical snapshot shapes.
//! Every raw field is optional on the wire; absence is `None`, and
//! the normalizer decides which absences make a record unusable.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::entity::EntityId;
use crate::game::snapshot::{
    BoardPosition, ItemSlot, PlayerSnapshot, PrivateSnapshot, Synergy, Unit,
};

/// Why a raw record could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// The record did not match the expected shape.
    #[error("malformed record: {0}")]
    Malformed(String),

    /// The record has no sequence number.
    #[error("record has no sequence_number")]
    MissingSequence,

    /// Neither an account id nor a bot persona name could identify the entity.
    #[error("record has no resolvable identity")]
    MissingIdentity,

    /// The account id does not fit the signed id space.
    #[error("account id {0} is out of range")]
    AccountOutOfRange(u64),
}

// =============================================================================
// RAW WIRE SHAPES
// =============================================================================

/// Raw public player record. Field names match the wire keys.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct RawPublicPlayerState {
    pub account_id: Option<u64>,
    pub is_human_player: Option<bool>,
    pub persona_name: Option<String>,
    pub bot_persona_name: Option<String>,
    pub player_slot: Option<u32>,
    pub sequence_number: Option<u64>,
    pub health: Option<i32>,
    pub gold: Option<i32>,
    pub level: Option<i32>,
    pub xp: Option<i32>,
    pub next_level_xp: Option<i32>,
    pub wins: Option<i32>,
    pub losses: Option<i32>,
    pub win_streak: Option<i32>,
    pub lose_streak: Option<i32>,
    pub net_worth: Option<i32>,
    pub final_place: Option<u32>,
    pub combat_type: Option<i32>,
    pub combat_result: Option<i32>,
    pub combat_duration: Option<f64>,
    pub opponent_player_slot: Option<u32>,
    pub vs_opponent_wins: Option<u32>,
    pub vs_opponent_losses: Option<u32>,
    pub vs_opponent_draws: Option<u32>,
    pub board_unit_limit: Option<i32>,
    pub underlord: Option<i64>,
    pub underlord_selected_talents: Option<Vec<i64>>,
    pub rank_tier: Option<i32>,
    pub platform: Option<i32>,
    pub connection_status: Option<i32>,
    pub disconnected_time: Option<f64>,
    pub units: Option<Vec<RawUnit>>,
    pub item_slots: Option<Vec<RawItemSlot>>,
    pub synergies: Option<Vec<RawSynergy>>,
}

/// Raw unit record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct RawUnit {
    pub entindex: Option<i64>,
    pub unit_id: Option<i64>,
    pub rank: Option<u8>,
    pub position: Option<RawPosition>,
    pub gold_value: Option<i32>,
    pub kill_count: Option<i32>,
}

/// Raw position.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct RawPosition {
    pub x: Option<i32>,
    pub y: Option<i32>,
}

/// Raw item slot.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct RawItemSlot {
    pub slot_index: Option<i32>,
    pub item_id: Option<i64>,
    pub assigned_unit_entindex: Option<i64>,
}

/// Raw synergy.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct RawSynergy {
    pub keyword: Option<i64>,
    pub unique_unit_count: Option<u32>,
    pub bench_additional_unit_count: Option<u32>,
}

/// Raw private player record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct RawPrivatePlayerState {
    pub sequence_number: Option<u64>,
    pub player_slot: Option<u32>,
    pub shop_locked: Option<bool>,
    pub reroll_cost: Option<i32>,
    pub gold_earned_this_round: Option<i32>,
    pub shop_generation_id: Option<i64>,
    pub can_select_underlord: Option<bool>,
    pub unclaimed_reward_count: Option<i32>,
    pub used_item_reward_reroll_this_round: Option<bool>,
    pub grants_rewards: Option<bool>,
    pub shop_units: Option<serde_json::Value>,
    pub underlord_picker_offering: Option<serde_json::Value>,
    pub challenges: Option<serde_json::Value>,
    pub oldest_unclaimed_reward: Option<serde_json::Value>,
}

// =============================================================================
// NORMALIZED UPDATES
// =============================================================================

/// One normalized record, tagged by channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum SnapshotUpdate {
    /// Public per-entity state
    Public(PlayerSnapshot),
    /// Client-owner-only state
    Private(PrivateSnapshot),
}

impl SnapshotUpdate {
    /// Owning entity; `None` for the private channel.
    pub fn entity_id(&self) -> Option<EntityId> {
        match self {
            SnapshotUpdate::Public(snap) => Some(snap.entity_id),
            SnapshotUpdate::Private(_) => None,
        }
    }

    /// Channel ordering key.
    pub fn sequence_number(&self) -> u64 {
        match self {
            SnapshotUpdate::Public(snap) => snap.sequence_number,
            SnapshotUpdate::Private(snap) => snap.sequence_number,
        }
    }

    /// Local capture time.
    pub fn captured_at(&self) -> DateTime<Utc> {
        match self {
            SnapshotUpdate::Public(snap) => snap.captured_at,
            SnapshotUpdate::Private(snap) => snap.captured_at,
        }
    }
}

/// Resolve the entity id for a raw public record.
///
/// A record flagged as non-human, or without an account id, is a bot
/// and is identified by its persona name.
pub fn resolve_entity(raw: &RawPublicPlayerState) -> Result<EntityId, NormalizeError> {
    let account = raw.account_id.filter(|id| *id != 0);
    let is_bot = raw.is_human_player == Some(false) || account.is_none();

    if is_bot {
        return raw
            .bot_persona_name
            .as_deref()
            .map(EntityId::for_bot)
            .ok_or(NormalizeError::MissingIdentity);
    }

    let account = account.ok_or(NormalizeError::MissingIdentity)?;
    EntityId::from_account(account).ok_or(NormalizeError::AccountOutOfRange(account))
}

/// Normalize a raw public record.
pub fn normalize_public(
    value: &serde_json::Value,
    captured_at: DateTime<Utc>,
) -> Result<PlayerSnapshot, NormalizeError> {
    let raw: RawPublicPlayerState = serde_json::from_value(value.clone())
        .map_err(|e| NormalizeError::Malformed(e.to_string()))?;
    public_from_raw(raw, captured_at)
}

/// Build a snapshot from an already-decoded raw record.
pub fn public_from_raw(
    raw: RawPublicPlayerState,
    captured_at: DateTime<Utc>,
) -> Result<PlayerSnapshot, NormalizeError> {
    let sequence_number = raw.sequence_number.ok_or(NormalizeError::MissingSequence)?;
    let entity_id = resolve_entity(&raw)?;

    let units = raw
        .units
        .unwrap_or_default()
        .into_iter()
        .filter_map(normalize_unit)
        .collect();

    let item_slots = raw
        .item_slots
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .filter_map(|(idx, slot)| {
            Some(ItemSlot {
                slot_index: slot.slot_index.unwrap_or(idx as i32),
                item_id: slot.item_id?,
                assigned_unit_entindex: slot.assigned_unit_entindex,
            })
        })
        .collect();

    let synergies = raw
        .synergies
        .unwrap_or_default()
        .into_iter()
        .filter_map(|s| {
            Some(Synergy {
                keyword: s.keyword?,
                unique_unit_count: s.unique_unit_count.unwrap_or(0),
                bench_additional_unit_count: s.bench_additional_unit_count,
            })
        })
        .collect();

    Ok(PlayerSnapshot {
        entity_id,
        sequence_number,
        is_human_player: !entity_id.is_bot(),
        persona_name: raw.persona_name,
        bot_persona_name: raw.bot_persona_name,
        player_slot: raw.player_slot.unwrap_or(0),
        health: raw.health.unwrap_or(0),
        gold: raw.gold.unwrap_or(0),
        level: raw.level.unwrap_or(0),
        xp: raw.xp.unwrap_or(0),
        next_level_xp: raw.next_level_xp.unwrap_or(0),
        wins: raw.wins.unwrap_or(0),
        losses: raw.losses.unwrap_or(0),
        win_streak: raw.win_streak.unwrap_or(0),
        lose_streak: raw.lose_streak.unwrap_or(0),
        net_worth: raw.net_worth.unwrap_or(0),
        final_place: raw.final_place.unwrap_or(0),
        combat_type: raw.combat_type.unwrap_or(0),
        combat_result: raw.combat_result.unwrap_or(0),
        combat_duration: raw.combat_duration.unwrap_or(0.0),
        opponent_player_slot: raw.opponent_player_slot.filter(|slot| *slot != 0),
        vs_opponent_wins: raw.vs_opponent_wins.unwrap_or(0),
        vs_opponent_losses: raw.vs_opponent_losses.unwrap_or(0),
        vs_opponent_draws: raw.vs_opponent_draws.unwrap_or(0),
        board_unit_limit: raw.board_unit_limit.unwrap_or(0),
        underlord: raw.underlord,
        underlord_selected_talents: raw.underlord_selected_talents.unwrap_or_default(),
        units,
        item_slots,
        synergies,
        rank_tier: raw.rank_tier,
        platform: raw.platform,
        connection_status: raw.connection_status,
        disconnected_time: raw.disconnected_time,
        round: None,
        captured_at,
    })
}

fn normalize_unit(raw: RawUnit) -> Option<Unit> {
    let position = raw.position.unwrap_or_default();
    Some(Unit {
        entindex: raw.entindex?,
        unit_id: raw.unit_id?,
        rank: raw.rank.unwrap_or(1),
        position: BoardPosition::new(position.x.unwrap_or(0), position.y.unwrap_or(0)),
        gold_value: raw.gold_value,
        kill_count: raw.kill_count,
    })
}

/// Normalize a raw private record.
pub fn normalize_private(
    value: &serde_json::Value,
    captured_at: DateTime<Utc>,
) -> Result<PrivateSnapshot, NormalizeError> {
    let raw: RawPrivatePlayerState = serde_json::from_value(value.clone())
        .map_err(|e| NormalizeError::Malformed(e.to_string()))?;

    Ok(PrivateSnapshot {
        sequence_number: raw.sequence_number.ok_or(NormalizeError::MissingSequence)?,
        player_slot: raw.player_slot,
        shop_locked: raw.shop_locked,
        reroll_cost: raw.reroll_cost,
        gold_earned_this_round: raw.gold_earned_this_round,
        shop_generation_id: raw.shop_generation_id,
        can_select_underlord: raw.can_select_underlord,
        unclaimed_reward_count: raw.unclaimed_reward_count,
        used_item_reward_reroll_this_round: raw.used_item_reward_reroll_this_round,
        grants_rewards: raw.grants_rewards,
        shop_units: raw.shop_units,
        underlord_picker_offering: raw.underlord_picker_offering,
        challenges: raw.challenges,
        oldest_unclaimed_reward: raw.oldest_unclaimed_reward,
        captured_at,
    })
}
