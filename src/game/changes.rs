//! Snapshot Change Detection
//!
//! Turns two consecutive snapshots of the same entity into a list of
//! semantic events: units bought, sold, upgraded or moved, economy
//! actions, damage, item assignment and synergy changes.
//!
//! [`diff`] is pure. [`ChangeTracker`] wraps it with the previous-state
//! cache and change log used by the live path.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::entity::EntityId;
use crate::game::snapshot::{
    BoardPosition, Placement, PlayerSnapshot, RoundPhase, Synergy, Unit,
};

/// Gold cost of a shop reroll.
pub const REROLL_COST: i32 = 2;

/// Gold cost of one experience purchase.
pub const XP_PURCHASE_COST: i32 = 5;

/// Experience granted by one purchase.
pub const XP_PURCHASE_AMOUNT: i32 = 5;

/// Before/after of a unit that changed position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMove {
    /// Unit type
    pub unit_id: i64,
    /// Unit instance
    pub entindex: i64,
    /// Rank
    pub rank: u8,
    /// New position
    pub position: BoardPosition,
    /// Old position
    pub previous_position: BoardPosition,
}

/// What changed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum ChangeKind {
    /// A rank-1 unit appeared.
    Bought {
        unit_id: i64,
        entindex: i64,
        rank: u8,
        position: BoardPosition,
    },
    /// A unit disappeared without being combined.
    Sold {
        unit_id: i64,
        entindex: i64,
        rank: u8,
        previous_position: BoardPosition,
    },
    /// Lower-rank copies were combined into a higher rank.
    Upgraded {
        unit_id: i64,
        entindex: i64,
        previous_entindex: Option<i64>,
        consumed_entindexes: Vec<i64>,
        rank: u8,
        previous_rank: u8,
        position: BoardPosition,
    },
    /// Board to board.
    Reposition(UnitMove),
    /// Bench to bench.
    OrganizeBench(UnitMove),
    /// Board to bench.
    Benched(UnitMove),
    /// Anything else, usually bench to board.
    Deployed(UnitMove),
    /// Shop reroll.
    Reroll { gold_spent: i32 },
    /// Experience bought with gold.
    XpPurchase { gold_spent: i32, xp_gained: i32 },
    /// Level increased.
    LevelUp { level_before: i32, level_after: i32 },
    /// Health decreased.
    HpChange {
        health_before: i32,
        health_after: i32,
        damage_taken: i32,
        round_number: Option<u32>,
        round_phase: Option<RoundPhase>,
    },
    /// New item slot.
    ItemAdded {
        item_id: i64,
        slot_index: i32,
        assigned_unit_entindex: Option<i64>,
    },
    /// Item given to a unit.
    ItemAssigned {
        item_id: i64,
        slot_index: i32,
        assigned_unit_entindex: i64,
    },
    /// Item taken off a unit.
    ItemUnassigned {
        item_id: i64,
        slot_index: i32,
        previous_assigned_unit_entindex: i64,
    },
    /// Item moved between units.
    ItemReassigned {
        item_id: i64,
        slot_index: i32,
        previous_assigned_unit_entindex: i64,
        new_assigned_unit_entindex: i64,
    },
    /// Synergy became active.
    SynergyAdded { synergy_keyword: i64, unique_unit_count: u32 },
    /// Synergy went away.
    SynergyRemoved { synergy_keyword: i64, unique_unit_count: u32 },
    /// Contributing unit count changed.
    SynergyLevelChanged {
        synergy_keyword: i64,
        level_before: u32,
        level_after: u32,
    },
}

impl ChangeKind {
    /// Wire name of the event type.
    pub fn name(&self) -> &'static str {
        match self {
            ChangeKind::Bought { .. } => "bought",
            ChangeKind::Sold { .. } => "sold",
            ChangeKind::Upgraded { .. } => "upgraded",
            ChangeKind::Reposition(_) => "reposition",
            ChangeKind::OrganizeBench(_) => "organize_bench",
            ChangeKind::Benched(_) => "benched",
            ChangeKind::Deployed(_) => "deployed",
            ChangeKind::Reroll { .. } => "reroll",
            ChangeKind::XpPurchase { .. } => "xp_purchase",
            ChangeKind::LevelUp { .. } => "level_up",
            ChangeKind::HpChange { .. } => "hp_change",
            ChangeKind::ItemAdded { .. } => "item_added",
            ChangeKind::ItemAssigned { .. } => "item_assigned",
            ChangeKind::ItemUnassigned { .. } => "item_unassigned",
            ChangeKind::ItemReassigned { .. } => "item_reassigned",
            ChangeKind::SynergyAdded { .. } => "synergy_added",
            ChangeKind::SynergyRemoved { .. } => "synergy_removed",
            ChangeKind::SynergyLevelChanged { .. } => "synergy_level_changed",
        }
    }
}

/// One semantic event for one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Owning entity
    pub entity_id: EntityId,
    /// Capture time of the snapshot that revealed the change
    pub timestamp: DateTime<Utc>,
    /// Event payload
    #[serde(flatten)]
    pub kind: ChangeKind,
}

// =============================================================================
// DIFF
// =============================================================================

/// Compute the events between two snapshots of the same entity.
///
/// Unit rules run in a fixed order: upgrades first, then purchases,
/// then sales, then moves. Units consumed by an upgrade are never
/// reported as sold, and the upgraded unit is never reported as bought.
pub fn diff(previous: &PlayerSnapshot, current: &PlayerSnapshot) -> Vec<ChangeEvent> {
    let mut kinds = Vec::new();

    let units = diff_units(&previous.units, &current.units, &mut kinds);
    diff_economy(previous, current, units.bought_or_upgraded, &mut kinds);
    diff_items(previous, current, &mut kinds);
    diff_synergies(&previous.synergies, &current.synergies, &mut kinds);

    kinds
        .into_iter()
        .map(|kind| ChangeEvent {
            entity_id: current.entity_id,
            timestamp: current.captured_at,
            kind,
        })
        .collect()
}

struct UnitOutcome {
    bought_or_upgraded: bool,
}

fn diff_units(previous: &[Unit], current: &[Unit], out: &mut Vec<ChangeKind>) -> UnitOutcome {
    let prev_by_index: HashMap<i64, &Unit> = previous.iter().map(|u| (u.entindex, u)).collect();
    let curr_by_index: HashMap<i64, &Unit> = current.iter().map(|u| (u.entindex, u)).collect();

    let mut prev_by_type: HashMap<(i64, u8), Vec<&Unit>> = HashMap::new();
    for unit in previous {
        prev_by_type.entry((unit.unit_id, unit.rank)).or_default().push(unit);
    }

    let mut consumed: BTreeSet<i64> = BTreeSet::new();
    let mut upgraded_types: BTreeSet<i64> = BTreeSet::new();
    let mut bought_or_upgraded = false;

    // Upgrades, highest rank first so a cascade claims its rank-1 copies
    // before a separate rank-2 upgrade of the same type can.
    let mut candidates: Vec<&Unit> = current
        .iter()
        .filter(|u| u.rank > 1 && !prev_by_index.contains_key(&u.entindex))
        .collect();
    candidates.sort_by(|a, b| b.rank.cmp(&a.rank));

    for unit in candidates {
        let previous_rank = unit.rank - 1;
        let vanished = |rank: u8, consumed: &BTreeSet<i64>| -> Vec<i64> {
            prev_by_type
                .get(&(unit.unit_id, rank))
                .map(|units| {
                    units
                        .iter()
                        .map(|u| u.entindex)
                        .filter(|idx| !curr_by_index.contains_key(idx) && !consumed.contains(idx))
                        .collect()
                })
                .unwrap_or_default()
        };

        let lower = vanished(previous_rank, &consumed);
        if lower.len() < 2 {
            continue;
        }
        consumed.extend(lower.iter().copied());

        if previous_rank > 1 {
            let base = vanished(1, &consumed);
            if base.len() >= 2 {
                consumed.extend(base);
            }
        }

        upgraded_types.insert(unit.unit_id);
        bought_or_upgraded = true;
        out.push(ChangeKind::Upgraded {
            unit_id: unit.unit_id,
            entindex: unit.entindex,
            previous_entindex: lower.first().copied(),
            consumed_entindexes: lower,
            rank: unit.rank,
            previous_rank,
            position: unit.position,
        });
    }

    for unit in current {
        if prev_by_index.contains_key(&unit.entindex) || unit.rank != 1 {
            continue;
        }
        // The shop hands out a fresh copy of a type that was just
        // combined on the same tick; it is part of the upgrade.
        if upgraded_types.contains(&unit.unit_id) {
            continue;
        }
        bought_or_upgraded = true;
        out.push(ChangeKind::Bought {
            unit_id: unit.unit_id,
            entindex: unit.entindex,
            rank: unit.rank,
            position: unit.position,
        });
    }

    for unit in previous {
        if curr_by_index.contains_key(&unit.entindex) || consumed.contains(&unit.entindex) {
            continue;
        }
        out.push(ChangeKind::Sold {
            unit_id: unit.unit_id,
            entindex: unit.entindex,
            rank: unit.rank,
            previous_position: unit.position,
        });
    }

    for unit in current {
        let Some(before) = prev_by_index.get(&unit.entindex) else {
            continue;
        };
        if before.position == unit.position {
            continue;
        }
        let movement = UnitMove {
            unit_id: unit.unit_id,
            entindex: unit.entindex,
            rank: unit.rank,
            position: unit.position,
            previous_position: before.position,
        };
        let kind = match (before.position.placement(), unit.position.placement()) {
            (Placement::Board, Placement::Board) => ChangeKind::Reposition(movement),
            (Placement::Bench, Placement::Bench) => ChangeKind::OrganizeBench(movement),
            (Placement::Board, Placement::Bench) => ChangeKind::Benched(movement),
            _ => ChangeKind::Deployed(movement),
        };
        out.push(kind);
    }

    UnitOutcome { bought_or_upgraded }
}

fn diff_economy(
    previous: &PlayerSnapshot,
    current: &PlayerSnapshot,
    bought_or_upgraded: bool,
    out: &mut Vec<ChangeKind>,
) {
    let gold_delta = current.gold - previous.gold;
    let xp_delta = current.xp - previous.xp;
    let level_delta = current.level - previous.level;
    let health_delta = current.health - previous.health;

    if gold_delta == -REROLL_COST && !bought_or_upgraded {
        out.push(ChangeKind::Reroll { gold_spent: REROLL_COST });
    }

    // A level-up resets xp to zero; add back what the old level needed.
    let effective_xp_gain = xp_delta + level_delta * previous.next_level_xp;
    if effective_xp_gain == XP_PURCHASE_AMOUNT && gold_delta == -XP_PURCHASE_COST {
        out.push(ChangeKind::XpPurchase {
            gold_spent: XP_PURCHASE_COST,
            xp_gained: XP_PURCHASE_AMOUNT,
        });
    }

    if level_delta > 0 {
        out.push(ChangeKind::LevelUp {
            level_before: previous.level,
            level_after: current.level,
        });
    }

    if health_delta < 0 {
        out.push(ChangeKind::HpChange {
            health_before: previous.health,
            health_after: current.health,
            damage_taken: -health_delta,
            round_number: current.round.map(|r| r.number),
            round_phase: current.round.map(|r| r.phase),
        });
    }
}

fn diff_items(previous: &PlayerSnapshot, current: &PlayerSnapshot, out: &mut Vec<ChangeKind>) {
    let prev = &previous.item_slots;
    let curr = &current.item_slots;

    for item in curr.iter().skip(prev.len()) {
        out.push(ChangeKind::ItemAdded {
            item_id: item.item_id,
            slot_index: item.slot_index,
            assigned_unit_entindex: item.assigned_unit_entindex,
        });
    }

    for (before, after) in prev.iter().zip(curr.iter()) {
        if before.item_id != after.item_id {
            continue;
        }
        let kind = match (before.assigned_unit_entindex, after.assigned_unit_entindex) {
            (None, Some(unit)) => ChangeKind::ItemAssigned {
                item_id: after.item_id,
                slot_index: after.slot_index,
                assigned_unit_entindex: unit,
            },
            (Some(unit), None) => ChangeKind::ItemUnassigned {
                item_id: after.item_id,
                slot_index: after.slot_index,
                previous_assigned_unit_entindex: unit,
            },
            (Some(old), Some(new)) if old != new => ChangeKind::ItemReassigned {
                item_id: after.item_id,
                slot_index: after.slot_index,
                previous_assigned_unit_entindex: old,
                new_assigned_unit_entindex: new,
            },
            _ => continue,
        };
        out.push(kind);
    }
}

fn diff_synergies(previous: &[Synergy], current: &[Synergy], out: &mut Vec<ChangeKind>) {
    let prev: BTreeMap<i64, u32> = previous.iter().map(|s| (s.keyword, s.unique_unit_count)).collect();
    let curr: BTreeMap<i64, u32> = current.iter().map(|s| (s.keyword, s.unique_unit_count)).collect();

    for (keyword, count) in &curr {
        if !prev.contains_key(keyword) {
            out.push(ChangeKind::SynergyAdded {
                synergy_keyword: *keyword,
                unique_unit_count: *count,
            });
        }
    }

    for (keyword, count) in &prev {
        if !curr.contains_key(keyword) {
            out.push(ChangeKind::SynergyRemoved {
                synergy_keyword: *keyword,
                unique_unit_count: *count,
            });
        }
    }

    for (keyword, before) in &prev {
        if let Some(after) = curr.get(keyword) {
            if before != after {
                out.push(ChangeKind::SynergyLevelChanged {
                    synergy_keyword: *keyword,
                    level_before: *before,
                    level_after: *after,
                });
            }
        }
    }
}

// =============================================================================
// LIVE TRACKER
// =============================================================================

/// Previous-state cache and change log for the active match.
#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    previous: BTreeMap<EntityId, PlayerSnapshot>,
    log: Vec<ChangeEvent>,
}

impl ChangeTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a snapshot as the baseline without diffing.
    pub fn seed(&mut self, snapshot: &PlayerSnapshot) {
        self.previous.insert(snapshot.entity_id, snapshot.clone());
    }

    /// Diff against the cached snapshot, log the events, and cache
    /// `current` as the new baseline.
    pub fn observe(&mut self, current: &PlayerSnapshot) -> Vec<ChangeEvent> {
        let events = match self.previous.get(&current.entity_id) {
            Some(prev) => diff(prev, current),
            None => Vec::new(),
        };
        self.previous.insert(current.entity_id, current.clone());
        self.log.extend(events.iter().cloned());
        events
    }

    /// Logged changes, newest first, optionally for one entity.
    pub fn get_changes(&self, entity: Option<EntityId>, limit: Option<usize>) -> Vec<ChangeEvent> {
        let mut changes: Vec<ChangeEvent> = self
            .log
            .iter()
            .rev()
            .filter(|c| entity.map_or(true, |id| c.entity_id == id))
            .cloned()
            .collect();
        changes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            changes.truncate(limit);
        }
        changes
    }

    /// Number of logged events.
    pub fn len(&self) -> usize {
        self.log.len()
    }

    /// Whether nothing has been logged.
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Drop the cache and the log.
    pub fn clear(&mut self) {
        self.previous.clear();
        self.log.clear();
    }
}
