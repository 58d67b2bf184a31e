//! Historical change recomputation.
//!
//! Rebuilds the change stream of a finished match from its stored
//! snapshots, so a subscriber that joined late sees the same events the
//! live path produced.

use std::collections::BTreeMap;

use super::{Result, StoredSnapshot};
use crate::core::entity::EntityId;
use crate::game::changes::{diff, ChangeEvent};
use crate::game::snapshot::PlayerSnapshot;

/// Fold the diff over consecutive snapshots of each entity.
///
/// Snapshots are grouped by entity and ordered by sequence number;
/// repeated sequence numbers keep the first copy. The result is ordered
/// by capture time, then entity, then the order the diff produced.
pub fn recompute_changes(snapshots: &[PlayerSnapshot]) -> Vec<ChangeEvent> {
    let mut by_entity: BTreeMap<EntityId, Vec<&PlayerSnapshot>> = BTreeMap::new();
    for snap in snapshots {
        by_entity.entry(snap.entity_id).or_default().push(snap);
    }

    let mut events = Vec::new();
    for group in by_entity.values_mut() {
        group.sort_by_key(|s| s.sequence_number);
        group.dedup_by_key(|s| s.sequence_number);
        for pair in group.windows(2) {
            events.extend(diff(pair[0], pair[1]));
        }
    }

    // Stable sort keeps per-entity diff order within one timestamp.
    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    events
}

/// Decode the public rows of a stored match and recompute its changes.
pub fn recompute_from_rows(rows: &[StoredSnapshot]) -> Result<Vec<ChangeEvent>> {
    let mut snapshots = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(snap) = row.decode_public()? {
            snapshots.push(snap);
        }
    }
    Ok(recompute_changes(&snapshots))
}
