//! State store & delta codec.
//!
//! Owns the authoritative `EntityTable` and the pure functions that diff two
//! tables into a wire-sized delta and reapply that delta against a baseline.
//! Kept free of I/O and free of `serde` wire concerns: encoding to bytes is
//! `wire::snapshot`'s job, this module only knows about in-memory structures.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ecs::EntityId;
use crate::math::Vec3;
use crate::net::ClientId;

/// Maximum size of an entity's opaque payload.
pub const MAX_EXTRA_BYTES: usize = 256;

/// Floats within this delta are considered equal for change detection.
pub const FLOAT_EPSILON: f32 = 1e-5;

/// Bit positions within an `EntityDelta`'s `field_mask`. Fixed across all
/// entity kinds; "field masks are fixed per kind" holds
/// trivially because every kind shares this one field schema.
#[allow(non_snake_case)]
pub struct FieldMask;

impl FieldMask {
    pub const KIND: u32 = 1 << 0;
    pub const POSITION: u32 = 1 << 1;
    pub const VELOCITY: u32 = 1 << 2;
    pub const ROTATION: u32 = 1 << 3;
    pub const FLAGS: u32 = 1 << 4;
    pub const EXTRA: u32 = 1 << 5;
    pub const ALL: u32 = Self::KIND | Self::POSITION | Self::VELOCITY | Self::ROTATION | Self::FLAGS | Self::EXTRA;
}

/// Replicated state of one entity at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub id: EntityId,
    pub kind: u16,
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Vec3,
    pub flags: u32,
    /// Opaque payload, at most [`MAX_EXTRA_BYTES`] bytes.
    pub extra: Vec<u8>,
}

impl EntityState {
    pub fn new(id: EntityId, kind: u16) -> Self {
        Self {
            id,
            kind,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            rotation: Vec3::ZERO,
            flags: 0,
            extra: Vec::new(),
        }
    }

    /// Bit-exact equality: two states are equal iff every field matches exactly.
    pub fn bit_eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.kind == other.kind
            && self.position.bit_eq(other.position)
            && self.velocity.bit_eq(other.velocity)
            && self.rotation.bit_eq(other.rotation)
            && self.flags == other.flags
            && self.extra == other.extra
    }

    /// Field mask of the fields that differ from `other` beyond [`FLOAT_EPSILON`].
    fn diff_mask(&self, other: &Self) -> u32 {
        let mut mask = 0u32;
        if self.kind != other.kind {
            mask |= FieldMask::KIND;
        }
        if !self.position.approx_eq(other.position, FLOAT_EPSILON) {
            mask |= FieldMask::POSITION;
        }
        if !self.velocity.approx_eq(other.velocity, FLOAT_EPSILON) {
            mask |= FieldMask::VELOCITY;
        }
        if !self.rotation.approx_eq(other.rotation, FLOAT_EPSILON) {
            mask |= FieldMask::ROTATION;
        }
        if self.flags != other.flags {
            mask |= FieldMask::FLAGS;
        }
        if self.extra != other.extra {
            mask |= FieldMask::EXTRA;
        }
        mask
    }

    fn apply_fields(&mut self, mask: u32, from: &Self) {
        if mask & FieldMask::KIND != 0 {
            self.kind = from.kind;
        }
        if mask & FieldMask::POSITION != 0 {
            self.position = from.position;
        }
        if mask & FieldMask::VELOCITY != 0 {
            self.velocity = from.velocity;
        }
        if mask & FieldMask::ROTATION != 0 {
            self.rotation = from.rotation;
        }
        if mask & FieldMask::FLAGS != 0 {
            self.flags = from.flags;
        }
        if mask & FieldMask::EXTRA != 0 {
            self.extra = from.extra.clone();
        }
    }
}

/// Authoritative per-tick table of live entities.
pub type EntityTable = HashMap<EntityId, EntityState>;

/// One entity's changed fields relative to a baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDelta {
    pub id: EntityId,
    pub field_mask: u32,
    pub kind: Option<u16>,
    pub position: Option<Vec3>,
    pub velocity: Option<Vec3>,
    pub rotation: Option<Vec3>,
    pub flags: Option<u32>,
    pub extra: Option<Vec<u8>>,
}

impl EntityDelta {
    fn full(state: &EntityState) -> Self {
        Self {
            id: state.id,
            field_mask: FieldMask::ALL,
            kind: Some(state.kind),
            position: Some(state.position),
            velocity: Some(state.velocity),
            rotation: Some(state.rotation),
            flags: Some(state.flags),
            extra: Some(state.extra.clone()),
        }
    }

    fn partial(id: EntityId, mask: u32, new: &EntityState) -> Self {
        Self {
            id,
            field_mask: mask,
            kind: (mask & FieldMask::KIND != 0).then_some(new.kind),
            position: (mask & FieldMask::POSITION != 0).then_some(new.position),
            velocity: (mask & FieldMask::VELOCITY != 0).then_some(new.velocity),
            rotation: (mask & FieldMask::ROTATION != 0).then_some(new.rotation),
            flags: (mask & FieldMask::FLAGS != 0).then_some(new.flags),
            extra: (mask & FieldMask::EXTRA != 0).then_some(new.extra.clone()),
        }
    }
}

/// A snapshot of the world, optionally delta-encoded against `baseline_tick`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub tick: u32,
    /// 0 means this snapshot is self-contained (a full snapshot).
    pub baseline_tick: u32,
    pub entities: Vec<EntityDelta>,
    pub removed: Vec<EntityId>,
    pub last_processed_input: HashMap<ClientId, u32>,
}

impl Snapshot {
    pub fn is_full(&self) -> bool {
        self.baseline_tick == 0
    }
}

/// Encodes a full (baseline-free) snapshot of `table`.
pub fn encode_full(tick: u32, table: &EntityTable, last_processed_input: HashMap<ClientId, u32>) -> Snapshot {
    let mut entities: Vec<&EntityState> = table.values().collect();
    entities.sort_by_key(|e| e.id);
    Snapshot {
        tick,
        baseline_tick: 0,
        entities: entities.into_iter().map(EntityDelta::full).collect(),
        removed: Vec::new(),
        last_processed_input,
    }
}

/// Encodes the difference between `old` (the baseline) and `new`, optionally
/// prioritizing entities closest to `viewpoint` when the caller needs to
/// truncate to fit a datagram.
pub fn encode_delta(
    baseline_tick: u32,
    tick: u32,
    old: &EntityTable,
    new: &EntityTable,
    last_processed_input: HashMap<ClientId, u32>,
) -> Snapshot {
    let mut entities = Vec::new();
    for (id, new_state) in new {
        match old.get(id) {
            Some(old_state) => {
                let mask = old_state.diff_mask(new_state);
                if mask != 0 {
                    entities.push(EntityDelta::partial(*id, mask, new_state));
                }
            }
            None => entities.push(EntityDelta::full(new_state)),
        }
    }
    entities.sort_by_key(|d| d.id);

    let mut removed: Vec<EntityId> = old.keys().filter(|id| !new.contains_key(id)).copied().collect();
    removed.sort();

    Snapshot {
        tick,
        baseline_tick,
        entities,
        removed,
        last_processed_input,
    }
}

/// Truncates `snapshot.entities` to at most `max_entities`, dropping the
/// entities farthest from `viewpoint` first. Dropped entities are simply
/// omitted; they are re-sent next tick against the same baseline since the
/// baseline is unaffected by this truncation.
pub fn prioritize_and_truncate(snapshot: &mut Snapshot, viewpoint: Vec3, max_entities: usize) {
    if snapshot.entities.len() <= max_entities {
        return;
    }
    snapshot.entities.sort_by(|a, b| {
        let da = a.position.unwrap_or(viewpoint).sub(viewpoint).len_sq();
        let db = b.position.unwrap_or(viewpoint).sub(viewpoint).len_sq();
        da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
    });
    snapshot.entities.truncate(max_entities);
    // Re-sort by id: downstream code (and the wire codec) assumes ascending id order.
    snapshot.entities.sort_by_key(|d| d.id);
}

/// Errors produced while applying a delta snapshot.
#[derive(Debug, thiserror::Error)]
pub enum ApplyDeltaError {
    #[error("snapshot baseline_tick {wanted} does not match retained baseline at tick {have}")]
    BaselineMismatch { wanted: u32, have: u32 },
}

/// Applies `snapshot` against `baseline`, first checking that `baseline` was
/// actually captured at `snapshot.baseline_tick` (client-side use: the client
/// must not silently apply a delta against the wrong retained tick). Full
/// snapshots always succeed since they carry no baseline dependency.
pub fn try_apply_delta(
    baseline: &EntityTable,
    baseline_tick: u32,
    snapshot: &Snapshot,
) -> Result<EntityTable, ApplyDeltaError> {
    if !snapshot.is_full() && snapshot.baseline_tick != baseline_tick {
        return Err(ApplyDeltaError::BaselineMismatch {
            wanted: snapshot.baseline_tick,
            have: baseline_tick,
        });
    }
    Ok(apply_delta(baseline, snapshot))
}

/// Applies `snapshot` (full or delta) on top of `baseline`, returning the new table.
pub fn apply_delta(baseline: &EntityTable, snapshot: &Snapshot) -> EntityTable {
    let mut table = if snapshot.is_full() {
        EntityTable::new()
    } else {
        baseline.clone()
    };

    for delta in &snapshot.entities {
        let entry = table
            .entry(delta.id)
            .or_insert_with(|| EntityState::new(delta.id, delta.kind.unwrap_or(0)));
        let source = EntityState {
            id: delta.id,
            kind: delta.kind.unwrap_or(entry.kind),
            position: delta.position.unwrap_or(entry.position),
            velocity: delta.velocity.unwrap_or(entry.velocity),
            rotation: delta.rotation.unwrap_or(entry.rotation),
            flags: delta.flags.unwrap_or(entry.flags),
            extra: delta.extra.clone().unwrap_or_else(|| entry.extra.clone()),
        };
        entry.apply_fields(delta.field_mask, &source);
    }

    for id in &snapshot.removed {
        table.remove(id);
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: u32, x: f32) -> EntityState {
        let mut s = EntityState::new(EntityId(id), 1);
        s.position = Vec3::new(x, 0.0, 0.0);
        s
    }

    #[test]
    fn full_snapshot_roundtrips() {
        let mut table = EntityTable::new();
        table.insert(EntityId(1), state(1, 5.0));
        table.insert(EntityId(2), state(2, 9.0));

        let snap = encode_full(10, &table, HashMap::new());
        assert!(snap.is_full());

        let applied = apply_delta(&EntityTable::new(), &snap);
        assert_eq!(applied.len(), 2);
        assert!(applied[&EntityId(1)].bit_eq(&table[&EntityId(1)]));
    }

    #[test]
    fn delta_roundtrip_matches_new_state() {
        let mut old = EntityTable::new();
        old.insert(EntityId(1), state(1, 1.0));
        old.insert(EntityId(2), state(2, 2.0));

        let mut new = old.clone();
        new.get_mut(&EntityId(1)).unwrap().position = Vec3::new(42.0, 0.0, 0.0);
        new.remove(&EntityId(2));
        new.insert(EntityId(3), state(3, 3.0));

        let delta = encode_delta(5, 6, &old, &new, HashMap::new());
        let applied = apply_delta(&old, &delta);

        assert_eq!(applied.len(), new.len());
        for (id, expected) in &new {
            assert!(applied[id].bit_eq(expected), "entity {id:?} mismatch");
        }
        assert!(!applied.contains_key(&EntityId(2)));
    }

    #[test]
    fn empty_delta_is_a_noop_against_baseline() {
        let mut old = EntityTable::new();
        old.insert(EntityId(1), state(1, 1.0));

        let delta = encode_delta(5, 6, &old, &old, HashMap::new());
        assert!(delta.entities.is_empty());
        assert!(delta.removed.is_empty());

        let applied = apply_delta(&old, &delta);
        assert_eq!(applied, old);
    }

    #[test]
    fn sub_epsilon_float_noise_does_not_count_as_changed() {
        let mut old = EntityTable::new();
        old.insert(EntityId(1), state(1, 1.0));
        let mut new = old.clone();
        new.get_mut(&EntityId(1)).unwrap().position.x += FLOAT_EPSILON / 10.0;

        let delta = encode_delta(5, 6, &old, &new, HashMap::new());
        assert!(delta.entities.is_empty());
    }

    #[test]
    fn stale_baseline_is_rejected() {
        let old = EntityTable::new();
        let delta = encode_delta(5, 6, &old, &old, HashMap::new());
        let err = try_apply_delta(&old, 99, &delta).unwrap_err();
        assert!(matches!(err, ApplyDeltaError::BaselineMismatch { .. }));
    }

    #[test]
    fn prioritization_keeps_nearest_entities() {
        let mut table = EntityTable::new();
        for i in 1..=5u32 {
            table.insert(EntityId(i), state(i, i as f32 * 10.0));
        }
        let mut snap = encode_full(1, &table, HashMap::new());
        prioritize_and_truncate(&mut snap, Vec3::ZERO, 2);
        assert_eq!(snap.entities.len(), 2);
        let ids: Vec<u32> = snap.entities.iter().map(|d| d.id.0).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
