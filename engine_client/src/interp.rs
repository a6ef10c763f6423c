//! Snapshot interpolation for non-local entities.
//!
//! The server sends discrete snapshots at tick boundaries. The client renders
//! at `interp_time = remote_now() - interp_delay`, straddling two buffered
//! snapshots when it can, extrapolating a short distance past the newest one
//! when it can't, and freezing beyond that.

use std::collections::{HashMap, VecDeque};

use engine_shared::{ecs::EntityId, math::Vec3, state::EntityState};

/// Snapshot history retained per non-local entity, expressed in fractional
/// ticks so the interpolator doesn't need to know the host's time type.
const MAX_HISTORY_TICKS: f64 = 1.0; // seconds, converted via tick_dt at push time
const EXTRAP_WINDOW_SECS: f64 = 0.25;

#[derive(Debug, Clone, Copy)]
struct Sample {
    tick_time: f64,
    state: EntityState,
}

/// Buffered snapshot history for interpolation, keyed by entity.
pub struct InterpolationBuffer {
    tick_dt_secs: f64,
    history: HashMap<EntityId, VecDeque<Sample>>,
}

/// What the interpolator did to produce a sample, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    Straddled,
    Extrapolated,
    Frozen,
    Latest,
}

impl InterpolationBuffer {
    pub fn new(tick_dt_secs: f64) -> Self {
        Self {
            tick_dt_secs,
            history: HashMap::new(),
        }
    }

    /// Records a freshly arrived snapshot's entities at `tick`.
    pub fn push_snapshot(&mut self, tick: u32, entities: &[EntityState]) {
        let tick_time = tick as f64 * self.tick_dt_secs;
        for entity in entities {
            let ring = self.history.entry(entity.id).or_default();
            ring.push_back(Sample {
                tick_time,
                state: entity.clone(),
            });
            while ring
                .front()
                .map(|s| tick_time - s.tick_time > MAX_HISTORY_TICKS)
                .unwrap_or(false)
            {
                ring.pop_front();
            }
        }
    }

    /// Drops an entity's history entirely (it left the snapshot / was removed).
    pub fn forget(&mut self, entity: EntityId) {
        self.history.remove(&entity);
    }

    /// Samples the visual transform for `entity` at `interp_time_secs`.
    pub fn sample(&self, entity: EntityId, interp_time_secs: f64) -> Option<(EntityState, SampleMode)> {
        let ring = self.history.get(&entity)?;
        if ring.is_empty() {
            return None;
        }
        if ring.len() < 2 {
            let only = &ring[0];
            return Some((only.state.clone(), SampleMode::Latest));
        }

        // Find the pair straddling interp_time_secs, if any.
        for pair in ring.iter().collect::<Vec<_>>().windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            if interp_time_secs >= prev.tick_time && interp_time_secs <= next.tick_time {
                let span = next.tick_time - prev.tick_time;
                let t = if span > 0.0 {
                    ((interp_time_secs - prev.tick_time) / span) as f32
                } else {
                    1.0
                };
                return Some((blend(&prev.state, &next.state, t), SampleMode::Straddled));
            }
        }

        let newest = ring.back().unwrap();
        if interp_time_secs < ring.front().unwrap().tick_time {
            return Some((ring.front().unwrap().state.clone(), SampleMode::Frozen));
        }

        let overshoot = interp_time_secs - newest.tick_time;
        if overshoot <= EXTRAP_WINDOW_SECS {
            let mut extrapolated = newest.state.clone();
            extrapolated.position = extrapolated
                .position
                .add(extrapolated.velocity.scale(overshoot as f32));
            Some((extrapolated, SampleMode::Extrapolated))
        } else {
            Some((newest.state.clone(), SampleMode::Frozen))
        }
    }

    pub fn tracked_entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.history.keys().copied()
    }
}

fn blend(prev: &EntityState, next: &EntityState, t: f32) -> EntityState {
    EntityState {
        id: next.id,
        kind: next.kind,
        position: prev.position.lerp(next.position, t),
        velocity: prev.velocity.lerp(next.velocity, t),
        rotation: prev.rotation.lerp_angles(next.rotation, t),
        flags: next.flags,
        extra: next.extra.clone(),
    }
}

/// Convenience used by render code that only needs a bare position.
pub fn sample_position(buffer: &InterpolationBuffer, entity: EntityId, interp_time_secs: f64) -> Option<Vec3> {
    buffer.sample(entity, interp_time_secs).map(|(s, _)| s.position)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_at(id: EntityId, x: f32, vx: f32) -> EntityState {
        let mut s = EntityState::new(id, 0);
        s.position = Vec3::new(x, 0.0, 0.0);
        s.velocity = Vec3::new(vx, 0.0, 0.0);
        s
    }

    #[test]
    fn straddling_snapshots_interpolate_linearly() {
        let mut buf = InterpolationBuffer::new(1.0 / 60.0);
        buf.push_snapshot(0, &[state_at(EntityId(1), 0.0, 0.0)]);
        buf.push_snapshot(60, &[state_at(EntityId(1), 10.0, 0.0)]); // tick 60 = 1.0s

        let (sample, mode) = buf.sample(EntityId(1), 0.5).unwrap();
        assert_eq!(mode, SampleMode::Straddled);
        assert!((sample.position.x - 5.0).abs() < 0.01);
    }

    #[test]
    fn overshoot_within_window_extrapolates_with_latest_velocity() {
        let mut buf = InterpolationBuffer::new(1.0 / 60.0);
        buf.push_snapshot(0, &[state_at(EntityId(1), 0.0, 1.0)]);
        buf.push_snapshot(60, &[state_at(EntityId(1), 1.0, 1.0)]);

        let (sample, mode) = buf.sample(EntityId(1), 1.1).unwrap();
        assert_eq!(mode, SampleMode::Extrapolated);
        assert!((sample.position.x - 1.1).abs() < 0.01);
    }

    #[test]
    fn overshoot_past_window_freezes() {
        let mut buf = InterpolationBuffer::new(1.0 / 60.0);
        buf.push_snapshot(0, &[state_at(EntityId(1), 0.0, 1.0)]);
        buf.push_snapshot(60, &[state_at(EntityId(1), 1.0, 1.0)]);

        let (sample, mode) = buf.sample(EntityId(1), 5.0).unwrap();
        assert_eq!(mode, SampleMode::Frozen);
        assert!((sample.position.x - 1.0).abs() < 0.01);
    }

    #[test]
    fn single_snapshot_returns_latest() {
        let mut buf = InterpolationBuffer::new(1.0 / 60.0);
        buf.push_snapshot(0, &[state_at(EntityId(1), 3.0, 0.0)]);
        let (sample, mode) = buf.sample(EntityId(1), 10.0).unwrap();
        assert_eq!(mode, SampleMode::Latest);
        assert!((sample.position.x - 3.0).abs() < 0.01);
    }

    #[test]
    fn old_history_is_pruned_beyond_one_second() {
        let mut buf = InterpolationBuffer::new(1.0 / 60.0);
        buf.push_snapshot(0, &[state_at(EntityId(1), 0.0, 0.0)]);
        buf.push_snapshot(180, &[state_at(EntityId(1), 3.0, 0.0)]); // 3.0s later
        assert_eq!(buf.history.get(&EntityId(1)).unwrap().len(), 1);
    }
}
