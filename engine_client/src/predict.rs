//! Client-side prediction and reconciliation.
//!
//! The client advances a local copy of its own entity ("predicted state")
//! every tick using its own sampled input, independent of server round
//! trips. When an authoritative snapshot arrives, the client replaces the
//! local-player portion of the predicted state with the authoritative one
//! and replays every input the server hasn't processed yet, then either
//! snaps or blends toward the result depending on how far prediction had
//! drifted.

use std::collections::VecDeque;

use engine_shared::{
    config::EngineConfig,
    ecs::EntityId,
    math::Vec3,
    state::EntityState,
    wire::WireInputFrame,
};
use tracing::warn;

pub const MAX_INPUT_BUFFER: usize = 256;

/// Crude movement model used purely to keep client and server predictions in
/// the same ballpark between snapshots; the server's simulation is always
/// authoritative.
const PLAYER_ACCELERATION: f32 = 10.0;
const FRICTION: f32 = 4.0;

/// A locally buffered input, retained until the server confirms it processed
/// (or superseded) it.
#[derive(Debug, Clone, Copy)]
pub struct BufferedInput {
    pub frame: WireInputFrame,
}

/// Result of a reconciliation pass, for diagnostics/telemetry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CorrectionKind {
    /// Drift was within threshold; corrected with a smoothing blend.
    Blended,
    /// Drift exceeded threshold; predicted state snapped to the replayed result.
    Snapped,
    /// No local-player authoritative state in the snapshot; nothing to reconcile.
    NoOp,
}

#[derive(Debug, Clone, Copy)]
pub struct CorrectionReport {
    pub kind: CorrectionKind,
    pub position_delta: f32,
}

/// Drives prediction and reconciliation for one local player.
pub struct Predictor {
    local_player: EntityId,
    predicted: EntityState,
    input_buffer: VecDeque<BufferedInput>,
    next_sequence: u32,
    last_authoritative_tick: u32,
    overflow_count: u64,
}

impl Predictor {
    pub fn new(local_player: EntityId, initial: EntityState) -> Self {
        Self {
            local_player,
            predicted: initial,
            input_buffer: VecDeque::new(),
            next_sequence: 1,
            last_authoritative_tick: 0,
            overflow_count: 0,
        }
    }

    pub fn predicted_state(&self) -> &EntityState {
        &self.predicted
    }

    pub fn local_player(&self) -> EntityId {
        self.local_player
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    /// Step 1-2 of the predict step: sample input, buffer it, and advance
    /// the predicted state by one tick.
    pub fn predict_tick(&mut self, mv: Vec3, look_yaw: f32, look_pitch: f32, buttons: u32, dt: f32) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        integrate(&mut self.predicted, mv, dt);
        self.predicted.rotation = Vec3::new(look_pitch, look_yaw, self.predicted.rotation.z);

        let frame = WireInputFrame {
            sequence,
            mv,
            look_yaw,
            look_pitch,
            buttons,
            reported_pos: self.predicted.position,
        };
        self.input_buffer.push_back(BufferedInput { frame });
        while self.input_buffer.len() > MAX_INPUT_BUFFER {
            self.input_buffer.pop_front();
            self.overflow_count += 1;
            warn!(overflow_count = self.overflow_count, "InputOverflow: input_buffer exceeded capacity, oldest frame dropped");
        }

        sequence
    }

    /// Step 3 of the predict step: the tail of the input buffer to send this
    /// datagram, oldest first.
    pub fn outbound_tail(&self, redundancy: usize) -> Vec<WireInputFrame> {
        let redundancy = redundancy.clamp(1, 8);
        let start = self.input_buffer.len().saturating_sub(redundancy);
        self.input_buffer
            .iter()
            .skip(start)
            .map(|b| b.frame)
            .collect()
    }

    /// Reconciles against a newly arrived authoritative snapshot. `authoritative`
    /// is the local player's state as reported at `snapshot_tick`;
    /// `last_processed_input` is the highest input sequence the server had
    /// applied for this client by that tick.
    pub fn reconcile(
        &mut self,
        snapshot_tick: u32,
        authoritative: Option<&EntityState>,
        last_processed_input: u32,
        cfg: &EngineConfig,
    ) -> CorrectionReport {
        if snapshot_tick <= self.last_authoritative_tick {
            return CorrectionReport {
                kind: CorrectionKind::NoOp,
                position_delta: 0.0,
            };
        }
        self.last_authoritative_tick = snapshot_tick;

        let Some(authoritative) = authoritative else {
            return CorrectionReport {
                kind: CorrectionKind::NoOp,
                position_delta: 0.0,
            };
        };

        let pre_correction = self.predicted.clone();

        self.input_buffer
            .retain(|b| b.frame.sequence > last_processed_input);

        let dt = 1.0 / cfg.tick_hz as f32;
        let mut replayed = authoritative.clone();
        for buffered in &self.input_buffer {
            integrate(&mut replayed, buffered.frame.mv, dt);
        }

        let position_delta = replayed.position.sub(pre_correction.position).len();
        let velocity_delta = replayed.velocity.sub(pre_correction.velocity).len();

        if position_delta < cfg.error_threshold_pos_m && velocity_delta < cfg.error_threshold_vel_mps {
            let blended_pos = pre_correction
                .position
                .lerp(replayed.position, cfg.position_correction_factor);
            let blended_vel = pre_correction
                .velocity
                .lerp(replayed.velocity, cfg.position_correction_factor);
            self.predicted.position = blended_pos;
            self.predicted.velocity = blended_vel;
            self.predicted.rotation = replayed.rotation;
            self.predicted.flags = replayed.flags;
            CorrectionReport {
                kind: CorrectionKind::Blended,
                position_delta,
            }
        } else {
            self.predicted = replayed;
            CorrectionReport {
                kind: CorrectionKind::Snapped,
                position_delta,
            }
        }
    }
}

fn integrate(state: &mut EntityState, wish: Vec3, dt: f32) {
    state.position = state.position.add(state.velocity.scale(dt));
    state.velocity = state.velocity.add(wish.scale(PLAYER_ACCELERATION * dt));
    state.velocity = state.velocity.scale((1.0 - FRICTION * dt).max(0.0));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn predict_tick_advances_position_and_buffers_input() {
        let mut p = Predictor::new(EntityId(1), EntityState::new(EntityId(1), 0));
        let seq = p.predict_tick(Vec3::new(1.0, 0.0, 0.0), 0.0, 0.0, 0, 1.0 / 60.0);
        assert_eq!(seq, 1);
        assert_eq!(p.outbound_tail(3).len(), 1);
    }

    #[test]
    fn input_buffer_overflow_drops_oldest_and_counts() {
        let mut p = Predictor::new(EntityId(1), EntityState::new(EntityId(1), 0));
        for _ in 0..(MAX_INPUT_BUFFER + 10) {
            p.predict_tick(Vec3::ZERO, 0.0, 0.0, 0, 1.0 / 60.0);
        }
        assert_eq!(p.overflow_count(), 10);
        assert_eq!(p.input_buffer.len(), MAX_INPUT_BUFFER);
    }

    #[test]
    fn small_drift_blends_toward_replayed_result() {
        let mut p = Predictor::new(EntityId(1), EntityState::new(EntityId(1), 0));
        for _ in 0..5 {
            p.predict_tick(Vec3::new(1.0, 0.0, 0.0), 0.0, 0.0, 0, 1.0 / 60.0);
        }
        let mut authoritative = EntityState::new(EntityId(1), 0);
        authoritative.position = p.predicted.position.add(Vec3::new(0.005, 0.0, 0.0));

        let report = p.reconcile(1, Some(&authoritative), 0, &cfg());
        assert_eq!(report.kind, CorrectionKind::Blended);
    }

    #[test]
    fn large_drift_snaps_instantly() {
        let mut p = Predictor::new(EntityId(1), EntityState::new(EntityId(1), 0));
        for _ in 0..5 {
            p.predict_tick(Vec3::new(1.0, 0.0, 0.0), 0.0, 0.0, 0, 1.0 / 60.0);
        }
        let mut authoritative = EntityState::new(EntityId(1), 0);
        authoritative.position = Vec3::new(500.0, 0.0, 0.0);

        let report = p.reconcile(1, Some(&authoritative), 0, &cfg());
        assert_eq!(report.kind, CorrectionKind::Snapped);
        assert!((p.predicted.position.x - 500.0).abs() < 1.0);
    }

    #[test]
    fn stale_snapshot_tick_is_ignored() {
        let mut p = Predictor::new(EntityId(1), EntityState::new(EntityId(1), 0));
        let authoritative = EntityState::new(EntityId(1), 0);
        p.reconcile(5, Some(&authoritative), 0, &cfg());
        let report = p.reconcile(5, Some(&authoritative), 0, &cfg());
        assert_eq!(report.kind, CorrectionKind::NoOp);
    }

    #[test]
    fn acked_inputs_are_dropped_before_replay() {
        let mut p = Predictor::new(EntityId(1), EntityState::new(EntityId(1), 0));
        for _ in 0..10 {
            p.predict_tick(Vec3::new(1.0, 0.0, 0.0), 0.0, 0.0, 0, 1.0 / 60.0);
        }
        let authoritative = EntityState::new(EntityId(1), 0);
        p.reconcile(1, Some(&authoritative), 6, &cfg());
        assert!(p.input_buffer.iter().all(|b| b.frame.sequence > 6));
    }
}
