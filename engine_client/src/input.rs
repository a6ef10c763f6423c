//! Input sampling.
//!
//! Produces the shape [`crate::predict::Predictor::predict_tick`] consumes
//! each client tick: a movement wish vector, look angles, and a button
//! bitmask. Wiring this up to real windowing/mouse/keyboard input is left to
//! the embedding application; this module only defines the sampled shape and
//! the small amount of massaging (wish-vector clamping) shared by any input
//! source.

use engine_shared::math::Vec3;

/// Button bits understood by the server (`KNOWN_BUTTONS_MASK`); anything
/// outside this set is flagged as a protocol error on arrival.
pub mod buttons {
    pub const JUMP: u32 = 1 << 0;
    pub const CROUCH: u32 = 1 << 1;
    pub const FIRE: u32 = 1 << 2;
    pub const USE: u32 = 1 << 3;
}

/// One tick's sampled user input.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputSample {
    pub forward: f32,
    pub right: f32,
    pub up: f32,
    pub look_yaw: f32,
    pub look_pitch: f32,
    pub buttons: u32,
}

impl InputSample {
    /// Movement wish vector, clamped to the unit sphere the server expects
    /// (anything larger is clamped there too, but counted as suspicious).
    pub fn wish_vector(&self) -> Vec3 {
        let v = Vec3::new(self.forward, self.right, self.up);
        let len = v.len();
        if len > 1.0 {
            v.scale(1.0 / len)
        } else {
            v
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wish_vector_within_unit_sphere_is_unchanged() {
        let sample = InputSample { forward: 0.5, right: 0.0, up: 0.0, ..Default::default() };
        assert!((sample.wish_vector().x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn oversized_wish_vector_is_clamped_to_unit_length() {
        let sample = InputSample { forward: 3.0, right: 4.0, up: 0.0, ..Default::default() };
        assert!((sample.wish_vector().len() - 1.0).abs() < 1e-4);
    }
}
