//! `engine_client`
//!
//! Client-side systems:
//! - Connection management over a single UDP socket (handshake, auth, reliable lane)
//! - Input sampling and command generation
//! - Prediction and reconciliation for the local player
//! - Interpolation for remote entity states

pub mod client;
pub mod input;
pub mod interp;
pub mod predict;

pub use client::GameClient;
