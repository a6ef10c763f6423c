//! `engine_server`
//!
//! Server-side systems:
//! - Fixed timestep simulation loop
//! - Entity management
//! - Receives input frames, runs movement/lag-compensation history
//! - Sends full and delta `Snapshot`s
//!
//! Networking model:
//! - Single UDP socket per server, one peer per connected client
//! - Reliable control messages piggybacked on the same datagram stream

pub mod lagcomp;
pub mod server;

pub use server::GameServer;
