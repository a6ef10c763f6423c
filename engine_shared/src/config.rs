//! Configuration system.
//!
//! Loads engine configuration from JSON strings/files (file IO left to app).

use serde::{Deserialize, Serialize};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Fixed simulation tick rate.
    pub tick_hz: u32,
    /// Path to maps directory.
    #[serde(default = "default_maps_dir")]
    pub maps_dir: String,
    /// Player name (client only).
    #[serde(default = "default_player_name")]
    pub player_name: String,

    /// Snapshot interpolation lag, 0-500.
    #[serde(default = "default_interp_delay_ms")]
    pub interp_delay_ms: u32,
    /// Lag-compensation rewind window, 0-1000.
    #[serde(default = "default_max_rewind_ms")]
    pub max_rewind_ms: u32,
    /// Input redundancy per outbound datagram, 1-8.
    #[serde(default = "default_input_redundancy")]
    pub input_redundancy: u8,
    /// Idle time before a peer is considered timed out.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u32,
    /// Per-client input rate limit.
    #[serde(default = "default_max_inputs_per_second")]
    pub max_inputs_per_second: u32,
    /// Reconciliation snap-vs-blend position threshold, meters.
    #[serde(default = "default_error_threshold_pos_m")]
    pub error_threshold_pos_m: f32,
    /// Reconciliation snap-vs-blend velocity threshold, m/s.
    #[serde(default = "default_error_threshold_vel_mps")]
    pub error_threshold_vel_mps: f32,
    /// Per-tick blend factor toward the re-applied reconciled state, 0-1.
    #[serde(default = "default_position_correction_factor")]
    pub position_correction_factor: f32,
    /// Maximum concurrently connected clients (server only).
    #[serde(default = "default_max_clients")]
    pub max_clients: u32,
    /// Protocol-error occurrences per second before a peer is disconnected.
    #[serde(default = "default_protocol_error_threshold")]
    pub protocol_error_threshold: u32,
    /// `SuspiciousAction` occurrences before a client is disconnected for cheating.
    #[serde(default = "default_suspicion_threshold")]
    pub suspicion_threshold: u32,
}

fn default_maps_dir() -> String {
    "maps".to_string()
}

fn default_player_name() -> String {
    "Player".to_string()
}

fn default_interp_delay_ms() -> u32 {
    100
}

fn default_max_rewind_ms() -> u32 {
    1000
}

fn default_input_redundancy() -> u8 {
    3
}

fn default_connection_timeout_ms() -> u32 {
    10_000
}

fn default_max_inputs_per_second() -> u32 {
    120
}

fn default_error_threshold_pos_m() -> f32 {
    0.02
}

fn default_error_threshold_vel_mps() -> f32 {
    0.2
}

fn default_position_correction_factor() -> f32 {
    0.2
}

fn default_max_clients() -> u32 {
    32
}

fn default_protocol_error_threshold() -> u32 {
    10
}

fn default_suspicion_threshold() -> u32 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 60,
            maps_dir: default_maps_dir(),
            player_name: default_player_name(),
            interp_delay_ms: default_interp_delay_ms(),
            max_rewind_ms: default_max_rewind_ms(),
            input_redundancy: default_input_redundancy(),
            connection_timeout_ms: default_connection_timeout_ms(),
            max_inputs_per_second: default_max_inputs_per_second(),
            error_threshold_pos_m: default_error_threshold_pos_m(),
            error_threshold_vel_mps: default_error_threshold_vel_mps(),
            position_correction_factor: default_position_correction_factor(),
            max_clients: default_max_clients(),
            protocol_error_threshold: default_protocol_error_threshold(),
            suspicion_threshold: default_suspicion_threshold(),
        }
    }
}

impl EngineConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn tick_dt(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.tick_hz as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recognized_option_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.tick_hz, 60);
        assert_eq!(cfg.interp_delay_ms, 100);
        assert_eq!(cfg.max_rewind_ms, 1000);
        assert_eq!(cfg.max_inputs_per_second, 120);
        assert!((cfg.error_threshold_pos_m - 0.02).abs() < 1e-6);
        assert!((cfg.error_threshold_vel_mps - 0.2).abs() < 1e-6);
    }

    #[test]
    fn unspecified_fields_fall_back_to_defaults_on_parse() {
        let cfg = EngineConfig::from_json_str(r#"{"server_addr":"0.0.0.0:1","tick_hz":30}"#).unwrap();
        assert_eq!(cfg.tick_hz, 30);
        assert_eq!(cfg.max_clients, 32);
    }
}
