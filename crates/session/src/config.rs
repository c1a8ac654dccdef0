//! Configuration types for the mesh session core

use serde::{Deserialize, Serialize};

/// Main configuration for a mesh session
///
/// The session identifier, the locally assigned participant identifier and
/// the initiator role are established externally (relay handshake) and
/// injected here; they are never negotiated peer-to-peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Target session identifier
    pub session_id: String,

    /// Whether this peer sends the first offer to newcomers
    ///
    /// Exactly one side of every pairing is flagged by the relay; the
    /// other side always waits for an incoming offer.
    pub is_initiator: bool,

    /// Display label for the local participant
    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// WebSocket relay URL (ws:// or wss://)
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// STUN server URLs (at least one required)
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    #[serde(default)]
    pub turn_servers: Vec<TurnServerConfig>,

    /// Bounded wait for a remote description before a negotiation
    /// failure is reported (no automatic retry)
    #[serde(default = "default_negotiation_timeout_ms")]
    pub negotiation_timeout_ms: u64,

    /// Gaze classifier tuning
    #[serde(default)]
    pub gaze: GazeConfig,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Tuning for the gaze-direction classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GazeConfig {
    /// Capacity of the rolling horizontal-ratio window (FIFO eviction)
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,

    /// Consecutive identical classifications required to confirm a
    /// direction change
    #[serde(default = "default_confirm_samples")]
    pub confirm_samples: u32,

    /// Minimum interval (ms) between emitted direction changes; a
    /// confirmed change inside the interval is recorded but not emitted
    #[serde(default = "default_min_emit_interval_ms")]
    pub min_emit_interval_ms: u64,

    /// Continuous face-less duration (ms) before classifying `away`
    #[serde(default = "default_away_timeout_ms")]
    pub away_timeout_ms: u64,

    /// Vertical offset below which the direction is `top`
    #[serde(default = "default_top_threshold")]
    pub top_threshold: f32,

    /// Vertical offset above which the direction is `bottom`
    #[serde(default = "default_bottom_threshold")]
    pub bottom_threshold: f32,

    /// Smoothed horizontal score below which the direction is `left`
    #[serde(default = "default_left_threshold")]
    pub left_threshold: f32,

    /// Smoothed horizontal score above which the direction is `right`
    #[serde(default = "default_right_threshold")]
    pub right_threshold: f32,
}

fn default_display_name() -> String {
    "You".to_string()
}

fn default_relay_url() -> String {
    "ws://localhost:8080".to_string()
}

fn default_stun_servers() -> Vec<String> {
    vec![
        "stun:stun.l.google.com:19302".to_string(),
        "stun:stun1.l.google.com:19302".to_string(),
    ]
}

fn default_negotiation_timeout_ms() -> u64 {
    15_000
}

fn default_smoothing_window() -> usize {
    5
}

fn default_confirm_samples() -> u32 {
    2
}

fn default_min_emit_interval_ms() -> u64 {
    300
}

fn default_away_timeout_ms() -> u64 {
    1000
}

fn default_top_threshold() -> f32 {
    -0.05
}

fn default_bottom_threshold() -> f32 {
    0.07
}

fn default_left_threshold() -> f32 {
    0.40
}

fn default_right_threshold() -> f32 {
    0.60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: String::new(),
            is_initiator: false,
            display_name: default_display_name(),
            relay_url: default_relay_url(),
            stun_servers: default_stun_servers(),
            turn_servers: Vec::new(),
            negotiation_timeout_ms: default_negotiation_timeout_ms(),
            gaze: GazeConfig::default(),
        }
    }
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            smoothing_window: default_smoothing_window(),
            confirm_samples: default_confirm_samples(),
            min_emit_interval_ms: default_min_emit_interval_ms(),
            away_timeout_ms: default_away_timeout_ms(),
            top_threshold: default_top_threshold(),
            bottom_threshold: default_bottom_threshold(),
            left_threshold: default_left_threshold(),
            right_threshold: default_right_threshold(),
        }
    }
}

impl SessionConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `session_id` is empty
    /// - `stun_servers` is empty
    /// - `relay_url` is not a WebSocket URL
    /// - `negotiation_timeout_ms` is zero
    /// - gaze thresholds are out of order
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.session_id.is_empty() {
            return Err(Error::InvalidConfig(
                "session_id must not be empty".to_string(),
            ));
        }

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if !self.relay_url.starts_with("ws://") && !self.relay_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "relay_url must start with ws:// or wss://, got {}",
                self.relay_url
            )));
        }

        if self.negotiation_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "negotiation_timeout_ms must be greater than zero".to_string(),
            ));
        }

        self.gaze.validate()
    }
}

impl GazeConfig {
    /// Validate gaze classifier tuning
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.smoothing_window == 0 {
            return Err(Error::InvalidConfig(
                "smoothing_window must be at least 1".to_string(),
            ));
        }

        if self.confirm_samples == 0 {
            return Err(Error::InvalidConfig(
                "confirm_samples must be at least 1".to_string(),
            ));
        }

        if self.left_threshold >= self.right_threshold {
            return Err(Error::InvalidConfig(format!(
                "left_threshold must be below right_threshold, got {} >= {}",
                self.left_threshold, self.right_threshold
            )));
        }

        if self.top_threshold >= self.bottom_threshold {
            return Err(Error::InvalidConfig(format!(
                "top_threshold must be below bottom_threshold, got {} >= {}",
                self.top_threshold, self.bottom_threshold
            )));
        }

        Ok(())
    }
}
