//! Player configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Base URL of the directory / ticket-issuance API
    pub api_base: String,
    /// Lower bound of the renewal lead time, seconds before expiry
    pub refresh_lead_min_secs: u64,
    /// Upper bound of the renewal lead time, seconds before expiry
    pub refresh_lead_max_secs: u64,
    /// Cap on the reconnect backoff delay, in seconds
    pub backoff_cap_secs: u64,
    /// Reconnect attempts before the session gives up
    pub max_reconnect_attempts: u32,
    /// Issue `play` automatically once a ticket is ready
    pub auto_play: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8080/api".to_string(),
            // The lead window is randomized per ticket so a fleet of
            // players does not renew in lockstep.
            refresh_lead_min_secs: 30,
            refresh_lead_max_secs: 60,
            backoff_cap_secs: 10,
            max_reconnect_attempts: 6,
            auto_play: true,
        }
    }
}

/// WHEP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhepConfig {
    /// Bound on the ICE candidate-gathering wait. Best-effort: on timeout
    /// the handshake proceeds with whatever candidates were gathered.
    pub ice_gathering_timeout_ms: u64,
    /// Ask the sink to start presenting as soon as a track attaches
    pub autoplay: bool,
}

impl Default for WhepConfig {
    fn default() -> Self {
        Self {
            ice_gathering_timeout_ms: 3000,
            autoplay: true,
        }
    }
}

impl WhepConfig {
    pub fn ice_gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_gathering_timeout_ms)
    }
}
