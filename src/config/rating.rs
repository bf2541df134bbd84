//! Rating system configuration

use serde::{Deserialize, Serialize};

/// Elo parameters shared by live reports and history replays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    /// MMR assigned to a player's first record
    pub default_mmr: i64,
    /// Maximum MMR swing for a single match
    pub k_factor: f64,
    /// Losers never drop below this MMR
    pub min_mmr: i64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            default_mmr: 1000,
            k_factor: 32.0,
            min_mmr: 0,
        }
    }
}
