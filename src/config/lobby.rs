//! Lobby configuration: queue sizes, vote windows, refresh cadences and map pools

use crate::types::{MapPoolKind, MatchFormat};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    /// Players in a 5v5 queue
    pub capacity: usize,
    /// Players in a 3v3 queue
    pub three_v_three_capacity: usize,
    pub mode_vote_seconds: u64,
    pub map_type_vote_seconds: u64,
    pub map_vote_seconds: u64,
    /// Number of maps offered in the final map vote
    pub map_choices: usize,
    pub signup_refresh_seconds: u64,
    pub channel_refresh_seconds: u64,
    pub leaderboard_refresh_seconds: u64,
    pub leaderboard_page_size: usize,
    pub competitive_maps: Vec<String>,
    pub all_maps: Vec<String>,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            three_v_three_capacity: 6,
            mode_vote_seconds: 25,
            map_type_vote_seconds: 25,
            map_vote_seconds: 25,
            map_choices: 3,
            signup_refresh_seconds: 60,
            channel_refresh_seconds: 720,
            leaderboard_refresh_seconds: 30,
            leaderboard_page_size: 10,
            competitive_maps: to_strings(&[
                "Abyss", "Ascent", "Bind", "Haven", "Icebox", "Lotus", "Sunset",
            ]),
            all_maps: to_strings(&[
                "Abyss", "Ascent", "Bind", "Breeze", "Fracture", "Haven", "Icebox", "Lotus",
                "Pearl", "Split", "Sunset",
            ]),
        }
    }
}

impl LobbyConfig {
    /// Queue capacity for a match format
    pub fn capacity_for(&self, format: MatchFormat) -> usize {
        match format {
            MatchFormat::FiveVFive => self.capacity,
            MatchFormat::ThreeVThree => self.three_v_three_capacity,
        }
    }

    /// Maps belonging to a pool
    pub fn maps_for(&self, pool: MapPoolKind) -> &[String] {
        match pool {
            MapPoolKind::Competitive => &self.competitive_maps,
            MapPoolKind::All => &self.all_maps,
        }
    }

    pub fn mode_vote_window(&self) -> Duration {
        Duration::from_secs(self.mode_vote_seconds)
    }

    pub fn map_type_vote_window(&self) -> Duration {
        Duration::from_secs(self.map_type_vote_seconds)
    }

    pub fn map_vote_window(&self) -> Duration {
        Duration::from_secs(self.map_vote_seconds)
    }

    pub fn signup_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.signup_refresh_seconds)
    }

    pub fn channel_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.channel_refresh_seconds)
    }

    pub fn leaderboard_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.leaderboard_refresh_seconds)
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_for_format() {
        let config = LobbyConfig::default();
        assert_eq!(config.capacity_for(MatchFormat::FiveVFive), 10);
        assert_eq!(config.capacity_for(MatchFormat::ThreeVThree), 6);
    }

    #[test]
    fn test_competitive_pool_is_subset_of_all_maps() {
        let config = LobbyConfig::default();
        for map in &config.competitive_maps {
            assert!(config.all_maps.contains(map), "{} missing", map);
        }
    }
}
