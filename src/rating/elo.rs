//! Team-averaged Elo rating engine
//!
//! Each side is collapsed to its average MMR and scored with the standard Elo
//! expectation from `skillratings`. Every winner gains the same rounded delta and
//! every loser gives up the same amount, floored at the configured minimum.

use crate::config::RatingConfig;
use crate::error::{Result, ScrimError};
use crate::types::{PlayerId, RatingChange, RatingRecord};
use skillratings::elo::{expected_score, EloRating};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Deterministic MMR calculator shared by live reports and history replays
#[derive(Debug, Clone)]
pub struct RatingEngine {
    config: RatingConfig,
}

impl RatingEngine {
    pub fn new(config: RatingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RatingConfig {
        &self.config
    }

    /// Record for a player seen for the first time
    pub fn default_record(&self, player_id: impl Into<PlayerId>) -> RatingRecord {
        RatingRecord::new(player_id, self.config.default_mmr)
    }

    /// Probability that a side averaging `winner_avg` beats a side averaging `loser_avg`
    pub fn expected_win_probability(&self, winner_avg: f64, loser_avg: f64) -> f64 {
        let (expected_winner, _) = expected_score(
            &EloRating { rating: winner_avg },
            &EloRating { rating: loser_avg },
        );
        expected_winner
    }

    /// Rounded MMR swing for a result between two team averages
    pub fn mmr_delta(&self, winner_avg: f64, loser_avg: f64) -> i64 {
        let expected = self.expected_win_probability(winner_avg, loser_avg);
        (self.config.k_factor * (1.0 - expected)).round() as i64
    }

    /// Apply a win/loss outcome to `ratings` in place.
    ///
    /// Every participant must already have a record; nothing is mutated when
    /// any of them is missing or the teams overlap.
    pub fn update_ratings(
        &self,
        winning_team: &[PlayerId],
        losing_team: &[PlayerId],
        ratings: &mut HashMap<PlayerId, RatingRecord>,
    ) -> Result<Vec<RatingChange>> {
        if winning_team.is_empty() || losing_team.is_empty() {
            return Err(ScrimError::InvariantViolation {
                message: "Both teams need at least one player to update ratings".to_string(),
            }
            .into());
        }

        let winners: HashSet<&PlayerId> = winning_team.iter().collect();
        if let Some(overlap) = losing_team.iter().find(|id| winners.contains(id)) {
            return Err(ScrimError::InvariantViolation {
                message: format!("Player '{}' appears on both teams", overlap),
            }
            .into());
        }

        let missing: Vec<&PlayerId> = winning_team
            .iter()
            .chain(losing_team.iter())
            .filter(|id| !ratings.contains_key(*id))
            .collect();
        if !missing.is_empty() {
            return Err(ScrimError::InvariantViolation {
                message: format!(
                    "Missing rating records for: {}",
                    missing
                        .iter()
                        .map(|id| id.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            }
            .into());
        }

        let winner_avg = average_mmr(winning_team, ratings);
        let loser_avg = average_mmr(losing_team, ratings);
        let delta = self.mmr_delta(winner_avg, loser_avg);

        debug!(
            "Elo update - winner_avg: {:.1}, loser_avg: {:.1}, delta: {}",
            winner_avg, loser_avg, delta
        );

        let mut changes = Vec::with_capacity(winning_team.len() + losing_team.len());

        for player_id in winning_team {
            if let Some(record) = ratings.get_mut(player_id) {
                let old_mmr = record.mmr;
                record.mmr = (old_mmr + delta).max(self.config.min_mmr);
                record.wins += 1;
                changes.push(RatingChange {
                    player_id: player_id.clone(),
                    old_mmr,
                    new_mmr: record.mmr,
                    won: true,
                });
            }
        }

        for player_id in losing_team {
            if let Some(record) = ratings.get_mut(player_id) {
                let old_mmr = record.mmr;
                record.mmr = (old_mmr - delta).max(self.config.min_mmr);
                record.losses += 1;
                changes.push(RatingChange {
                    player_id: player_id.clone(),
                    old_mmr,
                    new_mmr: record.mmr,
                    won: false,
                });
            }
        }

        Ok(changes)
    }
}

impl Default for RatingEngine {
    fn default() -> Self {
        Self::new(RatingConfig::default())
    }
}

fn average_mmr(team: &[PlayerId], ratings: &HashMap<PlayerId, RatingRecord>) -> f64 {
    let total: i64 = team
        .iter()
        .filter_map(|id| ratings.get(id))
        .map(|record| record.mmr)
        .sum();
    total as f64 / team.len() as f64
}
