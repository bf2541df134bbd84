//! Cumulative per-player performance statistics

use crate::report::record::PlayerPerformance;
use crate::types::{PlayerId, RatingRecord, RiotId};
use std::collections::HashMap;
use tracing::debug;

/// Folds reported performances into rating records
#[derive(Debug, Clone, Copy)]
pub struct StatsAggregator {
    default_mmr: i64,
}

impl StatsAggregator {
    pub fn new(default_mmr: i64) -> Self {
        Self { default_mmr }
    }

    /// Add one match's performance to a player's totals, creating the record if absent
    pub fn apply_match_stats(
        &self,
        player_id: &PlayerId,
        performance: &PlayerPerformance,
        total_rounds: u32,
        ratings: &mut HashMap<PlayerId, RatingRecord>,
    ) {
        let record = ratings
            .entry(player_id.clone())
            .or_insert_with(|| RatingRecord::new(player_id.clone(), self.default_mmr));

        record.matches_played += 1;
        record.total_rounds_played += u64::from(total_rounds);
        record.total_combat_score += performance.score;
        record.total_kills += performance.kills;
        record.total_deaths += performance.deaths;
        record.recompute_derived();
    }

    /// Apply every resolvable performance; returns the players that were updated.
    ///
    /// Accounts that `resolve` cannot map to a player are skipped.
    pub fn apply_batch<F>(
        &self,
        performances: &[PlayerPerformance],
        total_rounds: u32,
        resolve: F,
        ratings: &mut HashMap<PlayerId, RatingRecord>,
    ) -> Vec<PlayerId>
    where
        F: Fn(&RiotId) -> Option<PlayerId>,
    {
        let mut updated = Vec::with_capacity(performances.len());
        for performance in performances {
            match resolve(&performance.riot_id().normalized()) {
                Some(player_id) => {
                    self.apply_match_stats(&player_id, performance, total_rounds, ratings);
                    updated.push(player_id);
                }
                None => debug!(
                    "Skipping stats for unlinked account - riot_id: '{}'",
                    performance.riot_id()
                ),
            }
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn performance(name: &str, score: u64, kills: u64, deaths: u64) -> PlayerPerformance {
        PlayerPerformance {
            name: name.to_string(),
            tag: "NA1".to_string(),
            team_id: "Red".to_string(),
            score,
            kills,
            deaths,
            assists: 0,
        }
    }

    #[test]
    fn test_apply_match_stats_accumulates() {
        let aggregator = StatsAggregator::new(1000);
        let mut ratings = HashMap::new();
        let id = "p1".to_string();

        aggregator.apply_match_stats(&id, &performance("a", 4800, 20, 10), 24, &mut ratings);
        aggregator.apply_match_stats(&id, &performance("a", 3200, 10, 0), 16, &mut ratings);

        let record = &ratings["p1"];
        assert_eq!(record.mmr, 1000);
        assert_eq!(record.matches_played, 2);
        assert_eq!(record.total_rounds_played, 40);
        assert_eq!(record.total_combat_score, 8000);
        assert_eq!(record.average_combat_score, 200.0);
        assert_eq!(record.kill_death_ratio, 3.0);
    }

    #[test]
    fn test_fresh_copy_application_is_repeatable() {
        let aggregator = StatsAggregator::new(1000);
        let base: HashMap<PlayerId, RatingRecord> =
            [("p1".to_string(), RatingRecord::new("p1", 1200))].into();
        let perf = performance("a", 5000, 25, 5);

        let mut first = base.clone();
        aggregator.apply_match_stats(&"p1".to_string(), &perf, 25, &mut first);
        let mut second = base.clone();
        aggregator.apply_match_stats(&"p1".to_string(), &perf, 25, &mut second);

        assert_eq!(first, second);
        assert_eq!(first["p1"].total_kills, 25);
    }

    #[test]
    fn test_batch_skips_unresolved_accounts() {
        let aggregator = StatsAggregator::new(1000);
        let mut ratings = HashMap::new();
        let performances = vec![performance("Known", 300, 3, 1), performance("stranger", 100, 1, 3)];

        let updated = aggregator.apply_batch(
            &performances,
            13,
            |riot_id| (riot_id.name == "known").then(|| "p1".to_string()),
            &mut ratings,
        );

        assert_eq!(updated, vec!["p1".to_string()]);
        assert_eq!(ratings.len(), 1);
        assert_eq!(ratings["p1"].total_rounds_played, 13);
    }
}
