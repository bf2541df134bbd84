//! Rebuild ratings from stored match history

use crate::rating::elo::RatingEngine;
use crate::rating::stats::StatsAggregator;
use crate::report::record::MatchRecord;
use crate::types::{PlayerId, RatingRecord, RiotId};
use std::collections::HashMap;
use tracing::{debug, info};

/// Outcome of a full history replay
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySummary {
    pub ratings: HashMap<PlayerId, RatingRecord>,
    pub matches_applied: usize,
    pub matches_skipped: usize,
}

/// Replays matches oldest-first against fresh default records
pub struct HistoryReplayer<'a> {
    engine: &'a RatingEngine,
    aggregator: StatsAggregator,
}

impl<'a> HistoryReplayer<'a> {
    pub fn new(engine: &'a RatingEngine) -> Self {
        Self {
            engine,
            aggregator: StatsAggregator::new(engine.config().default_mmr),
        }
    }

    /// `links` maps every linked player to their game account
    pub fn replay(
        &self,
        mut matches: Vec<MatchRecord>,
        links: &[(PlayerId, RiotId)],
    ) -> ReplaySummary {
        let mut ratings: HashMap<PlayerId, RatingRecord> = links
            .iter()
            .map(|(player_id, riot_id)| {
                let mut record = self.engine.default_record(player_id.clone());
                record.name = riot_id.to_string();
                (player_id.clone(), record)
            })
            .collect();

        let by_account: HashMap<RiotId, PlayerId> = links
            .iter()
            .map(|(player_id, riot_id)| (riot_id.normalized(), player_id.clone()))
            .collect();

        // Matches without a start time sort first
        matches.sort_by_key(|record| record.started_at);

        let mut applied = 0;
        let mut skipped = 0;

        for record in &matches {
            let Some(winner_id) = record.winning_team_id() else {
                debug!("Skipping match without a winner - match_id: '{}'", record.match_id);
                skipped += 1;
                continue;
            };

            let mut winners = Vec::new();
            let mut losers = Vec::new();
            for performance in &record.players {
                if let Some(player_id) = by_account.get(&performance.riot_id().normalized()) {
                    if performance.team_id.to_lowercase() == winner_id {
                        winners.push(player_id.clone());
                    } else {
                        losers.push(player_id.clone());
                    }
                }
            }

            if winners.is_empty() || losers.is_empty() {
                debug!(
                    "Skipping match with an unlinked side - match_id: '{}'",
                    record.match_id
                );
                skipped += 1;
                continue;
            }

            self.aggregator.apply_batch(
                &record.players,
                record.total_rounds,
                |riot_id| by_account.get(riot_id).cloned(),
                &mut ratings,
            );

            // Every resolved participant has a record after the stats pass
            if self
                .engine
                .update_ratings(&winners, &losers, &mut ratings)
                .is_err()
            {
                skipped += 1;
                continue;
            }
            applied += 1;
        }

        info!(
            "History replay complete - applied: {}, skipped: {}, players: {}",
            applied,
            skipped,
            ratings.len()
        );

        ReplaySummary {
            ratings,
            matches_applied: applied,
            matches_skipped: skipped,
        }
    }
}
