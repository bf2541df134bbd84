//! Externally reported match results

use crate::types::RiotId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One player's line in a reported match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerPerformance {
    pub name: String,
    pub tag: String,
    pub team_id: String,
    pub score: u64,
    pub kills: u64,
    pub deaths: u64,
    #[serde(default)]
    pub assists: u64,
}

impl PlayerPerformance {
    pub fn riot_id(&self) -> RiotId {
        RiotId::new(self.name.clone(), self.tag.clone())
    }
}

/// Per-team outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamResult {
    pub team_id: String,
    pub won: bool,
    #[serde(default)]
    pub rounds_won: u32,
    #[serde(default)]
    pub rounds_lost: u32,
}

/// Immutable snapshot of a finished match as reported by the stats provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: String,
    pub map: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub total_rounds: u32,
    pub players: Vec<PlayerPerformance>,
    pub teams: Vec<TeamResult>,
}

impl MatchRecord {
    /// Lower-cased id of the team flagged as the winner, if exactly one is
    pub fn winning_team_id(&self) -> Option<String> {
        let mut winners = self.teams.iter().filter(|team| team.won);
        match (winners.next(), winners.next()) {
            (Some(team), None) => Some(team.team_id.to_lowercase()),
            _ => None,
        }
    }

    /// Normalized account sets keyed by lower-cased team id
    pub fn roster_by_team(&self) -> HashMap<String, HashSet<RiotId>> {
        let mut roster: HashMap<String, HashSet<RiotId>> = HashMap::new();
        for player in &self.players {
            roster
                .entry(player.team_id.to_lowercase())
                .or_default()
                .insert(player.riot_id().normalized());
        }
        roster
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn performance(name: &str, team: &str) -> PlayerPerformance {
        PlayerPerformance {
            name: name.to_string(),
            tag: "NA1".to_string(),
            team_id: team.to_string(),
            score: 200,
            kills: 10,
            deaths: 10,
            assists: 3,
        }
    }

    #[test]
    fn test_roster_is_normalized() {
        let record = MatchRecord {
            match_id: "m1".to_string(),
            map: "Ascent".to_string(),
            started_at: None,
            total_rounds: 24,
            players: vec![performance("Alpha", "Red"), performance("bravo", "Blue")],
            teams: vec![],
        };

        let roster = record.roster_by_team();
        assert!(roster["red"].contains(&RiotId::new("alpha", "na1")));
        assert!(roster["blue"].contains(&RiotId::new("bravo", "na1")));
    }

    #[test]
    fn test_winning_team_requires_single_winner() {
        let mut record = MatchRecord {
            match_id: "m1".to_string(),
            map: "Ascent".to_string(),
            started_at: None,
            total_rounds: 24,
            players: vec![],
            teams: vec![
                TeamResult {
                    team_id: "Red".to_string(),
                    won: true,
                    rounds_won: 13,
                    rounds_lost: 11,
                },
                TeamResult {
                    team_id: "Blue".to_string(),
                    won: false,
                    rounds_won: 11,
                    rounds_lost: 13,
                },
            ],
        };
        assert_eq!(record.winning_team_id().as_deref(), Some("red"));

        record.teams[1].won = true;
        assert_eq!(record.winning_team_id(), None);

        record.teams.iter_mut().for_each(|t| t.won = false);
        assert_eq!(record.winning_team_id(), None);
    }
}
