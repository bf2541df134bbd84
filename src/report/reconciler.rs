//! Matches tracked teams against a reported roster to find the winner

use crate::error::{Result, ScrimError};
use crate::types::{RiotId, TeamSide};
use std::collections::{HashMap, HashSet};

pub struct RosterReconciler;

impl RosterReconciler {
    /// Decide which tracked team won.
    ///
    /// Every tracked account must appear in the report and every reported account
    /// must be tracked. The winning side's roster must then equal one tracked team
    /// exactly. All comparisons use normalized accounts.
    pub fn reconcile(
        team1: &HashSet<RiotId>,
        team2: &HashSet<RiotId>,
        reported: &HashMap<String, HashSet<RiotId>>,
        winner_team_id: &str,
    ) -> Result<TeamSide> {
        let team1: HashSet<RiotId> = team1.iter().map(RiotId::normalized).collect();
        let team2: HashSet<RiotId> = team2.iter().map(RiotId::normalized).collect();
        let reported: HashMap<String, HashSet<RiotId>> = reported
            .iter()
            .map(|(team_id, roster)| {
                (
                    team_id.to_lowercase(),
                    roster.iter().map(RiotId::normalized).collect(),
                )
            })
            .collect();

        let tracked: HashSet<&RiotId> = team1.union(&team2).collect();
        let reported_all: HashSet<&RiotId> = reported.values().flatten().collect();

        let mut missing: Vec<String> = tracked
            .difference(&reported_all)
            .map(|id| id.to_string())
            .collect();
        let mut unexpected: Vec<String> = reported_all
            .difference(&tracked)
            .map(|id| id.to_string())
            .collect();

        if !missing.is_empty() || !unexpected.is_empty() {
            missing.sort();
            unexpected.sort();
            return Err(ScrimError::RosterMismatch {
                missing,
                unexpected,
            }
            .into());
        }

        let winner_id = winner_team_id.to_lowercase();
        let empty = HashSet::new();
        let winners = reported.get(&winner_id).unwrap_or(&empty);

        if *winners == team1 {
            Ok(TeamSide::Team1)
        } else if *winners == team2 {
            Ok(TeamSide::Team2)
        } else {
            Err(ScrimError::AmbiguousWinner {
                winner_team_id: winner_id,
            }
            .into())
        }
    }
}
