//! Team formation from a full queue

use crate::error::{Result, ScrimError};
use crate::types::{Player, PlayerId, RatingRecord};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct TeamAssignment {
    pub team1: Vec<Player>,
    pub team2: Vec<Player>,
    pub captain1: Option<Player>,
    pub captain2: Option<Player>,
}

pub struct TeamAssigner;

impl TeamAssigner {
    /// Greedy balance: highest MMR first, each player joins the lighter team.
    ///
    /// Ties go to team1. A team that already has half the roster takes no more.
    pub fn balanced(
        players: &[Player],
        ratings: &HashMap<PlayerId, RatingRecord>,
        capacity: usize,
    ) -> Result<TeamAssignment> {
        let ranked = Self::ranked(players, ratings, capacity)?;
        let half = capacity / 2;

        let mut team1 = Vec::with_capacity(half);
        let mut team2 = Vec::with_capacity(half);
        let mut sum1 = 0i64;
        let mut sum2 = 0i64;

        for (player, mmr) in ranked {
            let to_team1 = if team1.len() >= half {
                false
            } else if team2.len() >= half {
                true
            } else {
                sum1 <= sum2
            };

            if to_team1 {
                sum1 += mmr;
                team1.push(player);
            } else {
                sum2 += mmr;
                team2.push(player);
            }
        }

        Self::check_sizes(&team1, &team2, half)?;
        Ok(TeamAssignment {
            team1,
            team2,
            captain1: None,
            captain2: None,
        })
    }

    /// Captains draft. Manual captains win over the two highest-rated players;
    /// everyone else alternates by MMR starting with team1.
    pub fn captains(
        players: &[Player],
        ratings: &HashMap<PlayerId, RatingRecord>,
        capacity: usize,
        manual_captain1: Option<&Player>,
        manual_captain2: Option<&Player>,
    ) -> Result<TeamAssignment> {
        let mut ranked = Self::ranked(players, ratings, capacity)?;

        if let (Some(c1), Some(c2)) = (manual_captain1, manual_captain2) {
            if c1.player_id == c2.player_id {
                return Err(ScrimError::InvariantViolation {
                    message: format!("{} holds both captain slots", c1.display_name),
                }
                .into());
            }
        }

        // Manual captains leave the pool before any slot is auto-filled
        let manual1 = manual_captain1
            .map(|captain| Self::take_captain(&mut ranked, Some(captain)))
            .transpose()?;
        let manual2 = manual_captain2
            .map(|captain| Self::take_captain(&mut ranked, Some(captain)))
            .transpose()?;
        let captain1 = match manual1 {
            Some(captain) => captain,
            None => Self::take_captain(&mut ranked, None)?,
        };
        let captain2 = match manual2 {
            Some(captain) => captain,
            None => Self::take_captain(&mut ranked, None)?,
        };

        let half = capacity / 2;
        let mut team1 = vec![captain1.clone()];
        let mut team2 = vec![captain2.clone()];
        for (index, (player, _)) in ranked.into_iter().enumerate() {
            if index % 2 == 0 {
                team1.push(player);
            } else {
                team2.push(player);
            }
        }

        Self::check_sizes(&team1, &team2, half)?;
        Ok(TeamAssignment {
            team1,
            team2,
            captain1: Some(captain1),
            captain2: Some(captain2),
        })
    }

    /// Remove the manual captain, or the highest-rated remaining player, from `ranked`
    fn take_captain(ranked: &mut Vec<(Player, i64)>, manual: Option<&Player>) -> Result<Player> {
        let index = match manual {
            Some(captain) => ranked
                .iter()
                .position(|(p, _)| p.player_id == captain.player_id)
                .ok_or_else(|| ScrimError::InvariantViolation {
                    message: format!("Captain {} is not in the queue", captain.display_name),
                })?,
            None if ranked.is_empty() => {
                return Err(ScrimError::InvariantViolation {
                    message: "No players left to pick a captain from".to_string(),
                }
                .into())
            }
            None => 0,
        };
        Ok(ranked.remove(index).0)
    }

    /// Players paired with their MMR, highest first; stable for equal MMR
    fn ranked(
        players: &[Player],
        ratings: &HashMap<PlayerId, RatingRecord>,
        capacity: usize,
    ) -> Result<Vec<(Player, i64)>> {
        if players.len() != capacity || capacity % 2 != 0 {
            return Err(ScrimError::InvariantViolation {
                message: format!(
                    "Team assignment needs exactly {} players, got {}",
                    capacity,
                    players.len()
                ),
            }
            .into());
        }

        let mut ranked = players
            .iter()
            .map(|player| {
                ratings
                    .get(&player.player_id)
                    .map(|record| (player.clone(), record.mmr))
                    .ok_or_else(|| ScrimError::InvariantViolation {
                        message: format!("No rating record for {}", player.player_id),
                    })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(ranked)
    }

    fn check_sizes(team1: &[Player], team2: &[Player], half: usize) -> Result<()> {
        if team1.len() != half || team2.len() != half {
            return Err(ScrimError::InvariantViolation {
                message: format!(
                    "Unequal teams: {} vs {} (expected {} each)",
                    team1.len(),
                    team2.len(),
                    half
                ),
            }
            .into());
        }
        Ok(())
    }
}
