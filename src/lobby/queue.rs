//! Per-match queue state: signup order, captains and drafted teams

use crate::error::{Result, ScrimError};
use crate::lobby::teams::TeamAssignment;
use crate::types::{CaptainSlot, MapPoolKind, MatchFormat, Player, PlayerId, RiotId, TeamMode};
use std::collections::HashSet;

/// Live state of the single active match in a guild
#[derive(Debug, Clone)]
pub struct QueueState {
    pub match_name: String,
    pub format: MatchFormat,
    pub capacity: usize,
    /// Insertion order is signup order
    queue: Vec<Player>,
    pub captain1: Option<Player>,
    pub captain2: Option<Player>,
    pub team1: Vec<Player>,
    pub team2: Vec<Player>,
    pub chosen_mode: Option<TeamMode>,
    pub map_pool: Option<MapPoolKind>,
    pub selected_map: Option<String>,
    pub signup_active: bool,
    pub match_ongoing: bool,
    pub match_not_reported: bool,
}

impl QueueState {
    pub fn new(match_name: String, format: MatchFormat, capacity: usize) -> Self {
        Self {
            match_name,
            format,
            capacity,
            queue: Vec::with_capacity(capacity),
            captain1: None,
            captain2: None,
            team1: Vec::new(),
            team2: Vec::new(),
            chosen_mode: None,
            map_pool: None,
            selected_map: None,
            signup_active: true,
            match_ongoing: false,
            match_not_reported: false,
        }
    }

    pub fn players(&self) -> &[Player] {
        &self.queue
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.queue.iter().any(|p| p.player_id == player_id)
    }

    pub fn member_ids(&self) -> HashSet<PlayerId> {
        self.queue.iter().map(|p| p.player_id.clone()).collect()
    }

    /// Queue member linked to an account
    pub fn find_by_riot_id(&self, riot_id: &RiotId) -> Option<&Player> {
        let wanted = riot_id.normalized();
        self.queue
            .iter()
            .find(|p| p.riot_id.normalized() == wanted)
    }

    /// Append a player; returns true when the queue just became full
    pub fn add_player(&mut self, player: Player) -> Result<bool> {
        if self.contains(&player.player_id) {
            return Err(ScrimError::UserInput {
                reason: "You are already in the queue".to_string(),
            }
            .into());
        }
        if self.is_full() {
            return Err(ScrimError::Precondition {
                reason: "The queue is already full".to_string(),
            }
            .into());
        }

        self.queue.push(player);
        Ok(self.is_full())
    }

    pub fn remove_player(&mut self, player_id: &str) -> Result<Player> {
        let index = self
            .queue
            .iter()
            .position(|p| p.player_id == player_id)
            .ok_or_else(|| ScrimError::UserInput {
                reason: "You are not in the queue".to_string(),
            })?;

        let player = self.queue.remove(index);
        for captain in [&mut self.captain1, &mut self.captain2] {
            if captain.as_ref().is_some_and(|c| c.player_id == player_id) {
                *captain = None;
            }
        }
        Ok(player)
    }

    /// Assign a captain slot, rejecting a player who already holds the other slot
    pub fn set_captain(&mut self, slot: CaptainSlot, player: Player) -> Result<()> {
        let other = match slot {
            CaptainSlot::One => &self.captain2,
            CaptainSlot::Two => &self.captain1,
        };
        if other
            .as_ref()
            .is_some_and(|c| c.player_id == player.player_id)
        {
            return Err(ScrimError::UserInput {
                reason: format!(
                    "{} is already the other team's captain",
                    player.display_name
                ),
            }
            .into());
        }

        match slot {
            CaptainSlot::One => self.captain1 = Some(player),
            CaptainSlot::Two => self.captain2 = Some(player),
        }
        Ok(())
    }

    pub fn apply_assignment(&mut self, assignment: TeamAssignment) {
        self.team1 = assignment.team1;
        self.team2 = assignment.team2;
        if assignment.captain1.is_some() {
            self.captain1 = assignment.captain1;
        }
        if assignment.captain2.is_some() {
            self.captain2 = assignment.captain2;
        }
    }

    /// Player ids of a drafted team
    pub fn team_ids(team: &[Player]) -> Vec<PlayerId> {
        team.iter().map(|p| p.player_id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: &str) -> Player {
        Player {
            player_id: id.to_string(),
            display_name: id.to_uppercase(),
            riot_id: RiotId::new(id, "na1"),
        }
    }

    fn queue_of(n: usize) -> QueueState {
        let mut queue = QueueState::new("match-0001".to_string(), MatchFormat::FiveVFive, 10);
        for i in 0..n {
            queue.add_player(player(&format!("p{}", i))).unwrap();
        }
        queue
    }

    #[test]
    fn test_add_until_full() {
        let mut queue = queue_of(9);
        assert!(!queue.is_full());
        assert!(queue.add_player(player("last")).unwrap());
        assert!(queue.is_full());

        let err = queue.add_player(player("late")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ScrimError>(),
            Some(ScrimError::Precondition { .. })
        ));
    }

    #[test]
    fn test_duplicate_join_rejected() {
        let mut queue = queue_of(3);
        let err = queue.add_player(player("p1")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ScrimError>(),
            Some(ScrimError::UserInput { .. })
        ));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_remove_keeps_order_and_clears_captain() {
        let mut queue = queue_of(4);
        queue.set_captain(CaptainSlot::One, player("p2")).unwrap();

        queue.remove_player("p2").unwrap();
        let ids: Vec<&str> = queue.players().iter().map(|p| p.player_id.as_str()).collect();
        assert_eq!(ids, vec!["p0", "p1", "p3"]);
        assert!(queue.captain1.is_none());
        assert!(queue.remove_player("p2").is_err());
    }

    #[test]
    fn test_captain_cannot_hold_both_slots() {
        let mut queue = queue_of(4);
        queue.set_captain(CaptainSlot::One, player("p0")).unwrap();
        assert!(queue.set_captain(CaptainSlot::Two, player("p0")).is_err());
        queue.set_captain(CaptainSlot::Two, player("p1")).unwrap();
        // Reassigning the same slot is allowed
        queue.set_captain(CaptainSlot::One, player("p3")).unwrap();
        assert_eq!(queue.captain1.as_ref().unwrap().player_id, "p3");
    }

    #[test]
    fn test_find_by_riot_id_ignores_case() {
        let queue = queue_of(2);
        let found = queue.find_by_riot_id(&RiotId::new("P1", "NA1")).unwrap();
        assert_eq!(found.player_id, "p1");
    }
}
