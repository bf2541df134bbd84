//! Timed majority vote
//!
//! A vote is open until one option reaches the majority threshold (half the
//! roster) or its timer fires. On timeout the strictly highest tally wins and ties,
//! including no votes at all, are broken uniformly at random. The coordinator holds
//! no timer itself: the lifecycle fires `on_timeout` for the matching round.

use crate::error::{Result, ScrimError};
use crate::types::{PlayerId, VoteKind, VoteResolution};
use rand::seq::IndexedRandom;
use rand::Rng;
use std::collections::HashSet;

/// Result of a finished vote
#[derive(Debug, Clone, PartialEq)]
pub struct VoteDecision {
    pub kind: VoteKind,
    pub round: u64,
    pub option: String,
    pub resolution: VoteResolution,
    pub tally: Vec<(String, u32)>,
}

/// What a single accepted ballot did
#[derive(Debug, Clone, PartialEq)]
pub enum CastOutcome {
    Counted { tally: Vec<(String, u32)> },
    Decided(VoteDecision),
}

#[derive(Debug, Clone, PartialEq)]
enum VoteStatus {
    Open,
    Decided(VoteDecision),
}

#[derive(Debug, Clone)]
pub struct VotingCoordinator {
    kind: VoteKind,
    round: u64,
    options: Vec<String>,
    counts: Vec<u32>,
    eligible: HashSet<PlayerId>,
    voters: HashSet<PlayerId>,
    majority: u32,
    status: VoteStatus,
}

impl VotingCoordinator {
    /// Open a vote among `eligible` players
    pub fn open<I>(kind: VoteKind, round: u64, options: Vec<String>, eligible: I) -> Result<Self>
    where
        I: IntoIterator<Item = PlayerId>,
    {
        if options.is_empty() {
            return Err(ScrimError::InvariantViolation {
                message: format!("Cannot open a {} vote without options", kind.as_str()),
            }
            .into());
        }

        let eligible: HashSet<PlayerId> = eligible.into_iter().collect();
        let majority = (eligible.len() / 2).max(1) as u32;

        Ok(Self {
            kind,
            round,
            counts: vec![0; options.len()],
            options,
            eligible,
            voters: HashSet::new(),
            majority,
            status: VoteStatus::Open,
        })
    }

    pub fn kind(&self) -> VoteKind {
        self.kind
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn majority_threshold(&self) -> u32 {
        self.majority
    }

    pub fn is_open(&self) -> bool {
        self.status == VoteStatus::Open
    }

    pub fn decision(&self) -> Option<&VoteDecision> {
        match &self.status {
            VoteStatus::Decided(decision) => Some(decision),
            VoteStatus::Open => None,
        }
    }

    pub fn tally(&self) -> Vec<(String, u32)> {
        self.options
            .iter()
            .cloned()
            .zip(self.counts.iter().copied())
            .collect()
    }

    fn ended_error(&self) -> ScrimError {
        ScrimError::Precondition {
            reason: format!("The {} vote has already ended", self.kind.as_str()),
        }
    }

    /// Count one ballot; the ballot that reaches the majority decides the vote
    pub fn cast_vote(&mut self, voter: &PlayerId, option: &str) -> Result<CastOutcome> {
        if !self.is_open() {
            return Err(self.ended_error().into());
        }
        if !self.eligible.contains(voter) {
            return Err(ScrimError::UserInput {
                reason: "Only players in the queue can vote".to_string(),
            }
            .into());
        }
        if self.voters.contains(voter) {
            return Err(ScrimError::UserInput {
                reason: "You have already voted".to_string(),
            }
            .into());
        }
        let index = self
            .options
            .iter()
            .position(|o| o.eq_ignore_ascii_case(option))
            .ok_or_else(|| ScrimError::UserInput {
                reason: format!(
                    "'{}' is not an option, choose one of: {}",
                    option,
                    self.options.join(", ")
                ),
            })?;

        self.voters.insert(voter.clone());
        self.counts[index] += 1;

        if self.counts[index] >= self.majority {
            let decision = self.decide(index, VoteResolution::Majority);
            return Ok(CastOutcome::Decided(decision));
        }

        Ok(CastOutcome::Counted {
            tally: self.tally(),
        })
    }

    /// Resolve an open vote whose window has elapsed
    pub fn on_timeout<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<VoteDecision> {
        if !self.is_open() {
            return Err(self.ended_error().into());
        }

        let best = self.counts.iter().copied().max().unwrap_or(0);
        let leaders: Vec<usize> = (0..self.counts.len())
            .filter(|i| self.counts[*i] == best)
            .collect();

        let (index, resolution) = match leaders.as_slice() {
            [single] => (*single, VoteResolution::TimeoutPlurality),
            tied => {
                let pick = tied.choose(rng).copied().ok_or_else(|| {
                    ScrimError::InternalError {
                        message: "Vote has no options to choose from".to_string(),
                    }
                })?;
                (pick, VoteResolution::TimeoutTie)
            }
        };

        Ok(self.decide(index, resolution))
    }

    fn decide(&mut self, index: usize, resolution: VoteResolution) -> VoteDecision {
        let decision = VoteDecision {
            kind: self.kind,
            round: self.round,
            option: self.options[index].clone(),
            resolution,
            tally: self.tally(),
        };
        self.status = VoteStatus::Decided(decision.clone());
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn roster(n: usize) -> Vec<PlayerId> {
        (0..n).map(|i| format!("p{}", i)).collect()
    }

    fn mode_vote(n: usize) -> VotingCoordinator {
        VotingCoordinator::open(
            VoteKind::Mode,
            1,
            vec!["Balanced".to_string(), "Captains".to_string()],
            roster(n),
        )
        .unwrap()
    }

    fn kind_of(err: anyhow::Error) -> ScrimError {
        err.downcast::<ScrimError>().unwrap()
    }

    #[test]
    fn test_fifth_vote_decides_ten_player_vote() {
        let mut vote = mode_vote(10);
        assert_eq!(vote.majority_threshold(), 5);

        for i in 0..4 {
            let outcome = vote.cast_vote(&format!("p{}", i), "Captains").unwrap();
            assert!(matches!(outcome, CastOutcome::Counted { .. }));
        }
        vote.cast_vote(&"p4".to_string(), "Balanced").unwrap();

        let outcome = vote.cast_vote(&"p5".to_string(), "captains").unwrap();
        match outcome {
            CastOutcome::Decided(decision) => {
                assert_eq!(decision.option, "Captains");
                assert_eq!(decision.resolution, VoteResolution::Majority);
                assert_eq!(
                    decision.tally,
                    vec![("Balanced".to_string(), 1), ("Captains".to_string(), 5)]
                );
            }
            other => panic!("expected decision, got {:?}", other),
        }
        assert!(!vote.is_open());
    }

    #[test]
    fn test_three_v_three_threshold() {
        let vote = mode_vote(6);
        assert_eq!(vote.majority_threshold(), 3);
    }

    #[test]
    fn test_rejected_ballots_do_not_change_tally() {
        let mut vote = mode_vote(10);
        vote.cast_vote(&"p0".to_string(), "Balanced").unwrap();

        let dup = kind_of(vote.cast_vote(&"p0".to_string(), "Captains").unwrap_err());
        assert!(matches!(dup, ScrimError::UserInput { .. }));

        let outsider = kind_of(vote.cast_vote(&"spectator".to_string(), "Balanced").unwrap_err());
        assert!(matches!(outsider, ScrimError::UserInput { .. }));

        let unknown = kind_of(vote.cast_vote(&"p1".to_string(), "Random").unwrap_err());
        assert!(matches!(unknown, ScrimError::UserInput { .. }));

        assert_eq!(
            vote.tally(),
            vec![("Balanced".to_string(), 1), ("Captains".to_string(), 0)]
        );
    }

    #[test]
    fn test_decided_vote_is_terminal() {
        let mut vote = mode_vote(2);
        vote.cast_vote(&"p0".to_string(), "Balanced").unwrap();
        assert!(!vote.is_open());

        let late = kind_of(vote.cast_vote(&"p1".to_string(), "Captains").unwrap_err());
        assert!(matches!(late, ScrimError::Precondition { .. }));

        let mut rng = StdRng::seed_from_u64(1);
        assert!(vote.on_timeout(&mut rng).is_err());
        assert_eq!(vote.decision().unwrap().option, "Balanced");
    }

    #[test]
    fn test_timeout_plurality() {
        let mut vote = mode_vote(10);
        vote.cast_vote(&"p0".to_string(), "Captains").unwrap();
        vote.cast_vote(&"p1".to_string(), "Captains").unwrap();
        vote.cast_vote(&"p2".to_string(), "Balanced").unwrap();

        let mut rng = StdRng::seed_from_u64(9);
        let decision = vote.on_timeout(&mut rng).unwrap();
        assert_eq!(decision.option, "Captains");
        assert_eq!(decision.resolution, VoteResolution::TimeoutPlurality);
    }

    #[test]
    fn test_empty_timeout_coin_flip_is_even() {
        let trials = 1000;
        let mut rng = StdRng::seed_from_u64(2024);
        let mut balanced = 0;
        for _ in 0..trials {
            let mut vote = mode_vote(10);
            let decision = vote.on_timeout(&mut rng).unwrap();
            assert_eq!(decision.resolution, VoteResolution::TimeoutTie);
            if decision.option == "Balanced" {
                balanced += 1;
            }
        }
        let share = balanced as f64 / trials as f64;
        assert!((0.4..=0.6).contains(&share), "Balanced won {:.3} of tie breaks", share);
    }

    #[test]
    fn test_open_without_options_fails() {
        assert!(VotingCoordinator::open(VoteKind::Map, 3, vec![], roster(10)).is_err());
    }
}
