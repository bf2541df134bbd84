//! Leaderboard ordering, paging and rank lookup

use crate::types::{LeaderboardSort, PlayerId, RatingRecord};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// 1-based position in the full ordering
    pub rank: usize,
    pub player_id: PlayerId,
    pub name: String,
    pub mmr: i64,
    pub wins: u32,
    pub losses: u32,
    pub win_percentage: f64,
    pub average_combat_score: f64,
    pub kill_death_ratio: f64,
}

/// One page of a sorted leaderboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardPage {
    pub sort: LeaderboardSort,
    /// 0-based page index, clamped to the last page
    pub page: usize,
    pub total_pages: usize,
    pub total_players: usize,
    pub entries: Vec<LeaderboardEntry>,
}

/// A player's MMR rank among everyone in the guild
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerStanding {
    pub record: RatingRecord,
    pub rank: usize,
    pub total_players: usize,
}

impl PlayerStanding {
    pub fn is_top(&self) -> bool {
        self.rank == 1
    }
}

fn compare(sort: LeaderboardSort, a: &RatingRecord, b: &RatingRecord) -> Ordering {
    let primary = match sort {
        LeaderboardSort::Mmr => b.mmr.cmp(&a.mmr),
        LeaderboardSort::Wins => b.wins.cmp(&a.wins),
        LeaderboardSort::KillDeath => b.kill_death_ratio.total_cmp(&a.kill_death_ratio),
        LeaderboardSort::CombatScore => b.average_combat_score.total_cmp(&a.average_combat_score),
    };
    primary
        .then_with(|| b.mmr.cmp(&a.mmr))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.player_id.cmp(&b.player_id))
}

/// Sort records for a leaderboard view
pub fn sorted<'a, I>(records: I, sort: LeaderboardSort) -> Vec<&'a RatingRecord>
where
    I: IntoIterator<Item = &'a RatingRecord>,
{
    let mut sorted: Vec<&RatingRecord> = records.into_iter().collect();
    sorted.sort_by(|a, b| compare(sort, a, b));
    sorted
}

/// Build one page of the leaderboard
pub fn build_page<'a, I>(
    records: I,
    sort: LeaderboardSort,
    page: usize,
    page_size: usize,
) -> LeaderboardPage
where
    I: IntoIterator<Item = &'a RatingRecord>,
{
    let ordered = sorted(records, sort);
    let page_size = page_size.max(1);
    let total_players = ordered.len();
    let total_pages = total_players.div_ceil(page_size).max(1);
    let page = page.min(total_pages - 1);

    let entries = ordered
        .iter()
        .enumerate()
        .skip(page * page_size)
        .take(page_size)
        .map(|(index, record)| LeaderboardEntry {
            rank: index + 1,
            player_id: record.player_id.clone(),
            name: if record.name.is_empty() {
                "Unknown".to_string()
            } else {
                record.name.clone()
            },
            mmr: record.mmr,
            wins: record.wins,
            losses: record.losses,
            win_percentage: record.win_percentage(),
            average_combat_score: record.average_combat_score,
            kill_death_ratio: record.kill_death_ratio,
        })
        .collect();

    LeaderboardPage {
        sort,
        page,
        total_pages,
        total_players,
        entries,
    }
}

/// MMR rank of a player, if they have a record
pub fn standing<'a, I>(records: I, player_id: &str) -> Option<PlayerStanding>
where
    I: IntoIterator<Item = &'a RatingRecord>,
{
    let ordered = sorted(records, LeaderboardSort::Mmr);
    let total_players = ordered.len();
    ordered
        .iter()
        .position(|record| record.player_id == player_id)
        .map(|index| PlayerStanding {
            record: ordered[index].clone(),
            rank: index + 1,
            total_players,
        })
}

/// Players sharing the highest MMR
pub fn top_players<'a, I>(records: I) -> Vec<PlayerId>
where
    I: IntoIterator<Item = &'a RatingRecord>,
{
    let records: Vec<&RatingRecord> = records.into_iter().collect();
    let Some(top) = records.iter().map(|r| r.mmr).max() else {
        return Vec::new();
    };
    records
        .iter()
        .filter(|r| r.mmr == top)
        .map(|r| r.player_id.clone())
        .collect()
}
