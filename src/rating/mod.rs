//! Rating system: team-averaged Elo, cumulative stats, leaderboards and storage
//!
//! Built on the `skillratings` Elo expectation. Records are kept in memory per
//! guild by the match lifecycle and written through a `RatingStore`.

pub mod elo;
pub mod leaderboard;
pub mod replay;
pub mod stats;
pub mod storage;

// Re-export commonly used types
pub use elo::RatingEngine;
pub use leaderboard::{LeaderboardEntry, LeaderboardPage, PlayerStanding};
pub use replay::{HistoryReplayer, ReplaySummary};
pub use stats::StatsAggregator;
pub use storage::{InMemoryRatingStore, RatingStore};
