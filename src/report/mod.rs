//! Match reporting: fetching results, roster reconciliation and history

pub mod history;
pub mod provider;
pub mod reconciler;
pub mod record;

pub use history::{InMemoryMatchHistory, MatchHistoryStore};
pub use provider::{GameStatsProvider, HenrikDevProvider};
pub use reconciler::RosterReconciler;
pub use record::{MatchRecord, PlayerPerformance, TeamResult};
