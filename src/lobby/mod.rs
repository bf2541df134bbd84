//! Match lifecycle: signup queue, timed votes, team formation and reporting
//!
//! Each guild gets one `MatchLifecycle`, created on demand by the
//! `LifecycleRegistry`. The building blocks (queue, vote, team assignment, map
//! sampling, background refreshes) hold no locks of their own.

pub mod lifecycle;
pub mod maps;
pub mod queue;
pub mod refresh;
pub mod registry;
pub mod teams;
pub mod vote;

// Re-export commonly used types
pub use lifecycle::{
    LifecycleServices, LifecycleSnapshot, MatchLifecycle, ReaggregateOutcome, ReportOutcome,
};
pub use queue::QueueState;
pub use refresh::{PeriodicRefresh, TaskHandle};
pub use registry::LifecycleRegistry;
pub use teams::{TeamAssigner, TeamAssignment};
pub use vote::{CastOutcome, VoteDecision, VotingCoordinator};
