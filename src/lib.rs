//! Scrim Room - community scrim matchmaking service
//!
//! This crate runs the match lifecycle of a 5v5 (or 3v3) community scrim:
//! signup queue, timed mode/map votes, team assignment, match reporting against
//! an external stats provider and Elo MMR with leaderboards. Commands arrive over
//! AMQP and lifecycle events are published back for the chat gateway.

pub mod amqp;
pub mod config;
pub mod error;
pub mod identity;
pub mod lobby;
pub mod metrics;
pub mod rating;
pub mod report;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{Result, ScrimError};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use lobby::{LifecycleRegistry, LifecycleServices, MatchLifecycle};
pub use rating::RatingEngine;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
