//! Utility functions for the scrim service

use crate::error::{Result, ScrimError};
use crate::types::RiotId;
use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

/// Generate a new correlation id for outbound messages
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Generate a match name such as `match-4821`
pub fn generate_match_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!("match-{}", rng.random_range(1000..10_000u32))
}

/// Parse a `Name#Tag` string, splitting on the last `#`
pub fn parse_riot_id(input: &str) -> Result<RiotId> {
    let trimmed = input.trim();
    let (name, tag) = trimmed.rsplit_once('#').ok_or_else(|| ScrimError::UserInput {
        reason: format!("Invalid Riot ID '{}', expected Name#Tag", trimmed),
    })?;

    let name = name.trim();
    let tag = tag.trim();
    if name.is_empty() || tag.is_empty() {
        return Err(ScrimError::UserInput {
            reason: format!("Invalid Riot ID '{}', expected Name#Tag", trimmed),
        }
        .into());
    }

    Ok(RiotId::new(name, tag))
}
