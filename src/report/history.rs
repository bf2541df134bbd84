//! Append-only store of reported matches, read only by re-aggregation

use crate::error::{Result, ScrimError};
use crate::report::record::MatchRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[async_trait]
pub trait MatchHistoryStore: Send + Sync {
    async fn insert(&self, guild_id: &str, record: MatchRecord) -> Result<()>;

    /// All stored matches for a guild, oldest first
    async fn find_all(&self, guild_id: &str) -> Result<Vec<MatchRecord>>;
}

#[derive(Debug, Default)]
pub struct InMemoryMatchHistory {
    matches: RwLock<HashMap<String, Vec<MatchRecord>>>,
}

impl InMemoryMatchHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MatchHistoryStore for InMemoryMatchHistory {
    async fn insert(&self, guild_id: &str, record: MatchRecord) -> Result<()> {
        let mut matches = self.matches.write().map_err(|_| ScrimError::InternalError {
            message: "Failed to acquire match history write lock".to_string(),
        })?;
        matches.entry(guild_id.to_string()).or_default().push(record);
        Ok(())
    }

    async fn find_all(&self, guild_id: &str) -> Result<Vec<MatchRecord>> {
        let matches = self.matches.read().map_err(|_| ScrimError::InternalError {
            message: "Failed to acquire match history read lock".to_string(),
        })?;
        let mut records = matches.get(guild_id).cloned().unwrap_or_default();
        records.sort_by_key(|record| record.started_at);
        Ok(records)
    }
}
