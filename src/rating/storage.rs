//! Rating storage interface and implementations
//!
//! Records are namespaced by guild so that one service instance can host several
//! communities. The in-memory store backs tests and single-node deployments; the
//! MongoDB store lives in `crate::store`.

use crate::error::{Result, ScrimError};
use crate::types::{PlayerId, RatingRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// Durable storage for per-guild rating records
#[async_trait]
pub trait RatingStore: Send + Sync {
    /// Insert or replace a single player's record
    async fn upsert(&self, guild_id: &str, record: RatingRecord) -> Result<()>;

    /// Insert or replace several records
    async fn upsert_many(&self, guild_id: &str, records: Vec<RatingRecord>) -> Result<()> {
        for record in records {
            self.upsert(guild_id, record).await?;
        }
        Ok(())
    }

    /// Fetch one player's record
    async fn find(&self, guild_id: &str, player_id: &PlayerId) -> Result<Option<RatingRecord>>;

    /// Fetch every record for a guild
    async fn find_all(&self, guild_id: &str) -> Result<Vec<RatingRecord>>;
}

/// In-memory rating store
#[derive(Debug, Default)]
pub struct InMemoryRatingStore {
    records: RwLock<HashMap<String, HashMap<PlayerId, RatingRecord>>>,
    writes: AtomicUsize,
}

impl InMemoryRatingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records written since creation
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of records stored for a guild
    pub fn len(&self, guild_id: &str) -> Result<usize> {
        let records = self.records.read().map_err(|_| ScrimError::InternalError {
            message: "Failed to acquire ratings read lock".to_string(),
        })?;
        Ok(records.get(guild_id).map(|g| g.len()).unwrap_or(0))
    }
}

#[async_trait]
impl RatingStore for InMemoryRatingStore {
    async fn upsert(&self, guild_id: &str, record: RatingRecord) -> Result<()> {
        let mut records = self.records.write().map_err(|_| ScrimError::InternalError {
            message: "Failed to acquire ratings write lock".to_string(),
        })?;

        records
            .entry(guild_id.to_string())
            .or_default()
            .insert(record.player_id.clone(), record);
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    async fn upsert_many(&self, guild_id: &str, batch: Vec<RatingRecord>) -> Result<()> {
        let mut records = self.records.write().map_err(|_| ScrimError::InternalError {
            message: "Failed to acquire ratings write lock".to_string(),
        })?;

        let guild = records.entry(guild_id.to_string()).or_default();
        let count = batch.len();
        for record in batch {
            guild.insert(record.player_id.clone(), record);
        }
        self.writes.fetch_add(count, Ordering::SeqCst);

        Ok(())
    }

    async fn find(&self, guild_id: &str, player_id: &PlayerId) -> Result<Option<RatingRecord>> {
        let records = self.records.read().map_err(|_| ScrimError::InternalError {
            message: "Failed to acquire ratings read lock".to_string(),
        })?;

        Ok(records
            .get(guild_id)
            .and_then(|guild| guild.get(player_id))
            .cloned())
    }

    async fn find_all(&self, guild_id: &str) -> Result<Vec<RatingRecord>> {
        let records = self.records.read().map_err(|_| ScrimError::InternalError {
            message: "Failed to acquire ratings read lock".to_string(),
        })?;

        Ok(records
            .get(guild_id)
            .map(|guild| guild.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_and_find() {
        let store = InMemoryRatingStore::new();
        let mut record = RatingRecord::new("p1", 1000);

        store.upsert("guild", record.clone()).await.unwrap();
        assert_eq!(
            store.find("guild", &"p1".to_string()).await.unwrap(),
            Some(record.clone())
        );

        record.mmr = 1016;
        store.upsert("guild", record.clone()).await.unwrap();
        let found = store.find("guild", &"p1".to_string()).await.unwrap().unwrap();
        assert_eq!(found.mmr, 1016);
        assert_eq!(store.len("guild").unwrap(), 1);
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_guilds_are_isolated() {
        let store = InMemoryRatingStore::new();
        store
            .upsert_many(
                "a",
                vec![RatingRecord::new("p1", 1000), RatingRecord::new("p2", 1100)],
            )
            .await
            .unwrap();
        store.upsert("b", RatingRecord::new("p1", 900)).await.unwrap();

        assert_eq!(store.find_all("a").await.unwrap().len(), 2);
        assert_eq!(store.find_all("b").await.unwrap().len(), 1);
        assert!(store.find_all("c").await.unwrap().is_empty());
        assert_eq!(
            store.find("b", &"p1".to_string()).await.unwrap().unwrap().mmr,
            900
        );
    }
}
