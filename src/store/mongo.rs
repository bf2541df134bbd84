//! MongoDB persistence for ratings, account links and match history
//!
//! Collections: `mmr_data` (one document per guild and player), `users` (one
//! document per linked player) and `all_matches` (one document per guild and
//! match). Every write is an upsert keyed by `_id`, so retried writes are
//! idempotent.

use crate::error::{Result, ScrimError};
use crate::identity::IdentityRegistry;
use crate::rating::RatingStore;
use crate::report::{MatchHistoryStore, MatchRecord};
use crate::types::{PlayerId, RatingRecord, RiotId};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{bson::doc, Client, Collection, Database};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

const RATINGS_COLLECTION: &str = "mmr_data";
const USERS_COLLECTION: &str = "users";
const MATCHES_COLLECTION: &str = "all_matches";

struct RetryPolicy;

impl RetryPolicy {
    const MAX_ATTEMPTS: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 250;

    fn initial_delay() -> Duration {
        Duration::from_millis(Self::INITIAL_DELAY_MS)
    }

    fn next_delay(current: Duration) -> Duration {
        (current * 2).min(Duration::from_secs(5))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RatingDocument {
    #[serde(rename = "_id")]
    id: String,
    guild_id: String,
    #[serde(flatten)]
    record: RatingRecord,
}

impl RatingDocument {
    fn new(guild_id: &str, record: RatingRecord) -> Self {
        Self {
            id: rating_key(guild_id, &record.player_id),
            guild_id: guild_id.to_string(),
            record,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserDocument {
    /// Platform player id
    #[serde(rename = "_id")]
    id: String,
    riot_name: String,
    riot_tag: String,
}

impl UserDocument {
    fn riot_id(&self) -> RiotId {
        RiotId::new(self.riot_name.clone(), self.riot_tag.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MatchDocument {
    #[serde(rename = "_id")]
    id: String,
    guild_id: String,
    #[serde(flatten)]
    record: MatchRecord,
}

fn rating_key(guild_id: &str, player_id: &str) -> String {
    format!("{}:{}", guild_id, player_id)
}

fn storage_error(action: &str, source: mongodb::error::Error) -> anyhow::Error {
    ScrimError::InternalError {
        message: format!("Failed to {}: {}", action, source),
    }
    .into()
}

/// One client serving all three stores
#[derive(Clone)]
pub struct MongoStore {
    database: Database,
}

impl MongoStore {
    /// Connect and wait until the server answers a ping
    pub async fn connect(uri: &str, database_name: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| ScrimError::ConfigurationError {
                message: format!("Invalid MongoDB URI: {}", e),
            })?;
        let database = client.database(database_name);

        let mut attempts = 0;
        let mut delay = RetryPolicy::initial_delay();
        loop {
            match database.run_command(doc! { "ping": 1 }).await {
                Ok(_) => break,
                Err(e) => {
                    attempts += 1;
                    if attempts >= RetryPolicy::MAX_ATTEMPTS {
                        return Err(storage_error(
                            &format!("reach MongoDB after {} attempts", attempts),
                            e,
                        ));
                    }
                    warn!(
                        "MongoDB ping failed - attempt: {}, retry_in: {:?}, error: {}",
                        attempts, delay, e
                    );
                    sleep(delay).await;
                    delay = RetryPolicy::next_delay(delay);
                }
            }
        }

        info!("Connected to MongoDB - database: '{}'", database_name);
        Ok(Self { database })
    }

    fn ratings(&self) -> Collection<RatingDocument> {
        self.database.collection(RATINGS_COLLECTION)
    }

    fn users(&self) -> Collection<UserDocument> {
        self.database.collection(USERS_COLLECTION)
    }

    fn matches(&self) -> Collection<MatchDocument> {
        self.database.collection(MATCHES_COLLECTION)
    }
}

#[async_trait]
impl RatingStore for MongoStore {
    async fn upsert(&self, guild_id: &str, record: RatingRecord) -> Result<()> {
        let document = RatingDocument::new(guild_id, record);
        self.ratings()
            .replace_one(doc! { "_id": document.id.as_str() }, &document)
            .upsert(true)
            .await
            .map_err(|e| storage_error("save rating record", e))?;
        Ok(())
    }

    async fn find(&self, guild_id: &str, player_id: &PlayerId) -> Result<Option<RatingRecord>> {
        let document = self
            .ratings()
            .find_one(doc! { "_id": rating_key(guild_id, player_id) })
            .await
            .map_err(|e| storage_error("load rating record", e))?;
        Ok(document.map(|d| d.record))
    }

    async fn find_all(&self, guild_id: &str) -> Result<Vec<RatingRecord>> {
        let documents: Vec<RatingDocument> = self
            .ratings()
            .find(doc! { "guild_id": guild_id })
            .await
            .map_err(|e| storage_error("list rating records", e))?
            .try_collect()
            .await
            .map_err(|e| storage_error("read rating records", e))?;
        Ok(documents.into_iter().map(|d| d.record).collect())
    }
}

#[async_trait]
impl IdentityRegistry for MongoStore {
    async fn resolve(&self, player_id: &PlayerId) -> Result<Option<RiotId>> {
        let user = self
            .users()
            .find_one(doc! { "_id": player_id.as_str() })
            .await
            .map_err(|e| storage_error("load account link", e))?;
        Ok(user.map(|u| u.riot_id()))
    }

    async fn link(&self, player_id: &PlayerId, riot_id: &RiotId) -> Result<()> {
        let normalized = riot_id.normalized();

        let owner = self
            .users()
            .find_one(doc! {
                "riot_name": normalized.name.as_str(),
                "riot_tag": normalized.tag.as_str(),
                "_id": { "$ne": player_id.as_str() },
            })
            .await
            .map_err(|e| storage_error("check account link", e))?;
        if let Some(owner) = owner {
            return Err(ScrimError::UserInput {
                reason: format!(
                    "{} is already linked to another player ({})",
                    riot_id, owner.id
                ),
            }
            .into());
        }

        let document = UserDocument {
            id: player_id.clone(),
            riot_name: normalized.name,
            riot_tag: normalized.tag,
        };
        self.users()
            .replace_one(doc! { "_id": player_id.as_str() }, &document)
            .upsert(true)
            .await
            .map_err(|e| storage_error("save account link", e))?;

        info!(
            "Linked account - player_id: '{}', riot_id: '{}'",
            player_id, riot_id
        );
        Ok(())
    }

    async fn find_by_riot_id(&self, riot_id: &RiotId) -> Result<Option<PlayerId>> {
        let normalized = riot_id.normalized();
        let user = self
            .users()
            .find_one(doc! { "riot_name": normalized.name, "riot_tag": normalized.tag })
            .await
            .map_err(|e| storage_error("look up account link", e))?;
        Ok(user.map(|u| u.id))
    }

    async fn all_links(&self) -> Result<Vec<(PlayerId, RiotId)>> {
        let users: Vec<UserDocument> = self
            .users()
            .find(doc! {})
            .await
            .map_err(|e| storage_error("list account links", e))?
            .try_collect()
            .await
            .map_err(|e| storage_error("read account links", e))?;

        let mut links: Vec<(PlayerId, RiotId)> =
            users.into_iter().map(|u| (u.id.clone(), u.riot_id())).collect();
        links.sort();
        Ok(links)
    }
}

#[async_trait]
impl MatchHistoryStore for MongoStore {
    async fn insert(&self, guild_id: &str, record: MatchRecord) -> Result<()> {
        let document = MatchDocument {
            id: format!("{}:{}", guild_id, record.match_id),
            guild_id: guild_id.to_string(),
            record,
        };
        self.matches()
            .replace_one(doc! { "_id": document.id.as_str() }, &document)
            .upsert(true)
            .await
            .map_err(|e| storage_error("save match", e))?;
        Ok(())
    }

    async fn find_all(&self, guild_id: &str) -> Result<Vec<MatchRecord>> {
        let documents: Vec<MatchDocument> = self
            .matches()
            .find(doc! { "guild_id": guild_id })
            .await
            .map_err(|e| storage_error("list matches", e))?
            .try_collect()
            .await
            .map_err(|e| storage_error("read matches", e))?;

        let mut records: Vec<MatchRecord> = documents.into_iter().map(|d| d.record).collect();
        records.sort_by_key(|record| record.started_at);
        Ok(records)
    }
}
