//! Lookup of per-guild lifecycles

use crate::config::LobbyConfig;
use crate::error::Result;
use crate::lobby::lifecycle::{LifecycleServices, LifecycleSnapshot, MatchLifecycle};
use crate::rating::RatingEngine;
use crate::types::GuildId;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Creates one `MatchLifecycle` per guild on first use and hands out clones after
#[derive(Clone)]
pub struct LifecycleRegistry {
    config: Arc<LobbyConfig>,
    engine: Arc<RatingEngine>,
    services: LifecycleServices,
    lifecycles: Arc<RwLock<HashMap<GuildId, MatchLifecycle>>>,
    seed: Option<u64>,
}

impl LifecycleRegistry {
    pub fn new(config: LobbyConfig, engine: RatingEngine, services: LifecycleServices) -> Self {
        Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
            services,
            lifecycles: Arc::new(RwLock::new(HashMap::new())),
            seed: None,
        }
    }

    /// Seed every lifecycle's random source; used for reproducible runs
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn services(&self) -> &LifecycleServices {
        &self.services
    }

    /// Lifecycle for a guild, loading its ratings the first time it is seen
    pub async fn lifecycle(&self, guild_id: &str) -> Result<MatchLifecycle> {
        if let Some(lifecycle) = self.lifecycles.read().await.get(guild_id) {
            return Ok(lifecycle.clone());
        }

        let mut lifecycles = self.lifecycles.write().await;
        if let Some(lifecycle) = lifecycles.get(guild_id) {
            return Ok(lifecycle.clone());
        }

        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(lifecycles.len() as u64)),
            None => StdRng::from_os_rng(),
        };
        let lifecycle = MatchLifecycle::with_rng(
            guild_id,
            self.config.clone(),
            self.engine.clone(),
            self.services.clone(),
            rng,
        );
        let records = lifecycle.load_ratings().await?;
        lifecycles.insert(guild_id.to_string(), lifecycle.clone());

        info!(
            "Lifecycle created - guild: '{}', rated_players: {}",
            guild_id, records
        );
        Ok(lifecycle)
    }

    /// Guilds with a lifecycle, sorted
    pub async fn guilds(&self) -> Vec<GuildId> {
        let mut guilds: Vec<GuildId> = self.lifecycles.read().await.keys().cloned().collect();
        guilds.sort();
        guilds
    }

    pub async fn snapshots(&self) -> Vec<LifecycleSnapshot> {
        let lifecycles: Vec<MatchLifecycle> =
            self.lifecycles.read().await.values().cloned().collect();

        let mut snapshots = Vec::with_capacity(lifecycles.len());
        for lifecycle in lifecycles {
            snapshots.push(lifecycle.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.guild_id.cmp(&b.guild_id));
        snapshots
    }

    /// Whether the registry lock can be taken without waiting
    pub fn is_accessible(&self) -> bool {
        self.lifecycles.try_read().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::identity::InMemoryIdentityRegistry;
    use crate::metrics::MetricsCollector;
    use crate::rating::{InMemoryRatingStore, RatingStore};
    use crate::report::provider::MockGameStatsProvider;
    use crate::report::InMemoryMatchHistory;
    use crate::types::{MatchPhase, RatingRecord};

    fn registry(store: Arc<InMemoryRatingStore>) -> LifecycleRegistry {
        let services = LifecycleServices {
            rating_store: store,
            identity: Arc::new(InMemoryIdentityRegistry::new()),
            stats_provider: Arc::new(MockGameStatsProvider::new()),
            history: Arc::new(InMemoryMatchHistory::new()),
            publisher: Arc::new(MockEventPublisher::new()),
            metrics: Arc::new(MetricsCollector::new().unwrap()),
        };
        LifecycleRegistry::new(LobbyConfig::default(), RatingEngine::default(), services)
            .with_seed(11)
    }

    #[tokio::test]
    async fn test_lifecycle_is_created_once_per_guild() {
        let store = Arc::new(InMemoryRatingStore::new());
        store
            .upsert("guild-a", RatingRecord::new("p1", 1200))
            .await
            .unwrap();
        let registry = registry(store);

        let first = registry.lifecycle("guild-a").await.unwrap();
        first
            .signup(&"p1".to_string(), crate::types::MatchFormat::ThreeVThree)
            .await
            .unwrap();

        let again = registry.lifecycle("guild-a").await.unwrap();
        assert_eq!(again.phase().await, MatchPhase::SigningUp);
        assert_eq!(again.ratings_snapshot().await["p1"].mmr, 1200);

        let other = registry.lifecycle("guild-b").await.unwrap();
        assert_eq!(other.phase().await, MatchPhase::Idle);

        assert_eq!(registry.guilds().await, vec!["guild-a", "guild-b"]);
        let snapshots = registry.snapshots().await;
        assert_eq!(snapshots[0].phase, MatchPhase::SigningUp);
        assert_eq!(snapshots[0].capacity, 6);
        assert_eq!(snapshots[1].rated_players, 0);
        assert!(registry.is_accessible());
    }
}
