//! Links between platform players and game accounts
//!
//! Accounts are stored normalized and each account belongs to at most one player.
//! Re-linking replaces a player's previous account.

use crate::error::{Result, ScrimError};
use crate::types::{PlayerId, RiotId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::info;

#[async_trait]
pub trait IdentityRegistry: Send + Sync {
    /// Account linked to a player
    async fn resolve(&self, player_id: &PlayerId) -> Result<Option<RiotId>>;

    /// Link or re-link a player's account
    async fn link(&self, player_id: &PlayerId, riot_id: &RiotId) -> Result<()>;

    /// Player owning an account
    async fn find_by_riot_id(&self, riot_id: &RiotId) -> Result<Option<PlayerId>>;

    /// Every (player, account) pair
    async fn all_links(&self) -> Result<Vec<(PlayerId, RiotId)>>;
}

#[derive(Debug, Default)]
pub struct InMemoryIdentityRegistry {
    links: RwLock<HashMap<PlayerId, RiotId>>,
}

impl InMemoryIdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityRegistry for InMemoryIdentityRegistry {
    async fn resolve(&self, player_id: &PlayerId) -> Result<Option<RiotId>> {
        let links = self.links.read().map_err(|_| ScrimError::InternalError {
            message: "Failed to acquire identity read lock".to_string(),
        })?;
        Ok(links.get(player_id).cloned())
    }

    async fn link(&self, player_id: &PlayerId, riot_id: &RiotId) -> Result<()> {
        let normalized = riot_id.normalized();
        let mut links = self.links.write().map_err(|_| ScrimError::InternalError {
            message: "Failed to acquire identity write lock".to_string(),
        })?;

        if let Some((owner, _)) = links
            .iter()
            .find(|(owner, linked)| **linked == normalized && *owner != player_id)
        {
            return Err(ScrimError::UserInput {
                reason: format!("{} is already linked to another player ({})", riot_id, owner),
            }
            .into());
        }

        links.insert(player_id.clone(), normalized);
        info!(
            "Linked account - player_id: '{}', riot_id: '{}'",
            player_id, riot_id
        );
        Ok(())
    }

    async fn find_by_riot_id(&self, riot_id: &RiotId) -> Result<Option<PlayerId>> {
        let normalized = riot_id.normalized();
        let links = self.links.read().map_err(|_| ScrimError::InternalError {
            message: "Failed to acquire identity read lock".to_string(),
        })?;
        Ok(links
            .iter()
            .find(|(_, linked)| **linked == normalized)
            .map(|(player_id, _)| player_id.clone()))
    }

    async fn all_links(&self) -> Result<Vec<(PlayerId, RiotId)>> {
        let links = self.links.read().map_err(|_| ScrimError::InternalError {
            message: "Failed to acquire identity read lock".to_string(),
        })?;
        let mut all: Vec<(PlayerId, RiotId)> =
            links.iter().map(|(p, r)| (p.clone(), r.clone())).collect();
        all.sort();
        Ok(all)
    }
}
