//! Selection of the durable store backends

#[cfg(feature = "mongo-store")]
pub mod mongo;

use crate::config::{StorageBackend, StorageSettings};
use crate::error::{Result, ScrimError};
use crate::identity::{IdentityRegistry, InMemoryIdentityRegistry};
use crate::rating::{InMemoryRatingStore, RatingStore};
use crate::report::{InMemoryMatchHistory, MatchHistoryStore};
use std::sync::Arc;
use tracing::info;

/// The three stores a lifecycle writes through
#[derive(Clone)]
pub struct Stores {
    pub ratings: Arc<dyn RatingStore>,
    pub identity: Arc<dyn IdentityRegistry>,
    pub history: Arc<dyn MatchHistoryStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            ratings: Arc::new(InMemoryRatingStore::new()),
            identity: Arc::new(InMemoryIdentityRegistry::new()),
            history: Arc::new(InMemoryMatchHistory::new()),
        }
    }
}

/// Open the configured backend
pub async fn open_stores(settings: &StorageSettings) -> Result<Stores> {
    match settings.backend {
        StorageBackend::Memory => {
            info!("Using in-memory storage");
            Ok(Stores::in_memory())
        }
        StorageBackend::Mongo => open_mongo(settings).await,
    }
}

#[cfg(feature = "mongo-store")]
async fn open_mongo(settings: &StorageSettings) -> Result<Stores> {
    let uri = settings
        .mongo_uri
        .as_deref()
        .ok_or_else(|| ScrimError::ConfigurationError {
            message: "Mongo storage backend requires a mongo_uri".to_string(),
        })?;

    info!(
        "Using MongoDB storage - database: '{}'",
        settings.mongo_database
    );
    let store = Arc::new(mongo::MongoStore::connect(uri, &settings.mongo_database).await?);
    Ok(Stores {
        ratings: store.clone(),
        identity: store.clone(),
        history: store,
    })
}

#[cfg(not(feature = "mongo-store"))]
async fn open_mongo(_settings: &StorageSettings) -> Result<Stores> {
    Err(ScrimError::ConfigurationError {
        message: "Mongo storage backend requires the 'mongo-store' feature".to_string(),
    }
    .into())
}
