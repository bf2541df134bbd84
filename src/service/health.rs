//! Health check endpoints and monitoring
//!
//! `ServiceProbe` is the cheap, cloneable view of the running service that the
//! health server and the background health loop inspect.

use crate::lobby::LifecycleRegistry;
use crate::types::MatchPhase;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Numeric form used by the health gauge
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Unhealthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Healthy => 2,
        }
    }

    fn worst(self, other: &HealthStatus) -> HealthStatus {
        if other.as_gauge() < self.as_gauge() {
            other.clone()
        } else {
            self
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Shared handles the health checks read from
#[derive(Clone)]
pub struct ServiceProbe {
    service_name: String,
    registry: LifecycleRegistry,
    is_running: Arc<RwLock<bool>>,
    amqp_connected: Arc<AtomicBool>,
    started_at: Instant,
}

impl ServiceProbe {
    pub fn new(service_name: impl Into<String>, registry: LifecycleRegistry) -> Self {
        Self {
            service_name: service_name.into(),
            registry,
            is_running: Arc::new(RwLock::new(false)),
            amqp_connected: Arc::new(AtomicBool::new(false)),
            started_at: Instant::now(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn registry(&self) -> &LifecycleRegistry {
        &self.registry
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub async fn set_running(&self, running: bool) {
        *self.is_running.write().await = running;
    }

    pub fn amqp_connected(&self) -> bool {
        self.amqp_connected.load(Ordering::Relaxed)
    }

    pub fn set_amqp_connected(&self, connected: bool) {
        self.amqp_connected.store(connected, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Set when the component is not healthy
    pub message: Option<String>,
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceStats {
    /// Guilds that have issued at least one command
    pub guilds: usize,
    /// Guilds with a match past Idle
    pub active_matches: usize,
    pub queued_players: usize,
    pub open_votes: usize,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(probe: &ServiceProbe) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(probe).await,
            Self::check_registry(probe),
            Self::check_amqp(probe),
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.worst(&check.status));
        let stats = Self::gather_service_stats(probe).await;

        Ok(HealthCheck {
            status,
            service: probe.service_name().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(probe: &ServiceProbe) -> Result<HealthStatus> {
        if probe.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - the service must be running and its registry reachable
    pub async fn readiness_check(probe: &ServiceProbe) -> Result<HealthStatus> {
        if !probe.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }
        Ok(Self::check_registry(probe).status)
    }

    async fn check_service_running(probe: &ServiceProbe) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if probe.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_registry(probe: &ServiceProbe) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if probe.registry().is_accessible() {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Degraded,
                Some("Lifecycle registry is busy".to_string()),
            )
        };

        ComponentCheck {
            name: "lifecycle_registry".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Commands cannot arrive without the broker, but HTTP stays useful
    fn check_amqp(probe: &ServiceProbe) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if probe.amqp_connected() {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Degraded,
                Some("AMQP connection is not established".to_string()),
            )
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn gather_service_stats(probe: &ServiceProbe) -> ServiceStats {
        let snapshots = probe.registry().snapshots().await;

        ServiceStats {
            guilds: snapshots.len(),
            active_matches: snapshots
                .iter()
                .filter(|s| s.phase != MatchPhase::Idle)
                .count(),
            queued_players: snapshots.iter().map(|s| s.queued).sum(),
            open_votes: snapshots.iter().filter(|s| s.open_vote.is_some()).count(),
            uptime_seconds: probe.uptime_seconds(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::config::LobbyConfig;
    use crate::identity::InMemoryIdentityRegistry;
    use crate::lobby::LifecycleServices;
    use crate::metrics::MetricsCollector;
    use crate::rating::{InMemoryRatingStore, RatingEngine};
    use crate::report::provider::MockGameStatsProvider;
    use crate::report::InMemoryMatchHistory;
    use crate::types::MatchFormat;

    fn test_probe() -> ServiceProbe {
        let services = LifecycleServices {
            rating_store: Arc::new(InMemoryRatingStore::new()),
            identity: Arc::new(InMemoryIdentityRegistry::new()),
            stats_provider: Arc::new(MockGameStatsProvider::new()),
            history: Arc::new(InMemoryMatchHistory::new()),
            publisher: Arc::new(MockEventPublisher::new()),
            metrics: Arc::new(MetricsCollector::new().unwrap()),
        };
        let registry =
            LifecycleRegistry::new(LobbyConfig::default(), RatingEngine::default(), services);
        ServiceProbe::new("scrim-room", registry)
    }

    #[tokio::test]
    async fn test_stopped_service_is_unhealthy() {
        let probe = test_probe();

        let health = HealthCheck::check(&probe).await.unwrap();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(
            HealthCheck::liveness_check(&probe).await.unwrap(),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthCheck::readiness_check(&probe).await.unwrap(),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_missing_broker_degrades() {
        let probe = test_probe();
        probe.set_running(true).await;

        let health = HealthCheck::check(&probe).await.unwrap();
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.checks.len(), 3);

        probe.set_amqp_connected(true);
        let health = HealthCheck::check(&probe).await.unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.checks.iter().all(|c| c.message.is_none()));
    }

    #[tokio::test]
    async fn test_stats_count_active_matches() {
        let probe = test_probe();
        probe.set_running(true).await;
        let lifecycle = probe.registry().lifecycle("guild-1").await.unwrap();
        lifecycle
            .signup(&"p1".to_string(), MatchFormat::FiveVFive)
            .await
            .unwrap();
        probe.registry().lifecycle("guild-2").await.unwrap();

        let health = HealthCheck::check(&probe).await.unwrap();
        assert_eq!(health.stats.guilds, 2);
        assert_eq!(health.stats.active_matches, 1);
        assert_eq!(health.stats.queued_players, 0);

        let json = health.to_json().unwrap();
        assert!(json.contains("\"active_matches\": 1"));
    }

    #[test]
    fn test_status_ordering() {
        assert_eq!(
            HealthStatus::Healthy.worst(&HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Unhealthy.worst(&HealthStatus::Degraded),
            HealthStatus::Unhealthy
        );
    }
}
