//! Health check endpoints and Prometheus metrics server
//!
//! Axum routes for probes, Prometheus scraping and a per-guild stats view.

use crate::metrics::collector::MetricsCollector;
use crate::service::health::{HealthCheck, HealthStatus, ServiceProbe};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const SERVICE_NAME: &str = "scrim-room";

/// Health server configuration
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub port: u16,
    /// Typically "0.0.0.0" for all interfaces
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Shared state for the health server
#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    pub probe: Option<ServiceProbe>,
}

/// Health server that provides HTTP endpoints for monitoring
pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                probe: None,
            },
            shutdown_tx,
        }
    }

    /// Attach the service probe used by the health endpoints
    pub fn with_probe(mut self, probe: ServiceProbe) -> Self {
        self.state.probe = Some(probe);
        self
    }

    /// Bind and serve until `stop` is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid health server address")?;

        let app = self.create_router();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind health server to {}", addr))?;

        info!("Health server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Health server shutdown signal received");
            })
            .await?;

        info!("Health server stopped");
        Ok(())
    }

    fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .with_state(self.state.clone())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping health server...");

        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to health server: {}", e);
        }
        Ok(())
    }
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/ready", "/alive", "/metrics", "/stats"]
    }))
}

fn not_initialized() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({
            "status": "unhealthy",
            "service": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "error": "Service not initialized"
        })),
    )
        .into_response()
}

/// Lightweight health check
async fn health_handler(State(state): State<HealthServerState>) -> Response {
    debug!("Health check requested");

    let Some(probe) = &state.probe else {
        return not_initialized();
    };

    let (code, status) = match HealthCheck::liveness_check(probe).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "healthy"),
        Ok(HealthStatus::Degraded) => (StatusCode::OK, "degraded"),
        Ok(HealthStatus::Unhealthy) | Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
    };

    (
        code,
        Json(json!({
            "status": status,
            "service": probe.service_name(),
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
        .into_response()
}

async fn ready_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Readiness check requested");

    match &state.probe {
        Some(probe) => match HealthCheck::readiness_check(probe).await {
            Ok(HealthStatus::Healthy) => (StatusCode::OK, "Ready"),
            Ok(HealthStatus::Degraded) => (StatusCode::OK, "Degraded but ready"),
            Ok(HealthStatus::Unhealthy) => (StatusCode::SERVICE_UNAVAILABLE, "Not ready"),
            Err(e) => {
                error!("Readiness check failed: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Not ready")
            }
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized"),
    }
}

async fn alive_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Liveness check requested");

    match &state.probe {
        Some(probe) => match HealthCheck::liveness_check(probe).await {
            Ok(HealthStatus::Healthy) => (StatusCode::OK, "Alive"),
            _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive"),
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized"),
    }
}

async fn metrics_handler(State(state): State<HealthServerState>) -> Response {
    match render_metrics(&state.metrics_collector) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics".to_string(),
            )
                .into_response()
        }
    }
}

/// Full health report plus the lifecycle phase of every known guild
async fn stats_handler(State(state): State<HealthServerState>) -> Response {
    debug!("Stats endpoint requested");

    let Some(probe) = &state.probe else {
        return not_initialized();
    };

    match HealthCheck::check(probe).await {
        Ok(health) => {
            let guilds = probe.registry().snapshots().await;
            (
                StatusCode::OK,
                Json(json!({
                    "service": {
                        "name": probe.service_name(),
                        "version": env!("CARGO_PKG_VERSION"),
                        "status": health.status,
                        "uptime_seconds": health.stats.uptime_seconds
                    },
                    "matches": {
                        "active": health.stats.active_matches,
                        "queued_players": health.stats.queued_players,
                        "open_votes": health.stats.open_votes
                    },
                    "guilds": guilds,
                    "components": health.checks,
                    "timestamp": chrono::Utc::now()
                })),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to get stats: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "service": { "name": probe.service_name(), "status": "error" },
                    "error": "Failed to get service stats"
                })),
            )
                .into_response()
        }
    }
}

/// Prometheus text exposition of every registered metric
pub fn render_metrics(collector: &MetricsCollector) -> Result<String> {
    let metric_families = collector.registry().gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output was not UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::config::LobbyConfig;
    use crate::identity::InMemoryIdentityRegistry;
    use crate::lobby::{LifecycleRegistry, LifecycleServices};
    use crate::rating::{InMemoryRatingStore, RatingEngine};
    use crate::report::provider::MockGameStatsProvider;
    use crate::report::InMemoryMatchHistory;
    use crate::types::MatchFormat;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn probe(collector: Arc<MetricsCollector>) -> ServiceProbe {
        let services = LifecycleServices {
            rating_store: Arc::new(InMemoryRatingStore::new()),
            identity: Arc::new(InMemoryIdentityRegistry::new()),
            stats_provider: Arc::new(MockGameStatsProvider::new()),
            history: Arc::new(InMemoryMatchHistory::new()),
            publisher: Arc::new(MockEventPublisher::new()),
            metrics: collector,
        };
        let registry =
            LifecycleRegistry::new(LobbyConfig::default(), RatingEngine::default(), services);
        ServiceProbe::new(SERVICE_NAME, registry)
    }

    async fn get(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let collector = Arc::new(MetricsCollector::new().unwrap());
        let server = HealthServer::new(HealthServerConfig::default(), collector);

        let response = get(server.create_router(), "/").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let collector = Arc::new(MetricsCollector::new().unwrap());
        collector.record_signup();
        collector.update_health_status(2);

        let server = HealthServer::new(HealthServerConfig::default(), collector);
        let response = get(server.create_router(), "/metrics").await;

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("scrim_room_signups_total 1"));
    }

    #[tokio::test]
    async fn test_endpoints_without_probe() {
        let collector = Arc::new(MetricsCollector::new().unwrap());
        let app = HealthServer::new(HealthServerConfig::default(), collector).create_router();

        for uri in ["/health", "/ready", "/alive", "/stats"] {
            let response = get(app.clone(), uri).await;
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_running_service_reports_guild_phases() {
        let collector = Arc::new(MetricsCollector::new().unwrap());
        let probe = probe(collector.clone());
        probe.set_running(true).await;
        probe
            .registry()
            .lifecycle("guild-9")
            .await
            .unwrap()
            .signup(&"p1".to_string(), MatchFormat::FiveVFive)
            .await
            .unwrap();

        let app = HealthServer::new(HealthServerConfig::default(), collector)
            .with_probe(probe)
            .create_router();

        assert_eq!(get(app.clone(), "/alive").await.status(), StatusCode::OK);
        assert_eq!(get(app.clone(), "/ready").await.status(), StatusCode::OK);

        let response = get(app, "/stats").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let stats: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats["matches"]["active"], 1);
        assert_eq!(stats["guilds"][0]["guild_id"], "guild-9");
        assert_eq!(stats["guilds"][0]["phase"], "SigningUp");
    }

    #[tokio::test]
    async fn test_404_handling() {
        let collector = Arc::new(MetricsCollector::new().unwrap());
        let app = HealthServer::new(HealthServerConfig::default(), collector).create_router();

        assert_eq!(
            get(app, "/nonexistent").await.status(),
            StatusCode::NOT_FOUND
        );
    }
}
