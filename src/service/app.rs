//! Main application state and service coordination
//!
//! `AppState` wires the stores, the stats provider, the AMQP publisher and
//! consumer, the lifecycle registry and the metrics server, and owns the
//! background tasks.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::CommandConsumer;
use crate::amqp::publisher::{AmqpEventPublisher, PublisherConfig};
use crate::config::AppConfig;
use crate::lobby::{LifecycleRegistry, LifecycleServices};
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector, MetricsService};
use crate::rating::RatingEngine;
use crate::report::HenrikDevProvider;
use crate::service::dispatcher::CommandDispatcher;
use crate::service::health::{HealthCheck, HealthStatus, ServiceProbe};
use crate::store::open_stores;
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    registry: LifecycleRegistry,
    probe: ServiceProbe,
    amqp_connection: Arc<AmqpConnection>,
    metrics_service: Arc<MetricsService>,
    dispatcher: Arc<CommandDispatcher>,
    background_tasks: Vec<JoinHandle<()>>,
    command_consumer: Option<CommandConsumer>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing scrim-room service");
        info!(
            "Configuration: service={}, amqp_url={}, storage={:?}",
            config.service.name, config.amqp.url, config.storage.backend
        );

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let amqp_connection = Self::initialize_amqp(&config).await?;
        let registry = Self::initialize_lifecycles(
            &config,
            amqp_connection.clone(),
            metrics_collector.clone(),
        )
        .await?;

        let probe = ServiceProbe::new(config.service.name.clone(), registry.clone());
        probe.set_amqp_connected(amqp_connection.is_alive());

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone()).with_probe(probe.clone()),
        );
        let metrics_service = Arc::new(MetricsService::new(metrics_collector, health_server));
        let dispatcher = Arc::new(CommandDispatcher::new(registry.clone()));

        Ok(Self {
            config,
            registry,
            probe,
            amqp_connection,
            metrics_service,
            dispatcher,
            background_tasks: Vec::new(),
            command_consumer: None,
        })
    }

    /// Start all background services and message consumption
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting scrim-room service");

        self.probe.set_running(true).await;
        self.start_metrics_service().await?;
        self.start_amqp_consumption().await?;
        self.start_background_tasks();

        info!("✅ Scrim-room service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of scrim-room service");

        self.probe.set_running(false).await;

        if let Some(consumer) = &self.command_consumer {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("✅ AMQP message consumption stopped");
            }
        }

        self.stop_background_tasks().await;

        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        } else {
            info!("✅ Metrics service stopped");
        }

        // Reported results must reach the store before the process exits
        let flushes = self.registry.guilds().await.into_iter().map(|guild_id| {
            let registry = self.registry.clone();
            async move {
                let result = match registry.lifecycle(&guild_id).await {
                    Ok(lifecycle) => lifecycle.wait_for_persistence().await,
                    Err(e) => Err(e),
                };
                result.err().map(|e| format!("{}: {}", guild_id, e))
            }
        });
        let unsaved: Vec<String> = join_all(flushes).await.into_iter().flatten().collect();

        if let Err(e) = self.amqp_connection.close().await {
            warn!("Failed to close AMQP connection: {}", e);
        }

        if !unsaved.is_empty() {
            return Err(ServiceError::BackgroundTask {
                message: format!("Unsaved match results: {}", unsaved.join("; ")),
            });
        }

        let final_stats = HealthCheck::check(&self.probe)
            .await
            .map(|health| health.stats)
            .unwrap_or_default();
        info!("Final service statistics: {:?}", final_stats);
        info!("✅ Scrim-room service shutdown completed");

        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        self.probe.is_running().await
    }

    pub fn registry(&self) -> &LifecycleRegistry {
        &self.registry
    }

    /// Cloneable view used by health checks
    pub fn probe(&self) -> ServiceProbe {
        self.probe.clone()
    }

    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config =
            AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    /// Build the stores, stats provider and publisher behind every lifecycle
    async fn initialize_lifecycles(
        config: &AppConfig,
        amqp_connection: Arc<AmqpConnection>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Result<LifecycleRegistry, ServiceError> {
        info!("Initializing match lifecycle components");

        let stores =
            open_stores(&config.storage)
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to open storage: {}", e),
                })?;

        let stats_provider = Arc::new(
            HenrikDevProvider::new(config.stats_provider.clone()).map_err(|e| {
                ServiceError::Initialization {
                    message: format!("Failed to create stats provider: {}", e),
                }
            })?,
        );

        let channel =
            amqp_connection
                .open_channel()
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to open AMQP channel: {}", e),
                })?;

        let publisher_config = PublisherConfig {
            reply_exchange: config.amqp.reply_exchange.clone(),
            event_exchange: config.amqp.event_exchange.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
            ..PublisherConfig::default()
        };
        let publisher = Arc::new(
            AmqpEventPublisher::new(channel, publisher_config)
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to initialize event publisher: {}", e),
                })?,
        );

        let services = LifecycleServices {
            rating_store: stores.ratings,
            identity: stores.identity,
            stats_provider,
            history: stores.history,
            publisher,
            metrics: metrics_collector,
        };

        Ok(LifecycleRegistry::new(
            config.matchmaking.clone(),
            RatingEngine::new(config.rating.clone()),
            services,
        ))
    }

    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });
        self.background_tasks.push(metrics_handle);

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    async fn start_amqp_consumption(&mut self) -> Result<(), ServiceError> {
        let queue = self.config.amqp.command_queue.clone();

        let channel =
            self.amqp_connection
                .open_channel()
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to open consumer channel: {}", e),
                })?;

        let queue_declare_args = amqprs::channel::QueueDeclareArguments::new(&queue)
            .durable(true)
            .auto_delete(false)
            .finish();
        channel
            .queue_declare(queue_declare_args)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", queue, e),
            })?;
        info!("Queue '{}' declared successfully", queue);

        let consumer = CommandConsumer::new(self.dispatcher.clone(), channel);
        consumer
            .start_consuming(&queue)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming messages: {}", e),
            })?;

        self.command_consumer = Some(consumer);
        info!("Now listening for chat commands on queue: '{}'", queue);
        Ok(())
    }

    fn start_background_tasks(&mut self) {
        info!("Starting health metrics task (60s interval)...");

        let probe = self.probe.clone();
        let metrics_collector = self.metrics_service.collector();
        let amqp_connection = self.amqp_connection.clone();

        let health_metrics_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));

            while probe.is_running().await {
                interval.tick().await;

                probe.set_amqp_connected(amqp_connection.is_alive());
                metrics_collector
                    .service()
                    .uptime_seconds
                    .set(probe.uptime_seconds() as i64);

                match HealthCheck::check(&probe).await {
                    Ok(health) => {
                        metrics_collector.update_health_status(health.status.as_gauge());
                        for check in &health.checks {
                            metrics_collector.update_component_health(
                                &check.name,
                                check.status == HealthStatus::Healthy,
                            );
                        }
                        debug!(
                            "Updated service health metrics - status: {}, active_matches: {}",
                            health.status, health.stats.active_matches
                        );
                    }
                    Err(e) => warn!("Health check failed: {}", e),
                }

                for snapshot in probe.registry().snapshots().await {
                    metrics_collector
                        .record_rated_players(&snapshot.guild_id, snapshot.rated_players);
                }
            }

            info!("Health metrics task stopped");
        });

        self.background_tasks.push(health_metrics_task);
    }

    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            return;
        }

        info!("Stopping {} background tasks...", task_count);
        for task in self.background_tasks.drain(..) {
            task.abort();
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
        info!("✅ All {} background tasks stopped", task_count);
    }
}
