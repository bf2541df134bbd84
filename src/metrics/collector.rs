//! Metrics collection using Prometheus
//!
//! Metric groups mirror the service's concerns: the process itself, inbound
//! commands, votes, the match lifecycle and the rating engine.

use crate::types::{MatchPhase, RatingChange, VoteKind, VoteResolution};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the scrim service
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    service_metrics: ServiceMetrics,
    command_metrics: CommandMetrics,
    vote_metrics: VoteMetrics,
    match_metrics: MatchMetrics,
    rating_metrics: RatingMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    pub uptime_seconds: IntGauge,
    pub amqp_messages_total: IntCounterVec,
    pub amqp_errors_total: IntCounterVec,
    /// 0=unhealthy, 1=degraded, 2=healthy
    pub health_status: IntGauge,
    pub component_health: IntGaugeVec,
}

/// Inbound command metrics
#[derive(Clone)]
pub struct CommandMetrics {
    /// Commands handled by name and outcome (ok or error kind)
    pub commands_total: IntCounterVec,
    pub command_duration: HistogramVec,
}

#[derive(Clone)]
pub struct VoteMetrics {
    pub votes_started_total: IntCounterVec,
    pub ballots_total: IntCounterVec,
    pub votes_decided_total: IntCounterVec,
}

/// Match lifecycle metrics
#[derive(Clone)]
pub struct MatchMetrics {
    pub signups_total: IntCounter,
    pub matches_started_total: IntCounter,
    pub matches_cancelled_total: IntCounter,
    /// Report attempts by outcome
    pub reports_total: IntCounterVec,
    /// Current lifecycle phase per guild, see `MatchPhase::ordinal`
    pub phase: IntGaugeVec,
    pub queued_players: IntGaugeVec,
}

#[derive(Clone)]
pub struct RatingMetrics {
    pub mmr_delta: Histogram,
    pub rating_update_duration: Histogram,
    pub rated_players: IntGaugeVec,
    pub persistence_failures_total: IntCounter,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let command_metrics = CommandMetrics::new(&registry)?;
        let vote_metrics = VoteMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let rating_metrics = RatingMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            command_metrics,
            vote_metrics,
            match_metrics,
            rating_metrics,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn commands(&self) -> &CommandMetrics {
        &self.command_metrics
    }

    pub fn votes(&self) -> &VoteMetrics {
        &self.vote_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn ratings(&self) -> &RatingMetrics {
        &self.rating_metrics
    }

    /// Record a handled command; `outcome` is "ok" or an error kind
    pub fn record_command(&self, command: &str, outcome: &str, duration: Duration) {
        self.command_metrics
            .commands_total
            .with_label_values(&[command, outcome])
            .inc();
        self.command_metrics
            .command_duration
            .with_label_values(&[command])
            .observe(duration.as_secs_f64());
    }

    pub fn record_vote_started(&self, kind: VoteKind) {
        self.vote_metrics
            .votes_started_total
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn record_ballot(&self, kind: VoteKind) {
        self.vote_metrics
            .ballots_total
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn record_vote_decided(&self, kind: VoteKind, resolution: VoteResolution) {
        self.vote_metrics
            .votes_decided_total
            .with_label_values(&[kind.as_str(), resolution.as_str()])
            .inc();
    }

    pub fn record_signup(&self) {
        self.match_metrics.signups_total.inc();
    }

    pub fn record_match_started(&self) {
        self.match_metrics.matches_started_total.inc();
    }

    pub fn record_match_cancelled(&self) {
        self.match_metrics.matches_cancelled_total.inc();
    }

    /// Record a report attempt; `outcome` is "ok" or an error kind
    pub fn record_report(&self, outcome: &str) {
        self.match_metrics
            .reports_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn record_phase(&self, guild_id: &str, phase: MatchPhase) {
        self.match_metrics
            .phase
            .with_label_values(&[guild_id])
            .set(phase.ordinal());
    }

    pub fn record_queue_size(&self, guild_id: &str, size: usize) {
        self.match_metrics
            .queued_players
            .with_label_values(&[guild_id])
            .set(size as i64);
    }

    /// Record the MMR movements of a reported match
    pub fn record_rating_changes(&self, changes: &[RatingChange], duration: Duration) {
        for change in changes {
            self.rating_metrics.mmr_delta.observe(change.delta() as f64);
        }
        self.rating_metrics
            .rating_update_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_rated_players(&self, guild_id: &str, count: usize) {
        self.rating_metrics
            .rated_players
            .with_label_values(&[guild_id])
            .set(count as i64);
    }

    pub fn record_persistence_failure(&self) {
        self.rating_metrics.persistence_failures_total.inc();
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }
    }

    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("scrim_room_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "scrim_room_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("scrim_room_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "scrim_room_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("scrim_room_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl CommandMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let commands_total = IntCounterVec::new(
            Opts::new("scrim_room_commands_total", "Commands handled"),
            &["command", "outcome"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let command_duration = HistogramVec::new(
            HistogramOpts::new(
                "scrim_room_command_duration_seconds",
                "Command handling time",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
            &["command"],
        )?;
        registry.register(Box::new(command_duration.clone()))?;

        Ok(Self {
            commands_total,
            command_duration,
        })
    }
}

impl VoteMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let votes_started_total = IntCounterVec::new(
            Opts::new("scrim_room_votes_started_total", "Votes opened"),
            &["kind"],
        )?;
        registry.register(Box::new(votes_started_total.clone()))?;

        let ballots_total = IntCounterVec::new(
            Opts::new("scrim_room_ballots_total", "Accepted ballots"),
            &["kind"],
        )?;
        registry.register(Box::new(ballots_total.clone()))?;

        let votes_decided_total = IntCounterVec::new(
            Opts::new("scrim_room_votes_decided_total", "Votes decided"),
            &["kind", "resolution"],
        )?;
        registry.register(Box::new(votes_decided_total.clone()))?;

        Ok(Self {
            votes_started_total,
            ballots_total,
            votes_decided_total,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let signups_total = IntCounter::new("scrim_room_signups_total", "Signups opened")?;
        registry.register(Box::new(signups_total.clone()))?;

        let matches_started_total =
            IntCounter::new("scrim_room_matches_started_total", "Matches started")?;
        registry.register(Box::new(matches_started_total.clone()))?;

        let matches_cancelled_total =
            IntCounter::new("scrim_room_matches_cancelled_total", "Matches cancelled")?;
        registry.register(Box::new(matches_cancelled_total.clone()))?;

        let reports_total = IntCounterVec::new(
            Opts::new("scrim_room_reports_total", "Match report attempts"),
            &["outcome"],
        )?;
        registry.register(Box::new(reports_total.clone()))?;

        let phase = IntGaugeVec::new(
            Opts::new("scrim_room_lifecycle_phase", "Current lifecycle phase"),
            &["guild"],
        )?;
        registry.register(Box::new(phase.clone()))?;

        let queued_players = IntGaugeVec::new(
            Opts::new("scrim_room_queued_players", "Players in the signup queue"),
            &["guild"],
        )?;
        registry.register(Box::new(queued_players.clone()))?;

        Ok(Self {
            signups_total,
            matches_started_total,
            matches_cancelled_total,
            reports_total,
            phase,
            queued_players,
        })
    }
}

impl RatingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let mmr_delta = Histogram::with_opts(
            HistogramOpts::new("scrim_room_mmr_delta", "MMR change per player per match")
                .buckets(vec![-32.0, -24.0, -16.0, -8.0, 0.0, 8.0, 16.0, 24.0, 32.0]),
        )?;
        registry.register(Box::new(mmr_delta.clone()))?;

        let rating_update_duration = Histogram::with_opts(
            HistogramOpts::new(
                "scrim_room_rating_update_duration_seconds",
                "Rating update time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(rating_update_duration.clone()))?;

        let rated_players = IntGaugeVec::new(
            Opts::new("scrim_room_rated_players", "Players with a rating record"),
            &["guild"],
        )?;
        registry.register(Box::new(rated_players.clone()))?;

        let persistence_failures_total = IntCounter::new(
            "scrim_room_persistence_failures_total",
            "Failed rating or history writes",
        )?;
        registry.register(Box::new(persistence_failures_total.clone()))?;

        Ok(Self {
            mmr_delta,
            rating_update_duration,
            rated_players,
            persistence_failures_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Encoder;

    fn render(collector: &MetricsCollector) -> String {
        let mut buffer = Vec::new();
        prometheus::TextEncoder::new()
            .encode(&collector.registry().gather(), &mut buffer)
            .unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        let _service = collector.service();
        let _commands = collector.commands();
        let _votes = collector.votes();
        let _matches = collector.matches();
        let _ratings = collector.ratings();
    }

    #[test]
    fn test_command_and_vote_recording() {
        let collector = MetricsCollector::new().unwrap();

        collector.record_command("join_queue", "ok", Duration::from_millis(3));
        collector.record_command("join_queue", "user_input", Duration::from_millis(1));
        collector.record_vote_started(VoteKind::Mode);
        collector.record_ballot(VoteKind::Mode);
        collector.record_vote_decided(VoteKind::Mode, VoteResolution::TimeoutTie);

        assert_eq!(
            collector
                .commands()
                .commands_total
                .with_label_values(&["join_queue", "ok"])
                .get(),
            1
        );
        let text = render(&collector);
        assert!(text.contains("scrim_room_votes_decided_total"));
        assert!(text.contains("timeout_tie"));
    }

    #[test]
    fn test_phase_gauge_per_guild() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_phase("guild-a", MatchPhase::MapVote);
        collector.record_phase("guild-b", MatchPhase::Idle);

        assert_eq!(
            collector
                .matches()
                .phase
                .with_label_values(&["guild-a"])
                .get(),
            4
        );
    }

    #[test]
    fn test_rating_changes_recorded() {
        let collector = MetricsCollector::new().unwrap();
        let changes = vec![
            RatingChange {
                player_id: "a".to_string(),
                old_mmr: 1000,
                new_mmr: 1016,
                won: true,
            },
            RatingChange {
                player_id: "b".to_string(),
                old_mmr: 1000,
                new_mmr: 984,
                won: false,
            },
        ];
        collector.record_rating_changes(&changes, Duration::from_micros(40));
        assert_eq!(collector.ratings().mmr_delta.get_sample_count(), 2);
    }

    #[test]
    fn test_metrics_timer() {
        let collector = MetricsCollector::new().unwrap();
        let timer = collector.start_timer();

        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.elapsed() >= Duration::from_millis(10));
        assert!(timer.stop() >= Duration::from_millis(10));
    }
}
