//! Command dispatch: one chat command in, one reply out
//!
//! The dispatcher resolves the guild's `MatchLifecycle`, runs the command and
//! turns the result into a `CommandReply`. Domain errors become `Err` replies with
//! the error's kind; they are never propagated to the consumer.

use crate::amqp::handlers::MessageHandler;
use crate::amqp::messages::MessageUtils;
use crate::error::{error_kind, Result, ScrimError};
use crate::lobby::{CastOutcome, LifecycleRegistry, MatchLifecycle};
use crate::metrics::MetricsCollector;
use crate::rating::{LeaderboardPage, PlayerStanding};
use crate::types::{
    CaptainSlot, ChatCommand, CommandReply, CommandRequest, PlayerRef, ReplyOutcome, TeamSide,
};
use crate::utils::{current_timestamp, parse_riot_id};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Routes commands to the per-guild lifecycle and publishes the replies
pub struct CommandDispatcher {
    registry: LifecycleRegistry,
    metrics: Arc<MetricsCollector>,
}

impl CommandDispatcher {
    pub fn new(registry: LifecycleRegistry) -> Self {
        let metrics = registry.services().metrics.clone();
        Self { registry, metrics }
    }

    pub fn registry(&self) -> &LifecycleRegistry {
        &self.registry
    }

    /// Run a command and build its reply
    pub async fn dispatch(&self, request: &CommandRequest) -> CommandReply {
        let command_name = request.command.name();
        let timer = self.metrics.start_timer();

        info!(
            "Processing command - guild: '{}', player: '{}', command: {:?}",
            request.guild_id, request.player.player_id, request.command
        );

        let (outcome, ephemeral) = match self.execute(request).await {
            Ok(message) => (
                ReplyOutcome::Ok { message },
                private_on_success(&request.command),
            ),
            Err(e) => {
                let kind = error_kind(&e);
                let ephemeral = e
                    .downcast_ref::<ScrimError>()
                    .map(ScrimError::is_ephemeral)
                    .unwrap_or(false);
                if ephemeral {
                    debug!(
                        "Command rejected - guild: '{}', command: {}, reason: {}",
                        request.guild_id, command_name, e
                    );
                } else {
                    warn!(
                        "Command failed - guild: '{}', command: {}, kind: {}, error: {}",
                        request.guild_id, command_name, kind, e
                    );
                }
                (
                    ReplyOutcome::Err {
                        kind: kind.to_string(),
                        message: e.to_string(),
                    },
                    ephemeral,
                )
            }
        };

        let metric_outcome = match &outcome {
            ReplyOutcome::Ok { .. } => "ok",
            ReplyOutcome::Err { kind, .. } => kind.as_str(),
        };
        self.metrics
            .record_command(command_name, metric_outcome, timer.stop());

        CommandReply {
            guild_id: request.guild_id.clone(),
            player_id: request.player.player_id.clone(),
            command: command_name.to_string(),
            correlation_id: request.correlation_id.clone(),
            ephemeral,
            outcome,
            timestamp: current_timestamp(),
        }
    }

    async fn execute(&self, request: &CommandRequest) -> Result<String> {
        let lifecycle = self.registry.lifecycle(&request.guild_id).await?;
        let player = &request.player;

        match &request.command {
            ChatCommand::Signup { format } => {
                let match_name = lifecycle.signup(&player.player_id, *format).await?;
                Ok(format!(
                    "Signup for {} ({}) is open. Join the queue to play!",
                    match_name, format
                ))
            }
            ChatCommand::JoinQueue => {
                let queued = lifecycle.join_queue(player).await?;
                Ok(format!("You joined the queue ({} queued)", queued))
            }
            ChatCommand::LeaveQueue => {
                let queued = lifecycle.leave_queue(&player.player_id).await?;
                Ok(format!("You left the queue ({} queued)", queued))
            }
            ChatCommand::Vote { kind, option } => {
                match lifecycle.cast_vote(&player.player_id, *kind, option).await? {
                    CastOutcome::Counted { .. } => Ok(format!("Vote for {} recorded", option)),
                    CastOutcome::Decided(decision) => Ok(format!(
                        "Vote recorded. {} wins the {} vote",
                        decision.option,
                        decision.kind.as_str()
                    )),
                }
            }
            ChatCommand::SetCaptain { slot, riot_id } => {
                let riot_id = parse_riot_id(riot_id)?;
                let captain = lifecycle.set_captain(*slot, &riot_id).await?;
                let slot = match slot {
                    CaptainSlot::One => 1,
                    CaptainSlot::Two => 2,
                };
                Ok(format!("Captain {} is now {}", slot, captain.riot_id))
            }
            ChatCommand::Report => {
                let report = lifecycle.report(&player.player_id).await?;
                let winner = match report.winner {
                    TeamSide::Team1 => "Team 1",
                    TeamSide::Team2 => "Team 2",
                };
                let mut message = format!(
                    "{} on {} reported: {} wins, {} ratings updated",
                    report.match_name,
                    report.map,
                    winner,
                    report.changes.len()
                );
                if !report.promoted.is_empty() {
                    message.push_str(&format!(
                        ". New top player: {}",
                        report.promoted.join(", ")
                    ));
                }
                Ok(message)
            }
            ChatCommand::Stats { account } => {
                let account = account.as_deref().map(parse_riot_id).transpose()?;
                let standing = lifecycle
                    .player_stats(&player.player_id, account.as_ref())
                    .await?;
                Ok(format_standing(&standing))
            }
            ChatCommand::Leaderboard { sort, page } => {
                let page = lifecycle.start_live_leaderboard(*sort, *page).await;
                Ok(format_leaderboard(&page))
            }
            ChatCommand::StopLeaderboard => {
                let stopped = lifecycle.stop_live_leaderboards().await;
                Ok(format!("Stopped {} live leaderboard(s)", stopped))
            }
            ChatCommand::LinkAccount { riot_id } => {
                self.link_account(&lifecycle, player, riot_id).await
            }
            ChatCommand::Cancel => {
                let match_name = lifecycle.cancel().await?;
                Ok(format!("{} has been cancelled", match_name))
            }
            ChatCommand::Reaggregate => {
                let outcome = lifecycle.reaggregate().await?;
                Ok(format!(
                    "Rebuilt {} player records from {} matches ({} skipped)",
                    outcome.players, outcome.matches_applied, outcome.matches_skipped
                ))
            }
            ChatCommand::RecalculateAverages => {
                let count = lifecycle.recalculate_averages().await?;
                Ok(format!("Recalculated averages for {} players", count))
            }
        }
    }

    async fn link_account(
        &self,
        lifecycle: &MatchLifecycle,
        player: &PlayerRef,
        input: &str,
    ) -> Result<String> {
        let requested = parse_riot_id(input)?;
        let services = self.registry.services();

        let account = services
            .stats_provider
            .fetch_account(&requested)
            .await?
            .ok_or_else(|| ScrimError::AccountNotFound {
                riot_id: requested.to_string(),
            })?;

        services.identity.link(&player.player_id, &account).await?;
        lifecycle
            .update_display_name(&player.player_id, &account)
            .await?;

        Ok(format!("Linked your account to {}", account))
    }
}

#[async_trait]
impl MessageHandler for CommandDispatcher {
    async fn handle_command(&self, request: CommandRequest) -> Result<()> {
        MessageUtils::validate_command_request(&request)?;

        let reply = self.dispatch(&request).await;
        let result = self.registry.services().publisher.publish_reply(reply).await;
        self.metrics
            .record_amqp_operation("publish_reply", result.is_ok());
        result
    }

    async fn handle_error(&self, error: anyhow::Error, message_data: &[u8]) {
        warn!(
            "Dropping unprocessable command - size: {} bytes, error: {}",
            message_data.len(),
            error
        );
        self.metrics.record_command(
            "unknown",
            error_kind(&error),
            std::time::Duration::ZERO,
        );
    }
}

/// Replies that only concern the invoking player
fn private_on_success(command: &ChatCommand) -> bool {
    matches!(
        command,
        ChatCommand::JoinQueue
            | ChatCommand::LeaveQueue
            | ChatCommand::Vote { .. }
            | ChatCommand::Stats { .. }
            | ChatCommand::LinkAccount { .. }
    )
}

fn format_standing(standing: &PlayerStanding) -> String {
    let record = &standing.record;
    let name = if record.name.is_empty() {
        "Unknown"
    } else {
        record.name.as_str()
    };
    format!(
        "{}: MMR {} (rank {}/{}) | W {} L {} ({:.1}%) | matches {} rounds {} | ACS {:.1} K/D {:.2}",
        name,
        record.mmr,
        standing.rank,
        standing.total_players,
        record.wins,
        record.losses,
        record.win_percentage(),
        record.matches_played,
        record.total_rounds_played,
        record.average_combat_score,
        record.kill_death_ratio
    )
}

fn format_leaderboard(page: &LeaderboardPage) -> String {
    let mut lines = vec![format!(
        "Leaderboard by {:?} - page {}/{}",
        page.sort,
        page.page + 1,
        page.total_pages.max(1)
    )];
    for entry in &page.entries {
        lines.push(format!(
            "{}. {} - MMR {} | W {} L {} | ACS {:.1} K/D {:.2}",
            entry.rank,
            entry.name,
            entry.mmr,
            entry.wins,
            entry.losses,
            entry.average_combat_score,
            entry.kill_death_ratio
        ));
    }
    lines.join("\n")
}
