//! Per-guild match lifecycle
//!
//! `MatchLifecycle` owns one guild's queue, vote, rating cache and background
//! tasks behind a single async mutex. Every command, vote timer and refresh tick
//! takes that lock, so a timeout and a deciding ballot can never both apply.
//!
//! Phase order: Idle → SigningUp → ModeVote → MapTypeVote → MapVote →
//! TeamsAssigned → InProgress → Idle (after a successful report or a cancel).

use crate::amqp::publisher::EventPublisher;
use crate::config::LobbyConfig;
use crate::error::{error_kind, Result, ScrimError};
use crate::identity::IdentityRegistry;
use crate::lobby::maps::sample_maps;
use crate::lobby::queue::QueueState;
use crate::lobby::refresh::{PeriodicRefresh, TaskHandle};
use crate::lobby::teams::{TeamAssigner, TeamAssignment};
use crate::lobby::vote::{CastOutcome, VoteDecision, VotingCoordinator};
use crate::metrics::MetricsCollector;
use crate::rating::leaderboard::{self, LeaderboardPage, PlayerStanding};
use crate::rating::{HistoryReplayer, RatingEngine, RatingStore, StatsAggregator};
use crate::report::{GameStatsProvider, MatchHistoryStore, MatchRecord, RosterReconciler};
use crate::types::{
    CaptainSlot, GuildId, LeaderboardSort, LobbyEvent, MapPoolKind, MatchFormat, MatchPhase,
    Player, PlayerId, PlayerRef, RatingChange, RatingRecord, RiotId, TeamMode, TeamSide,
    VoteKind,
};
use crate::utils::generate_match_name;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Collaborators shared by every guild's lifecycle
#[derive(Clone)]
pub struct LifecycleServices {
    pub rating_store: Arc<dyn RatingStore>,
    pub identity: Arc<dyn IdentityRegistry>,
    pub stats_provider: Arc<dyn GameStatsProvider>,
    pub history: Arc<dyn MatchHistoryStore>,
    pub publisher: Arc<dyn EventPublisher>,
    pub metrics: Arc<MetricsCollector>,
}

/// Point-in-time view of a lifecycle for health and stats endpoints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleSnapshot {
    pub guild_id: GuildId,
    pub phase: MatchPhase,
    pub match_name: Option<String>,
    pub format: Option<MatchFormat>,
    pub queued: usize,
    pub capacity: usize,
    pub open_vote: Option<VoteKind>,
    pub rated_players: usize,
    pub live_leaderboards: usize,
}

/// Result of a successful report
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOutcome {
    pub match_name: String,
    pub map: String,
    pub winner: TeamSide,
    pub changes: Vec<RatingChange>,
    /// Players who newly hold the top MMR
    pub promoted: Vec<PlayerId>,
}

/// Result of a history replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaggregateOutcome {
    pub players: usize,
    pub matches_applied: usize,
    pub matches_skipped: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct PersistOutcome {
    ratings_saved: bool,
    history_saved: bool,
}

impl PersistOutcome {
    fn complete(&self) -> bool {
        self.ratings_saved && self.history_saved
    }
}

/// Writes of the last reported match, kept until confirmed
struct PendingPersistence {
    handle: Option<JoinHandle<PersistOutcome>>,
    outcome: PersistOutcome,
    records: Vec<RatingRecord>,
    match_record: MatchRecord,
}

struct MatchState {
    phase: MatchPhase,
    queue: Option<QueueState>,
    vote: Option<VotingCoordinator>,
    vote_timer: Option<TaskHandle>,
    next_round: u64,
    refresh_tasks: Vec<TaskHandle>,
    leaderboards: HashMap<LeaderboardSort, TaskHandle>,
    ratings: HashMap<PlayerId, RatingRecord>,
    pending: Option<PendingPersistence>,
    rng: StdRng,
}

/// One guild's match state machine
#[derive(Clone)]
pub struct MatchLifecycle {
    guild_id: GuildId,
    config: Arc<LobbyConfig>,
    engine: Arc<RatingEngine>,
    aggregator: StatsAggregator,
    services: LifecycleServices,
    state: Arc<Mutex<MatchState>>,
}

fn no_active_queue() -> anyhow::Error {
    ScrimError::InvariantViolation {
        message: "Lifecycle has no queue in an active phase".to_string(),
    }
    .into()
}

fn phase_for(kind: VoteKind) -> MatchPhase {
    match kind {
        VoteKind::Mode => MatchPhase::ModeVote,
        VoteKind::MapType => MatchPhase::MapTypeVote,
        VoteKind::Map => MatchPhase::MapVote,
    }
}

impl MatchLifecycle {
    pub fn new(
        guild_id: impl Into<GuildId>,
        config: Arc<LobbyConfig>,
        engine: Arc<RatingEngine>,
        services: LifecycleServices,
    ) -> Self {
        Self::with_rng(guild_id, config, engine, services, StdRng::from_os_rng())
    }

    /// Lifecycle with a caller-supplied random source for map sampling and tie breaks
    pub fn with_rng(
        guild_id: impl Into<GuildId>,
        config: Arc<LobbyConfig>,
        engine: Arc<RatingEngine>,
        services: LifecycleServices,
        rng: StdRng,
    ) -> Self {
        let aggregator = StatsAggregator::new(engine.config().default_mmr);
        Self {
            guild_id: guild_id.into(),
            config,
            engine,
            aggregator,
            services,
            state: Arc::new(Mutex::new(MatchState {
                phase: MatchPhase::Idle,
                queue: None,
                vote: None,
                vote_timer: None,
                next_round: 0,
                refresh_tasks: Vec::new(),
                leaderboards: HashMap::new(),
                ratings: HashMap::new(),
                pending: None,
                rng,
            })),
        }
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    /// Replace the rating cache with the stored records
    pub async fn load_ratings(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        self.reload_ratings(&mut state).await
    }

    pub async fn phase(&self) -> MatchPhase {
        self.state.lock().await.phase
    }

    pub async fn snapshot(&self) -> LifecycleSnapshot {
        let state = self.state.lock().await;
        LifecycleSnapshot {
            guild_id: self.guild_id.clone(),
            phase: state.phase,
            match_name: state.queue.as_ref().map(|q| q.match_name.clone()),
            format: state.queue.as_ref().map(|q| q.format),
            queued: state.queue.as_ref().map_or(0, QueueState::len),
            capacity: state.queue.as_ref().map_or(0, |q| q.capacity),
            open_vote: state
                .vote
                .as_ref()
                .filter(|v| v.is_open())
                .map(VotingCoordinator::kind),
            rated_players: state.ratings.len(),
            live_leaderboards: state.leaderboards.len(),
        }
    }

    /// Copy of the current queue, if a match is active
    pub async fn queue_snapshot(&self) -> Option<QueueState> {
        self.state.lock().await.queue.clone()
    }

    pub async fn ratings_snapshot(&self) -> HashMap<PlayerId, RatingRecord> {
        self.state.lock().await.ratings.clone()
    }

    /// Open signup for a new match; returns the match name
    pub async fn signup(&self, opened_by: &PlayerId, format: MatchFormat) -> Result<String> {
        let mut state = self.state.lock().await;

        if state.phase != MatchPhase::Idle {
            return Err(ScrimError::Precondition {
                reason: format!(
                    "A match is already active ({}); finish or cancel it first",
                    state.phase
                ),
            }
            .into());
        }

        self.flush_persistence(&mut state).await?;
        self.reload_ratings(&mut state).await?;

        let capacity = self.config.capacity_for(format);
        let match_name = generate_match_name(&mut state.rng);
        state.queue = Some(QueueState::new(match_name.clone(), format, capacity));
        state.vote = None;
        self.set_phase(&mut state, MatchPhase::SigningUp);
        self.services
            .metrics
            .record_queue_size(&self.guild_id, 0);
        self.services.metrics.record_signup();

        state.refresh_tasks = vec![self.spawn_signup_refresh(), self.spawn_channel_refresh()];

        info!(
            "Signup opened - guild: '{}', match: '{}', format: {}, opened_by: '{}'",
            self.guild_id, match_name, format, opened_by
        );

        self.emit(vec![LobbyEvent::SignupOpened {
            guild_id: self.guild_id.clone(),
            match_name: match_name.clone(),
            format,
            capacity,
            opened_by: opened_by.clone(),
        }])
        .await;

        Ok(match_name)
    }

    /// Add a linked player to the queue; returns the new queue length
    pub async fn join_queue(&self, player: &PlayerRef) -> Result<usize> {
        let riot_id = self
            .services
            .identity
            .resolve(&player.player_id)
            .await?
            .ok_or_else(|| ScrimError::UserInput {
                reason: "Link your Riot account before joining the queue".to_string(),
            })?;

        let mut state = self.state.lock().await;
        if state.phase != MatchPhase::SigningUp {
            return Err(ScrimError::Precondition {
                reason: "Signup is not open".to_string(),
            }
            .into());
        }

        let queued = Player {
            player_id: player.player_id.clone(),
            display_name: player.display_name.clone(),
            riot_id: riot_id.clone(),
        };
        let queue = state.queue.as_mut().ok_or_else(no_active_queue)?;
        let full = queue.add_player(queued)?;
        let len = queue.len();
        let update = LobbyEvent::QueueUpdated {
            guild_id: self.guild_id.clone(),
            match_name: queue.match_name.clone(),
            queue: queue.players().to_vec(),
            capacity: queue.capacity,
        };

        let engine = &self.engine;
        let record = state
            .ratings
            .entry(player.player_id.clone())
            .or_insert_with(|| engine.default_record(player.player_id.clone()));
        if record.name.is_empty() {
            record.name = riot_id.to_string();
        }

        self.services.metrics.record_queue_size(&self.guild_id, len);
        info!(
            "Player joined queue - guild: '{}', player: '{}', riot_id: '{}', size: {}",
            self.guild_id, player.player_id, riot_id, len
        );

        let mut events = vec![update];
        if full {
            if let Some(queue) = state.queue.as_mut() {
                queue.signup_active = false;
            }
            state.refresh_tasks.clear();
            info!(
                "Queue full, starting mode vote - guild: '{}'",
                self.guild_id
            );
            let options = vec![
                TeamMode::Balanced.label().to_string(),
                TeamMode::Captains.label().to_string(),
            ];
            events.push(self.start_vote(&mut state, VoteKind::Mode, options)?);
        }

        self.emit(events).await;
        Ok(len)
    }

    pub async fn leave_queue(&self, player_id: &PlayerId) -> Result<usize> {
        let mut state = self.state.lock().await;
        if state.phase != MatchPhase::SigningUp {
            return Err(ScrimError::Precondition {
                reason: "You can only leave the queue while signup is open".to_string(),
            }
            .into());
        }

        let queue = state.queue.as_mut().ok_or_else(no_active_queue)?;
        queue.remove_player(player_id)?;
        let len = queue.len();
        let update = LobbyEvent::QueueUpdated {
            guild_id: self.guild_id.clone(),
            match_name: queue.match_name.clone(),
            queue: queue.players().to_vec(),
            capacity: queue.capacity,
        };

        self.services.metrics.record_queue_size(&self.guild_id, len);
        info!(
            "Player left queue - guild: '{}', player: '{}', size: {}",
            self.guild_id, player_id, len
        );

        self.emit(vec![update]).await;
        Ok(len)
    }

    /// Cast a ballot in the open vote of `kind`
    pub async fn cast_vote(
        &self,
        voter: &PlayerId,
        kind: VoteKind,
        option: &str,
    ) -> Result<CastOutcome> {
        let mut state = self.state.lock().await;

        let open_kind = state.vote.as_ref().map(VotingCoordinator::kind);
        if open_kind != Some(kind) {
            let reason = if state.phase.ordinal() > phase_for(kind).ordinal() {
                format!("The {} vote has already ended", kind.as_str())
            } else if open_kind.is_some() {
                format!("The {} vote has not started yet", kind.as_str())
            } else {
                "There is no vote in progress".to_string()
            };
            return Err(ScrimError::Precondition { reason }.into());
        }

        let vote = state.vote.as_mut().ok_or_else(|| ScrimError::Precondition {
            reason: "There is no vote in progress".to_string(),
        })?;
        let outcome = vote.cast_vote(voter, option)?;
        self.services.metrics.record_ballot(kind);

        match &outcome {
            CastOutcome::Counted { tally } => {
                debug!(
                    "Vote counted - guild: '{}', kind: {}, voter: '{}', option: '{}'",
                    self.guild_id,
                    kind.as_str(),
                    voter,
                    option
                );
                self.emit(vec![LobbyEvent::VoteTallied {
                    guild_id: self.guild_id.clone(),
                    kind,
                    tally: tally.clone(),
                }])
                .await;
            }
            CastOutcome::Decided(decision) => {
                if let Some(timer) = state.vote_timer.take() {
                    timer.cancel();
                }
                self.settle(&mut state, decision.clone()).await?;
            }
        }

        Ok(outcome)
    }

    /// Resolve a vote whose window elapsed; stale rounds are ignored
    pub async fn on_vote_timeout(&self, round: u64) -> Result<Option<VoteDecision>> {
        let mut state = self.state.lock().await;

        let current = state
            .vote
            .as_ref()
            .filter(|v| v.is_open())
            .map(VotingCoordinator::round);
        if current != Some(round) {
            debug!(
                "Ignoring stale vote timeout - guild: '{}', round: {}",
                self.guild_id, round
            );
            return Ok(None);
        }

        // Runs inside the timer task, so release the handle instead of aborting it
        if let Some(timer) = state.vote_timer.take() {
            timer.detach();
        }

        let decision = {
            let MatchState { vote, rng, .. } = &mut *state;
            let vote = vote.as_mut().ok_or_else(no_active_queue)?;
            vote.on_timeout(rng)?
        };

        info!(
            "Vote timed out - guild: '{}', kind: {}, winner: '{}', resolution: {}",
            self.guild_id,
            decision.kind.as_str(),
            decision.option,
            decision.resolution.as_str()
        );

        self.settle(&mut state, decision.clone()).await?;
        Ok(Some(decision))
    }

    /// Manually assign a captain slot to a queued player
    pub async fn set_captain(&self, slot: CaptainSlot, riot_id: &RiotId) -> Result<Player> {
        let mut state = self.state.lock().await;

        if !matches!(
            state.phase,
            MatchPhase::SigningUp
                | MatchPhase::ModeVote
                | MatchPhase::MapTypeVote
                | MatchPhase::MapVote
        ) {
            return Err(ScrimError::Precondition {
                reason: "Captains can only be set before teams are assigned".to_string(),
            }
            .into());
        }

        let queue = state.queue.as_mut().ok_or_else(no_active_queue)?;
        if queue.chosen_mode == Some(TeamMode::Balanced) {
            return Err(ScrimError::Precondition {
                reason: "Captains are not used in Balanced mode".to_string(),
            }
            .into());
        }

        let player = queue
            .find_by_riot_id(riot_id)
            .cloned()
            .ok_or_else(|| ScrimError::UserInput {
                reason: format!("{} is not in the queue", riot_id),
            })?;
        queue.set_captain(slot, player.clone())?;

        info!(
            "Captain set - guild: '{}', slot: {:?}, player: '{}'",
            self.guild_id, slot, player.player_id
        );
        Ok(player)
    }

    /// Abandon the active match
    pub async fn cancel(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        if state.phase == MatchPhase::Idle {
            return Err(ScrimError::Precondition {
                reason: "There is no active match to cancel".to_string(),
            }
            .into());
        }

        let event = self.abort_match(&mut state);
        let match_name = match &event {
            LobbyEvent::MatchCancelled { match_name, .. } => match_name.clone(),
            _ => String::new(),
        };
        self.emit(vec![event]).await;
        Ok(match_name)
    }

    /// Fetch the reporter's latest match and apply it to the tracked teams
    pub async fn report(&self, reporter: &PlayerId) -> Result<ReportOutcome> {
        let timer = self.services.metrics.start_timer();
        let result = self.report_inner(reporter).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => error_kind(e),
        };
        self.services.metrics.record_report(outcome);
        if let Ok(report) = &result {
            self.services
                .metrics
                .record_rating_changes(&report.changes, timer.stop());
        }
        result
    }

    async fn report_inner(&self, reporter: &PlayerId) -> Result<ReportOutcome> {
        let mut state = self.state.lock().await;

        if state.phase != MatchPhase::InProgress {
            return Err(ScrimError::Precondition {
                reason: "No match is currently in progress".to_string(),
            }
            .into());
        }

        let riot_id = self
            .services
            .identity
            .resolve(reporter)
            .await?
            .ok_or_else(|| ScrimError::UserInput {
                reason: "Link your Riot account before reporting".to_string(),
            })?;

        let record = self
            .services
            .stats_provider
            .fetch_latest_match(&riot_id)
            .await?
            .ok_or_else(|| ScrimError::StatsProviderUnavailable {
                message: format!("No recent match found for {}", riot_id),
            })?;

        let queue = state.queue.as_ref().ok_or_else(no_active_queue)?;
        let selected_map = queue.selected_map.clone().unwrap_or_default();
        if !selected_map.eq_ignore_ascii_case(record.map.trim()) {
            return Err(ScrimError::MapMismatch {
                expected: selected_map,
                reported: record.map.clone(),
            }
            .into());
        }

        let winner_team_id =
            record
                .winning_team_id()
                .ok_or_else(|| ScrimError::AmbiguousWinner {
                    winner_team_id: "none".to_string(),
                })?;

        let accounts = |team: &[Player]| -> HashSet<RiotId> {
            team.iter().map(|p| p.riot_id.normalized()).collect()
        };
        let winner = RosterReconciler::reconcile(
            &accounts(&queue.team1),
            &accounts(&queue.team2),
            &record.roster_by_team(),
            &winner_team_id,
        )?;

        let (winning_team, losing_team) = match winner {
            TeamSide::Team1 => (&queue.team1, &queue.team2),
            TeamSide::Team2 => (&queue.team2, &queue.team1),
        };
        let winner_ids = QueueState::team_ids(winning_team);
        let loser_ids = QueueState::team_ids(losing_team);

        let participants: Vec<Player> = queue
            .team1
            .iter()
            .chain(queue.team2.iter())
            .cloned()
            .collect();
        let by_account: HashMap<RiotId, PlayerId> = participants
            .iter()
            .map(|p| (p.riot_id.normalized(), p.player_id.clone()))
            .collect();

        // Work on a copy so a failure leaves the cache untouched
        let mut ratings = state.ratings.clone();
        for player in &participants {
            let record = ratings
                .entry(player.player_id.clone())
                .or_insert_with(|| self.engine.default_record(player.player_id.clone()));
            if record.name.is_empty() {
                record.name = player.riot_id.to_string();
            }
        }
        let top_before: HashSet<PlayerId> =
            leaderboard::top_players(ratings.values()).into_iter().collect();

        self.aggregator.apply_batch(
            &record.players,
            record.total_rounds,
            |account| by_account.get(account).cloned(),
            &mut ratings,
        );
        let changes = self
            .engine
            .update_ratings(&winner_ids, &loser_ids, &mut ratings)?;

        let promoted: Vec<PlayerId> = leaderboard::top_players(ratings.values())
            .into_iter()
            .filter(|id| !top_before.contains(id))
            .collect();

        let match_name = queue.match_name.clone();
        let persisted: Vec<RatingRecord> = participants
            .iter()
            .filter_map(|p| ratings.get(&p.player_id).cloned())
            .collect();

        state.ratings = ratings;
        let mut events = vec![LobbyEvent::MatchReported {
            guild_id: self.guild_id.clone(),
            match_name: match_name.clone(),
            winner,
            changes: changes.clone(),
        }];
        for player_id in &promoted {
            if let Some(record) = state.ratings.get(player_id) {
                events.push(LobbyEvent::PlayerPromoted {
                    guild_id: self.guild_id.clone(),
                    player_id: player_id.clone(),
                    name: record.name.clone(),
                    mmr: record.mmr,
                });
            }
        }

        self.reset(&mut state);
        self.services
            .metrics
            .record_rated_players(&self.guild_id, state.ratings.len());

        info!(
            "Match reported - guild: '{}', match: '{}', map: '{}', winner: {:?}, players: {}",
            self.guild_id,
            match_name,
            record.map,
            winner,
            changes.len()
        );

        let map = record.map.clone();
        self.spawn_persistence(&mut state, persisted, record);
        self.emit(events).await;

        Ok(ReportOutcome {
            match_name,
            map,
            winner,
            changes,
            promoted,
        })
    }

    /// Wait for the last report's writes, retrying whatever failed
    pub async fn wait_for_persistence(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.flush_persistence(&mut state).await
    }

    /// Rank and totals of a player, by account or the requester's own record
    pub async fn player_stats(
        &self,
        requester: &PlayerId,
        account: Option<&RiotId>,
    ) -> Result<PlayerStanding> {
        let player_id = match account {
            Some(riot_id) => self
                .services
                .identity
                .find_by_riot_id(riot_id)
                .await?
                .ok_or_else(|| ScrimError::UserInput {
                    reason: format!("No player is linked to {}", riot_id),
                })?,
            None => requester.clone(),
        };

        let state = self.state.lock().await;
        leaderboard::standing(state.ratings.values(), &player_id).ok_or_else(|| {
            ScrimError::UserInput {
                reason: "No stats have been recorded for this player yet".to_string(),
            }
            .into()
        })
    }

    pub async fn leaderboard(&self, sort: LeaderboardSort, page: usize) -> LeaderboardPage {
        let state = self.state.lock().await;
        leaderboard::build_page(
            state.ratings.values(),
            sort,
            page,
            self.config.leaderboard_page_size,
        )
    }

    /// Return a page and keep republishing it; replaces a live board with the same sort
    pub async fn start_live_leaderboard(
        &self,
        sort: LeaderboardSort,
        page: usize,
    ) -> LeaderboardPage {
        let mut state = self.state.lock().await;
        let current = leaderboard::build_page(
            state.ratings.values(),
            sort,
            page,
            self.config.leaderboard_page_size,
        );

        let lifecycle = self.clone();
        let handle = PeriodicRefresh::spawn(
            format!("{}-leaderboard-{:?}", self.guild_id, sort),
            self.config.leaderboard_refresh_interval(),
            self.services.publisher.clone(),
            move || {
                let lifecycle = lifecycle.clone();
                async move {
                    let page = lifecycle.leaderboard(sort, page).await;
                    Ok(Some(LobbyEvent::LeaderboardRefreshed {
                        guild_id: lifecycle.guild_id.clone(),
                        page,
                    }))
                }
            },
        );
        state.leaderboards.insert(sort, handle);

        debug!(
            "Live leaderboard started - guild: '{}', sort: {:?}",
            self.guild_id, sort
        );
        current
    }

    /// Cancel every live leaderboard; returns how many were running
    pub async fn stop_live_leaderboards(&self) -> usize {
        let mut state = self.state.lock().await;
        let stopped = state.leaderboards.len();
        state.leaderboards.clear();
        info!(
            "Live leaderboards stopped - guild: '{}', count: {}",
            self.guild_id, stopped
        );
        stopped
    }

    /// Refresh a player's display name after a (re)link
    pub async fn update_display_name(&self, player_id: &PlayerId, riot_id: &RiotId) -> Result<()> {
        let mut state = self.state.lock().await;
        // A pending report write carries the old name and must land first
        if let Err(e) = self.flush_persistence(&mut state).await {
            warn!(
                "Renaming with unsaved match results - guild: '{}', player: '{}', error: {}",
                self.guild_id, player_id, e
            );
        }
        if let Some(pending) = state.pending.as_mut() {
            for record in pending.records.iter_mut().filter(|r| &r.player_id == player_id) {
                record.name = riot_id.to_string();
            }
        }

        let Some(record) = state.ratings.get_mut(player_id) else {
            return Ok(());
        };
        record.name = riot_id.to_string();
        let record = record.clone();
        self.services
            .rating_store
            .upsert(&self.guild_id, record)
            .await
    }

    /// Rebuild every record from the stored match history
    pub async fn reaggregate(&self) -> Result<ReaggregateOutcome> {
        let mut state = self.state.lock().await;
        if state.phase != MatchPhase::Idle {
            return Err(ScrimError::Precondition {
                reason: "Re-aggregation is only allowed while no match is active".to_string(),
            }
            .into());
        }

        self.flush_persistence(&mut state).await?;

        let matches = self.services.history.find_all(&self.guild_id).await?;
        let links = self.services.identity.all_links().await?;
        let summary = HistoryReplayer::new(&self.engine).replay(matches, &links);

        let players = summary.ratings.len();
        self.services
            .rating_store
            .upsert_many(&self.guild_id, summary.ratings.into_values().collect())
            .await?;
        self.reload_ratings(&mut state).await?;

        info!(
            "Ratings re-aggregated - guild: '{}', players: {}, applied: {}, skipped: {}",
            self.guild_id, players, summary.matches_applied, summary.matches_skipped
        );

        Ok(ReaggregateOutcome {
            players,
            matches_applied: summary.matches_applied,
            matches_skipped: summary.matches_skipped,
        })
    }

    /// Recompute derived averages for every record and store them
    pub async fn recalculate_averages(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        for record in state.ratings.values_mut() {
            record.recompute_derived();
        }
        let records: Vec<RatingRecord> = state.ratings.values().cloned().collect();
        let count = records.len();
        self.services
            .rating_store
            .upsert_many(&self.guild_id, records)
            .await?;

        info!(
            "Averages recalculated - guild: '{}', records: {}",
            self.guild_id, count
        );
        Ok(count)
    }

    async fn reload_ratings(&self, state: &mut MatchState) -> Result<usize> {
        let records = self.services.rating_store.find_all(&self.guild_id).await?;
        state.ratings = records
            .into_iter()
            .map(|record| (record.player_id.clone(), record))
            .collect();
        let count = state.ratings.len();
        self.services
            .metrics
            .record_rated_players(&self.guild_id, count);
        debug!(
            "Ratings loaded - guild: '{}', records: {}",
            self.guild_id, count
        );
        Ok(count)
    }

    fn set_phase(&self, state: &mut MatchState, phase: MatchPhase) {
        if state.phase != phase {
            debug!(
                "Phase change - guild: '{}', from: {}, to: {}",
                self.guild_id, state.phase, phase
            );
        }
        state.phase = phase;
        self.services.metrics.record_phase(&self.guild_id, phase);
    }

    /// Open a vote among the current queue and arm its timer
    fn start_vote(
        &self,
        state: &mut MatchState,
        kind: VoteKind,
        options: Vec<String>,
    ) -> Result<LobbyEvent> {
        let eligible = state
            .queue
            .as_ref()
            .ok_or_else(no_active_queue)?
            .member_ids();

        state.next_round += 1;
        let round = state.next_round;
        let vote = VotingCoordinator::open(kind, round, options.clone(), eligible)?;

        let window = match kind {
            VoteKind::Mode => self.config.mode_vote_window(),
            VoteKind::MapType => self.config.map_type_vote_window(),
            VoteKind::Map => self.config.map_vote_window(),
        };

        let lifecycle = self.clone();
        let timer = TaskHandle::spawn(
            format!("{}-vote-{}", self.guild_id, round),
            async move {
                tokio::time::sleep(window).await;
                if let Err(e) = lifecycle.on_vote_timeout(round).await {
                    error!(
                        "Vote timeout handling failed - guild: '{}', round: {}, error: {}",
                        lifecycle.guild_id, round, e
                    );
                }
            },
        );

        state.vote = Some(vote);
        state.vote_timer = Some(timer);
        self.set_phase(state, phase_for(kind));
        self.services.metrics.record_vote_started(kind);

        info!(
            "Vote started - guild: '{}', kind: {}, round: {}, options: {:?}",
            self.guild_id,
            kind.as_str(),
            round,
            options
        );

        Ok(LobbyEvent::VoteStarted {
            guild_id: self.guild_id.clone(),
            kind,
            round,
            options,
            closes_in_seconds: window.as_secs(),
        })
    }

    /// Apply a decision and publish the result; a failed transition cancels the match
    async fn settle(&self, state: &mut MatchState, decision: VoteDecision) -> Result<()> {
        self.services
            .metrics
            .record_vote_decided(decision.kind, decision.resolution);

        let mut events = vec![LobbyEvent::VoteDecided {
            guild_id: self.guild_id.clone(),
            kind: decision.kind,
            option: decision.option.clone(),
            resolution: decision.resolution,
        }];

        match self.apply_decision(state, &decision) {
            Ok(mut next) => {
                events.append(&mut next);
                self.emit(events).await;
                Ok(())
            }
            Err(e) => {
                error!(
                    "Cancelling match after failed transition - guild: '{}', kind: {}, error: {}",
                    self.guild_id,
                    decision.kind.as_str(),
                    e
                );
                events.push(self.abort_match(state));
                self.emit(events).await;
                Err(e)
            }
        }
    }

    fn apply_decision(
        &self,
        state: &mut MatchState,
        decision: &VoteDecision,
    ) -> Result<Vec<LobbyEvent>> {
        match decision.kind {
            VoteKind::Mode => {
                let mode = TeamMode::from_label(&decision.option).ok_or_else(|| {
                    ScrimError::InvariantViolation {
                        message: format!("Unknown team mode '{}'", decision.option),
                    }
                })?;

                let mut events = Vec::new();
                {
                    let MatchState { queue, ratings, .. } = &mut *state;
                    let queue = queue.as_mut().ok_or_else(no_active_queue)?;
                    queue.chosen_mode = Some(mode);
                    if mode == TeamMode::Balanced {
                        let assignment =
                            TeamAssigner::balanced(queue.players(), ratings, queue.capacity)?;
                        events.push(self.teams_assigned(mode, &assignment));
                        queue.apply_assignment(assignment);
                    }
                }

                let options = vec![
                    MapPoolKind::Competitive.label().to_string(),
                    MapPoolKind::All.label().to_string(),
                ];
                events.push(self.start_vote(state, VoteKind::MapType, options)?);
                Ok(events)
            }
            VoteKind::MapType => {
                let pool = MapPoolKind::from_label(&decision.option).ok_or_else(|| {
                    ScrimError::InvariantViolation {
                        message: format!("Unknown map pool '{}'", decision.option),
                    }
                })?;

                let maps = {
                    let MatchState { queue, rng, .. } = &mut *state;
                    queue.as_mut().ok_or_else(no_active_queue)?.map_pool = Some(pool);
                    sample_maps(self.config.maps_for(pool), self.config.map_choices, rng)
                };
                Ok(vec![self.start_vote(state, VoteKind::Map, maps)?])
            }
            VoteKind::Map => {
                let mut events = Vec::new();
                let started = {
                    let MatchState { queue, ratings, .. } = &mut *state;
                    let queue = queue.as_mut().ok_or_else(no_active_queue)?;
                    queue.selected_map = Some(decision.option.clone());

                    if queue.chosen_mode == Some(TeamMode::Captains) {
                        let assignment = TeamAssigner::captains(
                            queue.players(),
                            ratings,
                            queue.capacity,
                            queue.captain1.as_ref(),
                            queue.captain2.as_ref(),
                        )?;
                        events.push(self.teams_assigned(TeamMode::Captains, &assignment));
                        queue.apply_assignment(assignment);
                    }

                    queue.match_ongoing = true;
                    queue.match_not_reported = true;
                    LobbyEvent::MatchStarted {
                        guild_id: self.guild_id.clone(),
                        match_name: queue.match_name.clone(),
                        map: decision.option.clone(),
                        team1: queue.team1.clone(),
                        team2: queue.team2.clone(),
                    }
                };

                self.set_phase(state, MatchPhase::TeamsAssigned);
                self.set_phase(state, MatchPhase::InProgress);
                self.services.metrics.record_match_started();
                info!(
                    "Match started - guild: '{}', map: '{}'",
                    self.guild_id, decision.option
                );

                events.push(started);
                Ok(events)
            }
        }
    }

    fn teams_assigned(&self, mode: TeamMode, assignment: &TeamAssignment) -> LobbyEvent {
        LobbyEvent::TeamsAssigned {
            guild_id: self.guild_id.clone(),
            mode,
            team1: assignment.team1.clone(),
            team2: assignment.team2.clone(),
            captain1: assignment.captain1.clone(),
            captain2: assignment.captain2.clone(),
        }
    }

    /// Reset to Idle and describe the cancellation
    fn abort_match(&self, state: &mut MatchState) -> LobbyEvent {
        let phase = state.phase;
        let match_name = state
            .queue
            .as_ref()
            .map(|q| q.match_name.clone())
            .unwrap_or_default();
        self.reset(state);
        self.services.metrics.record_match_cancelled();

        warn!(
            "Match cancelled - guild: '{}', match: '{}', phase: {}",
            self.guild_id, match_name, phase
        );

        LobbyEvent::MatchCancelled {
            guild_id: self.guild_id.clone(),
            match_name,
            phase,
        }
    }

    /// Drop per-match state and tasks; ratings and live leaderboards survive
    fn reset(&self, state: &mut MatchState) {
        state.vote_timer = None;
        state.refresh_tasks.clear();
        state.vote = None;
        state.queue = None;
        self.services.metrics.record_queue_size(&self.guild_id, 0);
        self.set_phase(state, MatchPhase::Idle);
    }

    fn spawn_signup_refresh(&self) -> TaskHandle {
        let lifecycle = self.clone();
        PeriodicRefresh::spawn(
            format!("{}-signup-refresh", self.guild_id),
            self.config.signup_refresh_interval(),
            self.services.publisher.clone(),
            move || {
                let lifecycle = lifecycle.clone();
                async move {
                    let state = lifecycle.state.lock().await;
                    let event = match (&state.phase, &state.queue) {
                        (MatchPhase::SigningUp, Some(queue)) => Some(LobbyEvent::SignupRefresh {
                            guild_id: lifecycle.guild_id.clone(),
                            match_name: queue.match_name.clone(),
                            queue: queue.players().to_vec(),
                            capacity: queue.capacity,
                        }),
                        _ => None,
                    };
                    Ok(event)
                }
            },
        )
    }

    fn spawn_channel_refresh(&self) -> TaskHandle {
        let lifecycle = self.clone();
        PeriodicRefresh::spawn(
            format!("{}-channel-refresh", self.guild_id),
            self.config.channel_refresh_interval(),
            self.services.publisher.clone(),
            move || {
                let lifecycle = lifecycle.clone();
                async move {
                    let state = lifecycle.state.lock().await;
                    let event = match (&state.phase, &state.queue) {
                        (MatchPhase::SigningUp, Some(queue)) => Some(LobbyEvent::ChannelRefresh {
                            guild_id: lifecycle.guild_id.clone(),
                            match_name: queue.match_name.clone(),
                        }),
                        _ => None,
                    };
                    Ok(event)
                }
            },
        )
    }

    /// Write the reported records and the raw match in the background
    fn spawn_persistence(
        &self,
        state: &mut MatchState,
        records: Vec<RatingRecord>,
        match_record: MatchRecord,
    ) {
        let services = self.services.clone();
        let guild_id = self.guild_id.clone();
        let task_records = records.clone();
        let task_match = match_record.clone();

        let handle = tokio::spawn(async move {
            persist(
                &services,
                &guild_id,
                task_records,
                task_match,
                PersistOutcome::default(),
            )
            .await
        });

        state.pending = Some(PendingPersistence {
            handle: Some(handle),
            outcome: PersistOutcome::default(),
            records,
            match_record,
        });
    }

    async fn flush_persistence(&self, state: &mut MatchState) -> Result<()> {
        let Some(mut pending) = state.pending.take() else {
            return Ok(());
        };

        if let Some(handle) = pending.handle.take() {
            match handle.await {
                Ok(outcome) => pending.outcome = outcome,
                Err(e) => warn!(
                    "Persistence task did not finish - guild: '{}', error: {}",
                    self.guild_id, e
                ),
            }
        }

        if !pending.outcome.complete() {
            warn!(
                "Retrying match persistence - guild: '{}', match_id: '{}'",
                self.guild_id, pending.match_record.match_id
            );
            pending.outcome = persist(
                &self.services,
                &self.guild_id,
                pending.records.clone(),
                pending.match_record.clone(),
                pending.outcome,
            )
            .await;
        }

        if pending.outcome.complete() {
            Ok(())
        } else {
            let match_id = pending.match_record.match_id.clone();
            state.pending = Some(pending);
            Err(ScrimError::InternalError {
                message: format!(
                    "Results of match '{}' could not be saved yet, try again shortly",
                    match_id
                ),
            }
            .into())
        }
    }

    async fn emit(&self, events: Vec<LobbyEvent>) {
        for event in events {
            let name = event.name();
            match self.services.publisher.publish_lobby_event(event).await {
                Ok(()) => self
                    .services
                    .metrics
                    .record_amqp_operation("publish_event", true),
                Err(e) => {
                    warn!(
                        "Failed to publish lobby event - guild: '{}', event: {}, error: {}",
                        self.guild_id, name, e
                    );
                    self.services
                        .metrics
                        .record_amqp_operation("publish_event", false);
                }
            }
        }
    }
}

/// Store whatever `done` has not saved yet
async fn persist(
    services: &LifecycleServices,
    guild_id: &str,
    records: Vec<RatingRecord>,
    match_record: MatchRecord,
    mut done: PersistOutcome,
) -> PersistOutcome {
    if !done.ratings_saved {
        match services.rating_store.upsert_many(guild_id, records).await {
            Ok(()) => done.ratings_saved = true,
            Err(e) => {
                services.metrics.record_persistence_failure();
                error!(
                    "Failed to save ratings - guild: '{}', error: {}",
                    guild_id, e
                );
            }
        }
    }
    if !done.history_saved {
        let match_id = match_record.match_id.clone();
        match services.history.insert(guild_id, match_record).await {
            Ok(()) => done.history_saved = true,
            Err(e) => {
                services.metrics.record_persistence_failure();
                error!(
                    "Failed to save match history - guild: '{}', match_id: '{}', error: {}",
                    guild_id, match_id, e
                );
            }
        }
    }
    done
}
