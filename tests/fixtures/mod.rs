//! Test fixtures and fake collaborators for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use scrim_room::amqp::publisher::MockEventPublisher;
use scrim_room::config::{LobbyConfig, RatingConfig};
use scrim_room::error::{Result, ScrimError};
use scrim_room::identity::{IdentityRegistry, InMemoryIdentityRegistry};
use scrim_room::lobby::{LifecycleRegistry, LifecycleServices};
use scrim_room::metrics::MetricsCollector;
use scrim_room::rating::{InMemoryRatingStore, RatingEngine};
use scrim_room::report::{
    GameStatsProvider, InMemoryMatchHistory, MatchRecord, PlayerPerformance, TeamResult,
};
use scrim_room::service::CommandDispatcher;
use scrim_room::types::{
    ChatCommand, CommandReply, CommandRequest, LobbyEvent, Player, PlayerRef, ReplyOutcome,
    RiotId, VoteKind,
};
use scrim_room::utils::{current_timestamp, generate_correlation_id};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const GUILD: &str = "guild-it";

/// Stats provider answering from a fixed account list and a scripted latest match
#[derive(Debug, Default)]
pub struct ScriptedStatsProvider {
    accounts: Mutex<HashMap<RiotId, RiotId>>,
    latest_match: Mutex<Option<MatchRecord>>,
    unavailable: Mutex<bool>,
}

impl ScriptedStatsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account under its canonical spelling
    pub fn add_account(&self, riot_id: RiotId) {
        if let Ok(mut accounts) = self.accounts.lock() {
            accounts.insert(riot_id.normalized(), riot_id);
        }
    }

    pub fn set_latest_match(&self, record: MatchRecord) {
        if let Ok(mut latest) = self.latest_match.lock() {
            *latest = Some(record);
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut flag) = self.unavailable.lock() {
            *flag = unavailable;
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.lock().map(|flag| *flag).unwrap_or(false) {
            return Err(ScrimError::StatsProviderUnavailable {
                message: "scripted outage".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl GameStatsProvider for ScriptedStatsProvider {
    async fn fetch_latest_match(&self, _riot_id: &RiotId) -> Result<Option<MatchRecord>> {
        self.check_available()?;
        Ok(self
            .latest_match
            .lock()
            .map(|latest| latest.clone())
            .unwrap_or_default())
    }

    async fn fetch_account(&self, riot_id: &RiotId) -> Result<Option<RiotId>> {
        self.check_available()?;
        Ok(self
            .accounts
            .lock()
            .ok()
            .and_then(|accounts| accounts.get(&riot_id.normalized()).cloned()))
    }
}

/// A wired dispatcher plus handles on every fake it writes through
pub struct TestSystem {
    pub dispatcher: CommandDispatcher,
    pub publisher: Arc<MockEventPublisher>,
    pub stats: Arc<ScriptedStatsProvider>,
    pub ratings: Arc<InMemoryRatingStore>,
    pub identity: Arc<InMemoryIdentityRegistry>,
    pub history: Arc<InMemoryMatchHistory>,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::with_config(LobbyConfig::default())
    }

    pub fn with_config(config: LobbyConfig) -> Self {
        let publisher = Arc::new(MockEventPublisher::new());
        let stats = Arc::new(ScriptedStatsProvider::new());
        let ratings = Arc::new(InMemoryRatingStore::new());
        let identity = Arc::new(InMemoryIdentityRegistry::new());
        let history = Arc::new(InMemoryMatchHistory::new());

        let services = LifecycleServices {
            rating_store: ratings.clone(),
            identity: identity.clone(),
            stats_provider: stats.clone(),
            history: history.clone(),
            publisher: publisher.clone(),
            metrics: Arc::new(MetricsCollector::new().expect("metrics collector")),
        };
        let registry = LifecycleRegistry::new(
            config,
            RatingEngine::new(RatingConfig::default()),
            services,
        )
        .with_seed(42);

        Self {
            dispatcher: CommandDispatcher::new(registry),
            publisher,
            stats,
            ratings,
            identity,
            history,
        }
    }

    /// Issue a command as `player` and return the reply
    pub async fn send(&self, player: &PlayerRef, command: ChatCommand) -> CommandReply {
        self.dispatcher.dispatch(&request(player, command)).await
    }

    /// Link players 0..count directly in the registry
    pub async fn link_players(&self, count: usize) {
        for n in 0..count {
            self.identity
                .link(&player(n).player_id, &account(n))
                .await
                .expect("link player");
        }
    }

    /// Options of the most recently started vote of `kind`
    pub fn vote_options(&self, kind: VoteKind) -> Vec<String> {
        self.publisher
            .events()
            .into_iter()
            .rev()
            .find_map(|event| match event {
                LobbyEvent::VoteStarted {
                    kind: started,
                    options,
                    ..
                } if started == kind => Some(options),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Teams and map of the last match that started
    pub fn started_match(&self) -> Option<(String, Vec<Player>, Vec<Player>)> {
        self.publisher
            .events()
            .into_iter()
            .rev()
            .find_map(|event| match event {
                LobbyEvent::MatchStarted {
                    map, team1, team2, ..
                } => Some((map, team1, team2)),
                _ => None,
            })
    }
}

pub fn player(n: usize) -> PlayerRef {
    PlayerRef {
        player_id: format!("p{}", n),
        display_name: format!("Player {}", n),
    }
}

pub fn account(n: usize) -> RiotId {
    RiotId::new(format!("Player{}", n), "EUW")
}

pub fn request(player: &PlayerRef, command: ChatCommand) -> CommandRequest {
    CommandRequest {
        guild_id: GUILD.to_string(),
        player: player.clone(),
        command,
        correlation_id: generate_correlation_id(),
        timestamp: current_timestamp(),
    }
}

pub fn reply_message(reply: &CommandReply) -> &str {
    match &reply.outcome {
        ReplyOutcome::Ok { message } => message,
        ReplyOutcome::Err { message, .. } => message,
    }
}

pub fn reply_kind(reply: &CommandReply) -> Option<&str> {
    match &reply.outcome {
        ReplyOutcome::Ok { .. } => None,
        ReplyOutcome::Err { kind, .. } => Some(kind),
    }
}

/// Stats-provider view of a finished match between two rosters
pub fn finished_match(
    match_id: &str,
    map: &str,
    red: &[Player],
    blue: &[Player],
    red_wins: bool,
) -> MatchRecord {
    let line = |p: &Player, team: &str, kills: u64| PlayerPerformance {
        name: p.riot_id.name.clone(),
        tag: p.riot_id.tag.clone(),
        team_id: team.to_string(),
        score: 4000 + kills * 100,
        kills,
        deaths: 12,
        assists: 4,
    };
    let mut players: Vec<PlayerPerformance> = red.iter().map(|p| line(p, "Red", 18)).collect();
    players.extend(blue.iter().map(|p| line(p, "Blue", 14)));

    MatchRecord {
        match_id: match_id.to_string(),
        map: map.to_string(),
        started_at: Some(current_timestamp()),
        total_rounds: 23,
        players,
        teams: vec![
            TeamResult {
                team_id: "Red".to_string(),
                won: red_wins,
                rounds_won: if red_wins { 13 } else { 10 },
                rounds_lost: if red_wins { 10 } else { 13 },
            },
            TeamResult {
                team_id: "Blue".to_string(),
                won: !red_wins,
                rounds_won: if red_wins { 10 } else { 13 },
                rounds_lost: if red_wins { 13 } else { 10 },
            },
        ],
    }
}
