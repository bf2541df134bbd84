//! Common types used throughout the scrim service

use crate::rating::leaderboard::LeaderboardPage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable platform identity of a player
pub type PlayerId = String;

/// Identifier of the community (guild) a lifecycle belongs to
pub type GuildId = String;

/// External game account, compared case-insensitively
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RiotId {
    pub name: String,
    pub tag: String,
}

impl RiotId {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// Lower-cased copy used for every identity comparison
    pub fn normalized(&self) -> Self {
        Self {
            name: self.name.trim().to_lowercase(),
            tag: self.tag.trim().to_lowercase(),
        }
    }
}

impl std::fmt::Display for RiotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.name, self.tag)
    }
}

/// Player as seen by the chat gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRef {
    pub player_id: PlayerId,
    pub display_name: String,
}

/// A queued player with the game account linked at join time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub player_id: PlayerId,
    pub display_name: String,
    pub riot_id: RiotId,
}

/// Persistent MMR and cumulative performance of one player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingRecord {
    pub player_id: PlayerId,
    /// Display name of the linked account ("Name#Tag")
    #[serde(default)]
    pub name: String,
    pub mmr: i64,
    pub wins: u32,
    pub losses: u32,
    pub total_combat_score: u64,
    pub total_kills: u64,
    pub total_deaths: u64,
    pub matches_played: u32,
    pub total_rounds_played: u64,
    pub average_combat_score: f64,
    pub kill_death_ratio: f64,
}

impl RatingRecord {
    /// Fresh record with no matches played
    pub fn new(player_id: impl Into<PlayerId>, mmr: i64) -> Self {
        Self {
            player_id: player_id.into(),
            name: String::new(),
            mmr,
            wins: 0,
            losses: 0,
            total_combat_score: 0,
            total_kills: 0,
            total_deaths: 0,
            matches_played: 0,
            total_rounds_played: 0,
            average_combat_score: 0.0,
            kill_death_ratio: 0.0,
        }
    }

    /// Recompute averages from the running totals
    pub fn recompute_derived(&mut self) {
        self.average_combat_score = if self.total_rounds_played > 0 {
            self.total_combat_score as f64 / self.total_rounds_played as f64
        } else {
            0.0
        };
        self.kill_death_ratio = if self.total_deaths > 0 {
            self.total_kills as f64 / self.total_deaths as f64
        } else {
            self.total_kills as f64
        };
    }

    /// Win percentage in the range 0..=100
    pub fn win_percentage(&self) -> f64 {
        let played = self.wins + self.losses;
        if played == 0 {
            0.0
        } else {
            self.wins as f64 / played as f64 * 100.0
        }
    }
}

/// Team formation mode chosen by the mode vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeamMode {
    Balanced,
    Captains,
}

impl TeamMode {
    pub fn label(&self) -> &'static str {
        match self {
            TeamMode::Balanced => "Balanced",
            TeamMode::Captains => "Captains",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Balanced" => Some(TeamMode::Balanced),
            "Captains" => Some(TeamMode::Captains),
            _ => None,
        }
    }
}

/// Map pool chosen by the map-type vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapPoolKind {
    Competitive,
    All,
}

impl MapPoolKind {
    pub fn label(&self) -> &'static str {
        match self {
            MapPoolKind::Competitive => "Competitive Maps",
            MapPoolKind::All => "All Maps",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Competitive Maps" => Some(MapPoolKind::Competitive),
            "All Maps" => Some(MapPoolKind::All),
            _ => None,
        }
    }
}

/// Number of players per match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MatchFormat {
    #[default]
    FiveVFive,
    ThreeVThree,
}

impl std::fmt::Display for MatchFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchFormat::FiveVFive => write!(f, "5v5"),
            MatchFormat::ThreeVThree => write!(f, "3v3"),
        }
    }
}

/// Phase of a guild's match lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchPhase {
    Idle,
    SigningUp,
    ModeVote,
    MapTypeVote,
    MapVote,
    TeamsAssigned,
    InProgress,
}

impl MatchPhase {
    /// Numeric value exported on the phase gauge
    pub fn ordinal(&self) -> i64 {
        match self {
            MatchPhase::Idle => 0,
            MatchPhase::SigningUp => 1,
            MatchPhase::ModeVote => 2,
            MatchPhase::MapTypeVote => 3,
            MatchPhase::MapVote => 4,
            MatchPhase::TeamsAssigned => 5,
            MatchPhase::InProgress => 6,
        }
    }
}

impl std::fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One of the two tracked teams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeamSide {
    Team1,
    Team2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptainSlot {
    One,
    Two,
}

/// Which vote a round belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteKind {
    Mode,
    MapType,
    Map,
}

impl VoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteKind::Mode => "mode",
            VoteKind::MapType => "map_type",
            VoteKind::Map => "map",
        }
    }
}

/// How a vote reached its decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteResolution {
    Majority,
    TimeoutPlurality,
    TimeoutTie,
}

impl VoteResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteResolution::Majority => "majority",
            VoteResolution::TimeoutPlurality => "timeout_plurality",
            VoteResolution::TimeoutTie => "timeout_tie",
        }
    }
}

/// Leaderboard ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LeaderboardSort {
    #[default]
    Mmr,
    KillDeath,
    Wins,
    CombatScore,
}

/// MMR movement of one player after a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingChange {
    pub player_id: PlayerId,
    pub old_mmr: i64,
    pub new_mmr: i64,
    pub won: bool,
}

impl RatingChange {
    pub fn delta(&self) -> i64 {
        self.new_mmr - self.old_mmr
    }
}

/// AMQP Message Types
/// Command issued by a player through the chat gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatCommand {
    Signup {
        #[serde(default)]
        format: MatchFormat,
    },
    JoinQueue,
    LeaveQueue,
    Vote {
        kind: VoteKind,
        option: String,
    },
    SetCaptain {
        slot: CaptainSlot,
        riot_id: String,
    },
    Report,
    Stats {
        #[serde(default)]
        account: Option<String>,
    },
    Leaderboard {
        #[serde(default)]
        sort: LeaderboardSort,
        #[serde(default)]
        page: usize,
    },
    StopLeaderboard,
    LinkAccount {
        riot_id: String,
    },
    Cancel,
    Reaggregate,
    RecalculateAverages,
}

impl ChatCommand {
    /// Short name used in logs and metric labels
    pub fn name(&self) -> &'static str {
        match self {
            ChatCommand::Signup { .. } => "signup",
            ChatCommand::JoinQueue => "join_queue",
            ChatCommand::LeaveQueue => "leave_queue",
            ChatCommand::Vote { .. } => "vote",
            ChatCommand::SetCaptain { .. } => "set_captain",
            ChatCommand::Report => "report",
            ChatCommand::Stats { .. } => "stats",
            ChatCommand::Leaderboard { .. } => "leaderboard",
            ChatCommand::StopLeaderboard => "stop_leaderboard",
            ChatCommand::LinkAccount { .. } => "link_account",
            ChatCommand::Cancel => "cancel",
            ChatCommand::Reaggregate => "reaggregate",
            ChatCommand::RecalculateAverages => "recalculate_averages",
        }
    }
}

/// Inbound request on the command queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub guild_id: GuildId,
    pub player: PlayerRef,
    pub command: ChatCommand,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Result carried back to the invoking player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplyOutcome {
    Ok { message: String },
    Err { kind: String, message: String },
}

/// Reply to a single command request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    pub guild_id: GuildId,
    pub player_id: PlayerId,
    /// Name of the command being answered
    pub command: String,
    pub correlation_id: String,
    /// Only visible to the invoking player
    pub ephemeral: bool,
    pub outcome: ReplyOutcome,
    pub timestamp: DateTime<Utc>,
}

impl CommandReply {
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, ReplyOutcome::Ok { .. })
    }
}

/// Event broadcast to the chat gateway when lifecycle state changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LobbyEvent {
    SignupOpened {
        guild_id: GuildId,
        match_name: String,
        format: MatchFormat,
        capacity: usize,
        opened_by: PlayerId,
    },
    QueueUpdated {
        guild_id: GuildId,
        match_name: String,
        queue: Vec<Player>,
        capacity: usize,
    },
    VoteStarted {
        guild_id: GuildId,
        kind: VoteKind,
        round: u64,
        options: Vec<String>,
        closes_in_seconds: u64,
    },
    VoteTallied {
        guild_id: GuildId,
        kind: VoteKind,
        tally: Vec<(String, u32)>,
    },
    VoteDecided {
        guild_id: GuildId,
        kind: VoteKind,
        option: String,
        resolution: VoteResolution,
    },
    TeamsAssigned {
        guild_id: GuildId,
        mode: TeamMode,
        team1: Vec<Player>,
        team2: Vec<Player>,
        captain1: Option<Player>,
        captain2: Option<Player>,
    },
    MatchStarted {
        guild_id: GuildId,
        match_name: String,
        map: String,
        team1: Vec<Player>,
        team2: Vec<Player>,
    },
    MatchReported {
        guild_id: GuildId,
        match_name: String,
        winner: TeamSide,
        changes: Vec<RatingChange>,
    },
    MatchCancelled {
        guild_id: GuildId,
        match_name: String,
        phase: MatchPhase,
    },
    PlayerPromoted {
        guild_id: GuildId,
        player_id: PlayerId,
        name: String,
        mmr: i64,
    },
    SignupRefresh {
        guild_id: GuildId,
        match_name: String,
        queue: Vec<Player>,
        capacity: usize,
    },
    ChannelRefresh {
        guild_id: GuildId,
        match_name: String,
    },
    LeaderboardRefreshed {
        guild_id: GuildId,
        page: LeaderboardPage,
    },
}

impl LobbyEvent {
    pub fn guild_id(&self) -> &str {
        match self {
            LobbyEvent::SignupOpened { guild_id, .. }
            | LobbyEvent::QueueUpdated { guild_id, .. }
            | LobbyEvent::VoteStarted { guild_id, .. }
            | LobbyEvent::VoteTallied { guild_id, .. }
            | LobbyEvent::VoteDecided { guild_id, .. }
            | LobbyEvent::TeamsAssigned { guild_id, .. }
            | LobbyEvent::MatchStarted { guild_id, .. }
            | LobbyEvent::MatchReported { guild_id, .. }
            | LobbyEvent::MatchCancelled { guild_id, .. }
            | LobbyEvent::PlayerPromoted { guild_id, .. }
            | LobbyEvent::SignupRefresh { guild_id, .. }
            | LobbyEvent::ChannelRefresh { guild_id, .. }
            | LobbyEvent::LeaderboardRefreshed { guild_id, .. } => guild_id,
        }
    }

    /// Event name used for routing keys and test assertions
    pub fn name(&self) -> &'static str {
        match self {
            LobbyEvent::SignupOpened { .. } => "SignupOpened",
            LobbyEvent::QueueUpdated { .. } => "QueueUpdated",
            LobbyEvent::VoteStarted { .. } => "VoteStarted",
            LobbyEvent::VoteTallied { .. } => "VoteTallied",
            LobbyEvent::VoteDecided { .. } => "VoteDecided",
            LobbyEvent::TeamsAssigned { .. } => "TeamsAssigned",
            LobbyEvent::MatchStarted { .. } => "MatchStarted",
            LobbyEvent::MatchReported { .. } => "MatchReported",
            LobbyEvent::MatchCancelled { .. } => "MatchCancelled",
            LobbyEvent::PlayerPromoted { .. } => "PlayerPromoted",
            LobbyEvent::SignupRefresh { .. } => "SignupRefresh",
            LobbyEvent::ChannelRefresh { .. } => "ChannelRefresh",
            LobbyEvent::LeaderboardRefreshed { .. } => "LeaderboardRefreshed",
        }
    }
}

/// Union of all messages that travel over AMQP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AmqpMessage {
    CommandRequest(CommandRequest),
    CommandReply(CommandReply),
    LobbyEvent(LobbyEvent),
}
