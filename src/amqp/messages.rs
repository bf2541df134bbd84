//! AMQP message definitions and serialization

use crate::error::{Result, ScrimError};
use crate::types::*;
use serde_json;

/// Default queue and exchange names
pub const COMMAND_QUEUE: &str = "scrim.commands";
pub const REPLY_EXCHANGE: &str = "scrim.replies";
pub const LOBBY_EVENTS_EXCHANGE: &str = "scrim.lobby_events";

/// Routing keys for lobby events
pub const SIGNUP_OPENED_ROUTING_KEY: &str = "signup.opened";
pub const QUEUE_UPDATED_ROUTING_KEY: &str = "queue.updated";
pub const VOTE_STARTED_ROUTING_KEY: &str = "vote.started";
pub const VOTE_TALLIED_ROUTING_KEY: &str = "vote.tallied";
pub const VOTE_DECIDED_ROUTING_KEY: &str = "vote.decided";
pub const TEAMS_ASSIGNED_ROUTING_KEY: &str = "teams.assigned";
pub const MATCH_STARTED_ROUTING_KEY: &str = "match.started";
pub const MATCH_REPORTED_ROUTING_KEY: &str = "match.reported";
pub const MATCH_CANCELLED_ROUTING_KEY: &str = "match.cancelled";
pub const PLAYER_PROMOTED_ROUTING_KEY: &str = "player.promoted";
pub const SIGNUP_REFRESH_ROUTING_KEY: &str = "refresh.signup";
pub const CHANNEL_REFRESH_ROUTING_KEY: &str = "refresh.channel";
pub const LEADERBOARD_REFRESH_ROUTING_KEY: &str = "refresh.leaderboard";

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Envelope that keeps an existing correlation id
    pub fn with_correlation_id(payload: T, routing_key: String, correlation_id: String) -> Self {
        Self {
            payload,
            correlation_id,
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            ScrimError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            ScrimError::UserInput {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Serialize a command request to bytes
    pub fn serialize_command_request(request: &CommandRequest) -> Result<Vec<u8>> {
        Self::validate_command_request(request)?;
        serde_json::to_vec(request).map_err(|e| {
            ScrimError::InternalError {
                message: format!("Failed to serialize command request: {}", e),
            }
            .into()
        })
    }

    /// Deserialize command request from bytes
    pub fn deserialize_command_request(bytes: &[u8]) -> Result<CommandRequest> {
        let request: CommandRequest =
            serde_json::from_slice(bytes).map_err(|e| ScrimError::UserInput {
                reason: format!("Failed to deserialize command request: {}", e),
            })?;

        Self::validate_command_request(&request)?;
        Ok(request)
    }

    /// Validate a command request
    pub fn validate_command_request(request: &CommandRequest) -> Result<()> {
        if request.guild_id.trim().is_empty() {
            return Err(ScrimError::UserInput {
                reason: "Guild ID cannot be empty".to_string(),
            }
            .into());
        }

        if request.player.player_id.trim().is_empty() {
            return Err(ScrimError::UserInput {
                reason: "Player ID cannot be empty".to_string(),
            }
            .into());
        }

        match &request.command {
            ChatCommand::Vote { option, .. } if option.trim().is_empty() => {
                Err(ScrimError::UserInput {
                    reason: "Vote option cannot be empty".to_string(),
                }
                .into())
            }
            ChatCommand::LinkAccount { riot_id } | ChatCommand::SetCaptain { riot_id, .. }
                if riot_id.trim().is_empty() =>
            {
                Err(ScrimError::UserInput {
                    reason: "Riot ID cannot be empty".to_string(),
                }
                .into())
            }
            _ => Ok(()),
        }
    }

    /// Serialize any AMQP message to bytes
    pub fn serialize_message<T: serde::Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            ScrimError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Routing key for a lobby event
    pub fn event_routing_key(event: &LobbyEvent) -> &'static str {
        match event {
            LobbyEvent::SignupOpened { .. } => SIGNUP_OPENED_ROUTING_KEY,
            LobbyEvent::QueueUpdated { .. } => QUEUE_UPDATED_ROUTING_KEY,
            LobbyEvent::VoteStarted { .. } => VOTE_STARTED_ROUTING_KEY,
            LobbyEvent::VoteTallied { .. } => VOTE_TALLIED_ROUTING_KEY,
            LobbyEvent::VoteDecided { .. } => VOTE_DECIDED_ROUTING_KEY,
            LobbyEvent::TeamsAssigned { .. } => TEAMS_ASSIGNED_ROUTING_KEY,
            LobbyEvent::MatchStarted { .. } => MATCH_STARTED_ROUTING_KEY,
            LobbyEvent::MatchReported { .. } => MATCH_REPORTED_ROUTING_KEY,
            LobbyEvent::MatchCancelled { .. } => MATCH_CANCELLED_ROUTING_KEY,
            LobbyEvent::PlayerPromoted { .. } => PLAYER_PROMOTED_ROUTING_KEY,
            LobbyEvent::SignupRefresh { .. } => SIGNUP_REFRESH_ROUTING_KEY,
            LobbyEvent::ChannelRefresh { .. } => CHANNEL_REFRESH_ROUTING_KEY,
            LobbyEvent::LeaderboardRefreshed { .. } => LEADERBOARD_REFRESH_ROUTING_KEY,
        }
    }

    /// Routing key for a reply, `reply.<command>`
    pub fn reply_routing_key(command: &ChatCommand) -> String {
        format!("reply.{}", command.name())
    }

    /// Get routing key for a message type
    pub fn get_routing_key(message: &AmqpMessage) -> String {
        match message {
            AmqpMessage::CommandRequest(request) => format!("command.{}", request.command.name()),
            AmqpMessage::CommandReply(_) => "reply".to_string(),
            AmqpMessage::LobbyEvent(event) => Self::event_routing_key(event).to_string(),
        }
    }
}
