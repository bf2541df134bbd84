//! Error types for the scrim service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application. Domain failures are raised as [`ScrimError`] and
//! classified by callers with `downcast_ref`.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific scrim scenarios
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScrimError {
    #[error("Invalid input: {reason}")]
    UserInput { reason: String },

    #[error("Not allowed right now: {reason}")]
    Precondition { reason: String },

    #[error("Stats provider unavailable: {message}")]
    StatsProviderUnavailable { message: String },

    #[error("Riot account not found: {riot_id}")]
    AccountNotFound { riot_id: String },

    #[error(
        "Reported match does not match the tracked roster - missing: [{}], unexpected: [{}]",
        missing.join(", "),
        unexpected.join(", ")
    )]
    RosterMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Could not match the winning side '{winner_team_id}' to either tracked team")]
    AmbiguousWinner { winner_team_id: String },

    #[error("Reported map '{reported}' does not match the selected map '{expected}'")]
    MapMismatch { expected: String, reported: String },

    #[error("Invariant violated: {message}")]
    InvariantViolation { message: String },

    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl ScrimError {
    /// Stable snake-case name used in replies and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            ScrimError::UserInput { .. } => "user_input",
            ScrimError::Precondition { .. } => "precondition",
            ScrimError::StatsProviderUnavailable { .. } => "external_dependency",
            ScrimError::AccountNotFound { .. } => "account_not_found",
            ScrimError::RosterMismatch { .. } => "roster_mismatch",
            ScrimError::AmbiguousWinner { .. } => "ambiguous_winner",
            ScrimError::MapMismatch { .. } => "map_mismatch",
            ScrimError::InvariantViolation { .. } => "invariant_violation",
            ScrimError::AmqpConnectionFailed { .. } => "amqp",
            ScrimError::ConfigurationError { .. } => "configuration",
            ScrimError::InternalError { .. } => "internal",
        }
    }

    /// Whether the failure should only be shown to the invoking player
    pub fn is_ephemeral(&self) -> bool {
        matches!(
            self,
            ScrimError::UserInput { .. } | ScrimError::Precondition { .. }
        )
    }
}

/// Classify any error into a reply kind, treating foreign errors as internal
pub fn error_kind(error: &anyhow::Error) -> &'static str {
    error
        .downcast_ref::<ScrimError>()
        .map(ScrimError::kind)
        .unwrap_or("internal")
}
