//! Configuration management for the scrim-room service
//!
//! This module handles all configuration loading from environment variables
//! and TOML files, validation, and default values for the service.

pub mod app;
pub mod lobby;
pub mod rating;

// Re-export commonly used types
pub use app::{
    validate_config, AmqpSettings, AppConfig, ServiceSettings, StatsProviderSettings,
    StorageBackend, StorageSettings,
};
pub use lobby::LobbyConfig;
pub use rating::RatingConfig;
