//! Service layer for the scrim-room service
//!
//! Application state, command dispatch and health reporting.

pub mod app;
pub mod dispatcher;
pub mod health;

pub use app::{AppState, ServiceError};
pub use dispatcher::CommandDispatcher;
pub use health::{ComponentCheck, HealthCheck, HealthStatus, ServiceProbe, ServiceStats};
