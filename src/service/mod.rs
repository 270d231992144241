//! Service layer for the ranked-arena matchmaking service
//!
//! Application state, the command facade, background task management and
//! health checks.

pub mod app;
pub mod health;
pub mod matchmaking;

pub use app::{AppState, ServiceContext, ServiceError};
pub use health::{HealthCheck, HealthStatus};
pub use matchmaking::MatchmakingService;
