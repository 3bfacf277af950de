//! Error types for the supervisor and its external collaborators.

use thiserror::Error;

use crate::facts::FactId;
use crate::navigation::GoalId;

/// Failure reported by (or while talking to) an external service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service could not be reached.
    #[error("service unreachable: {0}")]
    Unreachable(String),

    /// The service answered but refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The embedded fact store failed.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A blocking adapter call panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// The tracked agent's position could not be resolved this tick.
///
/// Both variants are expected in a tracking system and only mean "no decision".
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("transform for {frame} unavailable: {reason}")]
    Unavailable { frame: String, reason: String },

    #[error("transform lookup for {frame} timed out")]
    Timeout { frame: String },
}

#[derive(Debug, Error)]
pub enum NavigationError {
    /// A second goal was started while one is still outstanding.
    #[error("navigation goal {0} is already outstanding")]
    AlreadyActive(GoalId),

    /// An earlier send timed out; the server may still hold that goal.
    #[error("an earlier navigation goal was never acknowledged")]
    Unacknowledged,

    #[error("motion server did not answer {0} in time")]
    Timeout(&'static str),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Debug, Error)]
pub enum FactError {
    /// A fact is already open; it must be closed before another is opened.
    #[error("fact {0} is still open")]
    AlreadyOpen(FactId),

    #[error("fact store did not answer {0} in time")]
    Timeout(&'static str),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A required service never became ready during startup.
    #[error("{service} not ready at startup: {reason}")]
    Startup {
        service: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Navigation(#[from] NavigationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
