//! Error taxonomy for stage execution.
//!
//! Every failure that crosses the executor boundary is a [`StageError`] with a
//! stable machine code. Aggregation failures live in [`crate::usage::DropReason`]
//! and never surface here.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Failure of a single stage execution
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required input: {field}")]
    Validation { field: String },

    #[error("Transport error after {attempts} attempt(s): {message}")]
    Transport { message: String, attempts: u32 },

    #[error("Stage service rejected the request ({code}): {message}")]
    Domain { code: String, message: String },

    #[error("Node '{node_id}' is already running for session '{session_id}'")]
    AlreadyRunning { session_id: String, node_id: String },

    #[error("Execution cancelled")]
    Cancelled,
}

/// Discriminant of [`StageError`], used in results and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageErrorKind {
    ConfigError,
    ValidationError,
    TransportError,
    DomainError,
    AlreadyRunning,
    Cancelled,
}

impl StageErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            StageErrorKind::ConfigError => "CONFIG_ERROR",
            StageErrorKind::ValidationError => "VALIDATION_ERROR",
            StageErrorKind::TransportError => "TRANSPORT_ERROR",
            StageErrorKind::DomainError => "DOMAIN_ERROR",
            StageErrorKind::AlreadyRunning => "ALREADY_RUNNING",
            StageErrorKind::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl StageError {
    pub fn kind(&self) -> StageErrorKind {
        match self {
            StageError::Config(_) => StageErrorKind::ConfigError,
            StageError::Validation { .. } => StageErrorKind::ValidationError,
            StageError::Transport { .. } => StageErrorKind::TransportError,
            StageError::Domain { .. } => StageErrorKind::DomainError,
            StageError::AlreadyRunning { .. } => StageErrorKind::AlreadyRunning,
            StageError::Cancelled => StageErrorKind::Cancelled,
        }
    }

    /// Stable error code reported to callers
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Whether the failure happened after the node was entered.
    ///
    /// Config and validation failures are raised before any dispatch, and a
    /// duplicate execution never owned the node in the first place.
    pub fn entered_node(&self) -> bool {
        matches!(
            self,
            StageError::Transport { .. } | StageError::Domain { .. } | StageError::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, StageError>;
