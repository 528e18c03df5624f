//! Transport trait and common types for calling the stage service

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::workflow::{Channel, NodeType};

/// Request sent to the stage service for one node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagePayload {
    pub endpoint: String,
    pub session_id: String,
    pub node_id: String,
    pub node_type: NodeType,
    /// Node-type specific parameters shaped by the payload builder
    pub parameters: serde_json::Value,
}

/// Failure of a single attempt, classified at the call site
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttemptError {
    /// Timeout, refused connection, DNS failure, 408/429/5xx
    #[error("{0}")]
    Transport(String),

    /// The stage service explicitly rejected the request
    #[error("({code}) {message}")]
    Domain { code: String, message: String },
}

impl AttemptError {
    pub fn is_transport(&self) -> bool {
        matches!(self, AttemptError::Transport(_))
    }
}

/// Response envelope returned by the stage service
#[derive(Debug, Clone, Deserialize)]
pub struct StageEnvelope {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl StageEnvelope {
    /// Split the envelope into data or a domain rejection
    pub fn into_result(self) -> Result<serde_json::Value, AttemptError> {
        if self.code == 0 {
            Ok(self.data)
        } else {
            Err(AttemptError::Domain {
                code: self.code.to_string(),
                message: self
                    .msg
                    .unwrap_or_else(|| "stage service returned a non-zero code".to_string()),
            })
        }
    }
}

/// A backend able to perform one attempt against the stage service.
///
/// Implementations classify failures; retry, timeout and cancellation are the
/// gateway's responsibility.
#[async_trait]
pub trait StageTransport: Send + Sync {
    /// Name for logging
    fn name(&self) -> &'static str;

    /// Perform a single attempt
    async fn send(
        &self,
        channel: Channel,
        payload: &StagePayload,
    ) -> Result<serde_json::Value, AttemptError>;
}
