//! Usage and session lifecycle events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::workflow::{ExitReason, NodeType, SessionExit, WorkflowContext};

/// Feedback a user gave on a stage output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Like,
    Dislike,
    Adopt,
    Edit,
    Regenerate,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackKind::Like => "like",
            FeedbackKind::Dislike => "dislike",
            FeedbackKind::Adopt => "adopt",
            FeedbackKind::Edit => "edit",
            FeedbackKind::Regenerate => "regenerate",
        }
    }
}

/// The single measurement carried by a usage event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum UsageMetric {
    /// One use of the node
    Usage,
    ResponseTime { ms: f64 },
    Feedback { feedback: FeedbackKind },
    ContentLength { chars: f64 },
}

impl UsageMetric {
    pub fn kind_str(&self) -> &'static str {
        match self {
            UsageMetric::Usage => "usage",
            UsageMetric::ResponseTime { .. } => "responseTime",
            UsageMetric::Feedback { .. } => "feedback",
            UsageMetric::ContentLength { .. } => "contentLength",
        }
    }
}

/// Append-only usage record for one node in one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    pub node_id: String,
    #[serde(default)]
    pub node_type: Option<NodeType>,
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub metric: UsageMetric,
}

impl UsageEvent {
    pub fn new(node_id: impl Into<String>, session_id: impl Into<String>, metric: UsageMetric) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: None,
            session_id: session_id.into(),
            user_id: None,
            timestamp: Utc::now(),
            metric,
        }
    }

    pub fn with_node_type(mut self, node_type: NodeType) -> Self {
        self.node_type = Some(node_type);
        self
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Check the event can be aggregated
    pub fn validate(&self) -> Result<(), DropReason> {
        if self.node_id.trim().is_empty() {
            return Err(DropReason::MissingField("nodeId"));
        }
        if self.session_id.trim().is_empty() {
            return Err(DropReason::MissingField("sessionId"));
        }
        match self.metric {
            UsageMetric::ResponseTime { ms } if !(ms.is_finite() && ms >= 0.0) => {
                Err(DropReason::InvalidSample { kind: "responseTime", value: ms })
            }
            UsageMetric::ContentLength { chars } if !(chars.is_finite() && chars >= 0.0) => {
                Err(DropReason::InvalidSample { kind: "contentLength", value: chars })
            }
            _ => Ok(()),
        }
    }
}

/// Why an incoming event was not aggregated. Counted and logged, never raised.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DropReason {
    #[error("missing or blank field '{0}'")]
    MissingField(&'static str),

    #[error("invalid {kind} sample: {value}")]
    InvalidSample { kind: &'static str, value: f64 },

    #[error("malformed event: {0}")]
    Malformed(String),
}

/// Session lifecycle record written when a session ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: Option<String>,
    pub visited_nodes: Vec<String>,
    pub completed_nodes: Vec<String>,
    pub exit_node: Option<String>,
    pub exit_reason: ExitReason,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Snapshot of a context that has ended with `exit`
    pub fn from_context(context: &WorkflowContext, exit: &SessionExit) -> Self {
        Self {
            session_id: context.session_id.clone(),
            user_id: context.user_id.clone(),
            visited_nodes: context.visited_nodes.iter().cloned().collect(),
            completed_nodes: context.completed_nodes.iter().cloned().collect(),
            exit_node: exit.exit_node.clone(),
            exit_reason: exit.reason,
            started_at: context.started_at,
            ended_at: exit.ended_at,
        }
    }

    pub fn validate(&self) -> Result<(), DropReason> {
        if self.session_id.trim().is_empty() {
            return Err(DropReason::MissingField("sessionId"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event: UsageEvent = serde_json::from_value(json!({
            "nodeId": "draft",
            "nodeType": "draft",
            "sessionId": "s1",
            "kind": "responseTime",
            "ms": 420.0
        }))
        .unwrap();

        assert_eq!(event.metric, UsageMetric::ResponseTime { ms: 420.0 });
        assert_eq!(event.node_type, Some(NodeType::Draft));
        assert!(event.user_id.is_none());

        let feedback: UsageEvent = serde_json::from_value(json!({
            "nodeId": "draft",
            "sessionId": "s1",
            "kind": "feedback",
            "feedback": "adopt"
        }))
        .unwrap();
        assert_eq!(
            feedback.metric,
            UsageMetric::Feedback { feedback: FeedbackKind::Adopt }
        );
    }

    #[test]
    fn test_validate_rejects_blank_ids_and_negative_samples() {
        let blank = UsageEvent::new("  ", "s1", UsageMetric::Usage);
        assert_eq!(blank.validate(), Err(DropReason::MissingField("nodeId")));

        let no_session = UsageEvent::new("search", "", UsageMetric::Usage);
        assert_eq!(no_session.validate(), Err(DropReason::MissingField("sessionId")));

        let negative = UsageEvent::new("search", "s1", UsageMetric::ResponseTime { ms: -5.0 });
        assert!(matches!(negative.validate(), Err(DropReason::InvalidSample { .. })));

        let ok = UsageEvent::new("search", "s1", UsageMetric::ContentLength { chars: 0.0 });
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_session_record_from_context() {
        let mut ctx = WorkflowContext::new("s1").with_user("u1");
        ctx.mark_visited("search");
        ctx.completed_nodes.insert("search".to_string());
        ctx.mark_visited("package");
        let exit = SessionExit {
            exit_node: Some("package".to_string()),
            reason: ExitReason::Abandon,
            ended_at: Utc::now(),
        };

        let record = SessionRecord::from_context(&ctx, &exit);
        assert_eq!(record.visited_nodes, vec!["search", "package"]);
        assert_eq!(record.completed_nodes, vec!["search"]);
        assert_eq!(record.exit_node.as_deref(), Some("package"));
        assert_eq!(record.user_id.as_deref(), Some("u1"));
    }
}
