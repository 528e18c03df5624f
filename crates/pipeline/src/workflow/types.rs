//! Core types for stage orchestration

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{StageError, StageErrorKind};

/// Inputs supplied by the caller for a stage execution
pub type StageInputs = serde_json::Map<String, serde_json::Value>;

/// The five stages of the content pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Search,
    Package,
    Strategize,
    Draft,
    Publish,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Search => "search",
            NodeType::Package => "package",
            NodeType::Strategize => "strategize",
            NodeType::Draft => "draft",
            NodeType::Publish => "publish",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "search" => Ok(NodeType::Search),
            "package" => Ok(NodeType::Package),
            "strategize" | "strategy" => Ok(NodeType::Strategize),
            "draft" => Ok(NodeType::Draft),
            "publish" => Ok(NodeType::Publish),
            _ => Err(format!("Unknown node type: {}", s)),
        }
    }
}

/// Logical channel of the stage service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Short-lived conversational calls
    Chat,
    /// Long-running workflow runs
    Workflow,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Chat => "chat",
            Channel::Workflow => "workflow",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A statically declared pipeline node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub name: String,
    /// Nodes that must be completed before this one is worth running
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Input fields that must be present and non-empty
    #[serde(default)]
    pub required_inputs: Vec<String>,
    /// Outgoing edges considered by the recommendation engine
    #[serde(default)]
    pub next_steps: Vec<String>,
    pub channel: Channel,
    /// Remote bot or workflow identifier
    pub endpoint: String,
}

/// Output of a successful stage execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct StageOutput {
    pub node_id: String,
    pub data: serde_json::Value,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub produced_at: DateTime<Utc>,
}

impl StageOutput {
    /// Whether the remote produced anything usable
    pub fn is_empty(&self) -> bool {
        value_is_empty(&self.data)
    }

    /// Character count of the generated content, used for content-length samples
    pub fn content_length(&self) -> usize {
        match &self.data {
            serde_json::Value::Null => 0,
            serde_json::Value::String(s) => s.chars().count(),
            serde_json::Value::Object(map) => map
                .get("content")
                .and_then(|v| v.as_str())
                .map(|s| s.chars().count())
                .unwrap_or_else(|| self.data.to_string().chars().count()),
            other => other.to_string().chars().count(),
        }
    }
}

pub(crate) fn value_is_empty(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        serde_json::Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Outcome of one execution attempt of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StageResult {
    Success { data: StageOutput },
    Failure { kind: StageErrorKind, message: String },
}

impl From<Result<StageOutput, StageError>> for StageResult {
    fn from(result: Result<StageOutput, StageError>) -> Self {
        match result {
            Ok(data) => StageResult::Success { data },
            Err(err) => StageResult::Failure {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
pub enum ExitReason {
    Complete,
    Abandon,
    Timeout,
    Error,
    #[serde(other)]
    Other,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Complete => "complete",
            ExitReason::Abandon => "abandon",
            ExitReason::Timeout => "timeout",
            ExitReason::Error => "error",
            ExitReason::Other => "other",
        }
    }
}

impl std::str::FromStr for ExitReason {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "complete" | "completed" => ExitReason::Complete,
            "abandon" | "abandoned" => ExitReason::Abandon,
            "timeout" => ExitReason::Timeout,
            "error" => ExitReason::Error,
            _ => ExitReason::Other,
        })
    }
}

/// Exit point recorded when a session ends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SessionExit {
    pub exit_node: Option<String>,
    pub reason: ExitReason,
    pub ended_at: DateTime<Utc>,
}

/// Per-session execution state, mutated only by the stage executor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowContext {
    pub session_id: String,
    pub user_id: Option<String>,
    /// Insertion-ordered; the order is the visitation sequence
    pub visited_nodes: IndexSet<String>,
    pub completed_nodes: IndexSet<String>,
    /// Latest output per node. A re-run replaces the entry.
    pub output: HashMap<String, StageOutput>,
    /// Outputs replaced by re-runs, oldest first
    pub history: HashMap<String, Vec<StageOutput>>,
    pub started_at: DateTime<Utc>,
    pub exit: Option<SessionExit>,
    /// Node of the most recent execution attempt, successful or not
    #[serde(default)]
    pub last_executed: Option<String>,
    /// Whether the latest attempt of each node succeeded
    #[serde(default)]
    pub last_outcome: HashMap<String, bool>,
}

impl WorkflowContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: None,
            visited_nodes: IndexSet::new(),
            completed_nodes: IndexSet::new(),
            output: HashMap::new(),
            history: HashMap::new(),
            started_at: Utc::now(),
            exit: None,
            last_executed: None,
            last_outcome: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn mark_visited(&mut self, node_id: &str) {
        if !self.visited_nodes.contains(node_id) {
            self.visited_nodes.insert(node_id.to_string());
        }
    }

    /// Record a successful execution. The previous output, if any, moves to
    /// `history`, trimmed to `history_limit` entries.
    pub fn record_success(&mut self, output: StageOutput, history_limit: usize) {
        let node_id = output.node_id.clone();
        self.mark_visited(&node_id);
        self.last_executed = Some(node_id.clone());
        self.last_outcome.insert(node_id.clone(), true);
        if !self.completed_nodes.contains(&node_id) {
            self.completed_nodes.insert(node_id.clone());
        }

        if let Some(previous) = self.output.insert(node_id.clone(), output) {
            if history_limit > 0 {
                let history = self.history.entry(node_id).or_default();
                history.push(previous);
                if history.len() > history_limit {
                    let excess = history.len() - history_limit;
                    history.drain(..excess);
                }
            }
        }
    }

    /// Record a failed attempt that reached the stage service. The node's
    /// previous output stays in place but no longer counts as its latest result.
    pub fn record_failure(&mut self, node_id: &str) {
        self.mark_visited(node_id);
        self.last_executed = Some(node_id.to_string());
        self.last_outcome.insert(node_id.to_string(), false);
    }

    pub fn get_output(&self, node_id: &str) -> Option<&StageOutput> {
        self.output.get(node_id)
    }

    pub fn is_completed(&self, node_id: &str) -> bool {
        self.completed_nodes.contains(node_id)
    }

    /// Most recently first-visited node
    pub fn last_visited(&self) -> Option<&str> {
        self.visited_nodes.last().map(|s| s.as_str())
    }

    /// Node the session is currently at: the last one executed, or the last
    /// first-visited one when nothing has run yet
    pub fn current_node(&self) -> Option<&str> {
        self.last_executed.as_deref().or_else(|| self.last_visited())
    }

    pub fn last_attempt_succeeded(&self, node_id: &str) -> bool {
        self.last_outcome.get(node_id).copied().unwrap_or(false)
    }

    /// Visited but not completed, in visitation order
    pub fn skipped_nodes(&self) -> Vec<String> {
        self.visited_nodes
            .iter()
            .filter(|id| !self.completed_nodes.contains(*id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output(node_id: &str, data: serde_json::Value) -> StageOutput {
        StageOutput {
            node_id: node_id.to_string(),
            data,
            attempts: 1,
            elapsed_ms: 10,
            produced_at: Utc::now(),
        }
    }

    #[test]
    fn test_record_success_marks_visited_and_completed() {
        let mut ctx = WorkflowContext::new("s1");
        ctx.record_success(output("search", json!({"content": "hits"})), 5);

        assert!(ctx.visited_nodes.contains("search"));
        assert!(ctx.is_completed("search"));
        assert_eq!(ctx.get_output("search").unwrap().data["content"], "hits");
    }

    #[test]
    fn test_rerun_replaces_output_and_keeps_history() {
        let mut ctx = WorkflowContext::new("s1");
        ctx.record_success(output("draft", json!("first")), 2);
        ctx.record_success(output("draft", json!("second")), 2);
        ctx.record_success(output("draft", json!("third")), 2);
        ctx.record_success(output("draft", json!("fourth")), 2);

        assert_eq!(ctx.get_output("draft").unwrap().data, json!("fourth"));
        let history: Vec<_> = ctx.history["draft"].iter().map(|o| o.data.clone()).collect();
        assert_eq!(history, vec![json!("second"), json!("third")]);
        assert_eq!(ctx.visited_nodes.len(), 1);
    }

    #[test]
    fn test_visitation_order_is_preserved() {
        let mut ctx = WorkflowContext::new("s1");
        ctx.mark_visited("a");
        ctx.mark_visited("b");
        ctx.mark_visited("a");
        ctx.mark_visited("c");

        let order: Vec<_> = ctx.visited_nodes.iter().cloned().collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(ctx.last_visited(), Some("c"));
    }

    #[test]
    fn test_current_node_follows_last_execution() {
        let mut ctx = WorkflowContext::new("s1");
        assert_eq!(ctx.current_node(), None);

        ctx.record_success(output("search", json!("hits")), 0);
        ctx.record_success(output("strategize", json!("plan")), 0);
        assert_eq!(ctx.current_node(), Some("strategize"));

        // Going back to an earlier node moves the session there
        ctx.record_success(output("search", json!("more hits")), 0);
        assert_eq!(ctx.current_node(), Some("search"));
        assert_eq!(ctx.last_visited(), Some("strategize"));
    }

    #[test]
    fn test_failed_rerun_clears_latest_success() {
        let mut ctx = WorkflowContext::new("s1");
        ctx.record_success(output("search", json!("hits")), 0);
        assert!(ctx.last_attempt_succeeded("search"));

        ctx.record_failure("search");
        assert!(!ctx.last_attempt_succeeded("search"));
        assert!(ctx.is_completed("search"));
        assert_eq!(ctx.get_output("search").unwrap().data, json!("hits"));
        assert_eq!(ctx.current_node(), Some("search"));

        ctx.record_success(output("search", json!("again")), 0);
        assert!(ctx.last_attempt_succeeded("search"));
    }

    #[test]
    fn test_context_without_execution_fields_deserializes() {
        let mut value = serde_json::to_value(WorkflowContext::new("s1")).unwrap();
        let object = value.as_object_mut().unwrap();
        object.remove("lastExecuted");
        object.remove("lastOutcome");

        let ctx: WorkflowContext = serde_json::from_value(value).unwrap();
        assert_eq!(ctx.last_executed, None);
        assert!(ctx.last_outcome.is_empty());
    }

    #[test]
    fn test_skipped_nodes() {
        let mut ctx = WorkflowContext::new("s1");
        ctx.record_success(output("a", json!("x")), 0);
        ctx.record_success(output("b", json!("y")), 0);
        ctx.mark_visited("c");

        assert_eq!(ctx.skipped_nodes(), vec!["c".to_string()]);
    }

    #[test]
    fn test_output_emptiness() {
        assert!(output("a", json!(null)).is_empty());
        assert!(output("a", json!("   ")).is_empty());
        assert!(output("a", json!({})).is_empty());
        assert!(!output("a", json!({"content": "x"})).is_empty());
        assert!(!output("a", json!(0)).is_empty());
    }

    #[test]
    fn test_content_length_prefers_content_field() {
        assert_eq!(output("a", json!({"content": "héllo"})).content_length(), 5);
        assert_eq!(output("a", json!("abc")).content_length(), 3);
        assert_eq!(output("a", json!(null)).content_length(), 0);
    }

    #[test]
    fn test_stage_result_from_error() {
        let result: StageResult = Err(StageError::Validation { field: "query".into() }).into();
        match result {
            StageResult::Failure { kind, message } => {
                assert_eq!(kind, StageErrorKind::ValidationError);
                assert!(message.contains("query"));
            }
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn test_exit_reason_parsing() {
        assert_eq!("abandon".parse::<ExitReason>().unwrap(), ExitReason::Abandon);
        assert_eq!("Completed".parse::<ExitReason>().unwrap(), ExitReason::Complete);
        assert_eq!("wandered-off".parse::<ExitReason>().unwrap(), ExitReason::Other);
    }
}
