//! Boundary facade over orchestration and usage aggregation

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::gateway::StepGateway;
use crate::usage::{GroupBy, SessionRecord, SessionStats, StatsOverview, UsageAggregator, UsageEvent};
use crate::workflow::{
    ExitReason, Recommendation, RecommendationEngine, SessionExit, SessionHandle, SessionRegistry,
    StageExecutor, StageInputs, StageOutput, StageResult, WorkflowContext, WorkflowGraph,
};

/// Error body reported for a failed stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct StageErrorBody {
    pub code: String,
    pub message: String,
}

/// Result of `execute_stage`: `data` on success, `error` otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct ExecuteStageResponse {
    pub success: bool,
    pub data: Option<StageOutput>,
    pub error: Option<StageErrorBody>,
}

impl From<StageResult> for ExecuteStageResponse {
    fn from(result: StageResult) -> Self {
        match result {
            StageResult::Success { data } => Self {
                success: true,
                data: Some(data),
                error: None,
            },
            StageResult::Failure { kind, message } => Self {
                success: false,
                data: None,
                error: Some(StageErrorBody {
                    code: kind.code().to_string(),
                    message,
                }),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

pub struct PipelineService {
    graph: Arc<WorkflowGraph>,
    sessions: SessionRegistry,
    executor: StageExecutor,
    recommender: RecommendationEngine,
    usage: Arc<UsageAggregator>,
}

impl PipelineService {
    pub fn new(
        config: &PipelineConfig,
        graph: Arc<WorkflowGraph>,
        gateway: StepGateway,
        usage: Arc<UsageAggregator>,
    ) -> Self {
        let executor = StageExecutor::new(
            graph.clone(),
            Arc::new(gateway),
            usage.clone(),
            config.usage.history_limit,
        );
        let recommender = RecommendationEngine::new(graph.clone(), config.recommendation);

        Self {
            graph,
            sessions: SessionRegistry::new(),
            executor,
            recommender,
            usage,
        }
    }

    /// Service talking to the stage service over HTTP, with the graph from
    /// `graph_path` or the built-in pipeline
    pub fn from_config(config: &PipelineConfig, usage: Arc<UsageAggregator>) -> Result<Self, StageError> {
        let graph = WorkflowGraph::load(config.graph_path.as_deref())?;
        tracing::info!(
            "Loaded pipeline graph with {} node(s)",
            graph.nodes().len()
        );
        Ok(Self::new(
            config,
            Arc::new(graph),
            StepGateway::from_config(&config.gateway),
            usage,
        ))
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn usage(&self) -> &Arc<UsageAggregator> {
        &self.usage
    }

    pub fn start_session(&self, user_id: Option<String>) -> SessionInfo {
        let handle = self.sessions.start(user_id);
        let ctx = handle.snapshot();
        tracing::info!("Started session '{}'", ctx.session_id);
        SessionInfo {
            session_id: ctx.session_id,
            user_id: ctx.user_id,
            started_at: ctx.started_at,
        }
    }

    /// Run one stage. Sessions unknown to the registry are opened on first use.
    pub async fn execute_stage(
        &self,
        session_id: &str,
        node_id: &str,
        inputs: &StageInputs,
    ) -> ExecuteStageResponse {
        let session = self.sessions.get_or_create(session_id);
        let result: StageResult = self.executor.execute(&session, node_id, inputs).await.into();
        result.into()
    }

    /// Candidate next nodes for the session's current node
    pub fn recommend_next(&self, session_id: &str, rank: bool) -> Vec<Recommendation> {
        match self.sessions.get(session_id) {
            Some(session) => self.recommender.recommend_next(&session.snapshot(), rank),
            None => self
                .recommender
                .recommend_next(&WorkflowContext::new(session_id), rank),
        }
    }

    /// Fire-and-forget usage ingestion
    pub fn record_usage_event(&self, event: UsageEvent) {
        self.usage.record(event);
    }

    pub fn record_raw_usage_event(&self, value: serde_json::Value) {
        self.usage.record_raw(value);
    }

    /// End a session, cancelling its pending executions, and record it.
    /// The session leaves the live registry; its stats stay available from
    /// the recorded session. When `exit_node` is absent the current node is used.
    pub fn exit_session(
        &self,
        session_id: &str,
        exit_node: Option<String>,
        reason: ExitReason,
    ) -> Option<SessionStats> {
        let session = self.sessions.remove(session_id)?;
        Some(self.close_session(&session, exit_node, reason))
    }

    fn close_session(
        &self,
        session: &SessionHandle,
        exit_node: Option<String>,
        reason: ExitReason,
    ) -> SessionStats {
        session.abort();

        let record = session.with_context(|ctx| {
            let exit = SessionExit {
                exit_node: exit_node.or_else(|| ctx.current_node().map(str::to_string)),
                reason,
                ended_at: Utc::now(),
            };
            let record = SessionRecord::from_context(ctx, &exit);
            ctx.exit = Some(exit);
            record
        });

        let stats = SessionStats::from_record(&record);
        self.usage.record_session(record);
        stats
    }

    /// Close every live session idle for at least `max_idle` with a
    /// timeout exit. Returns the number of sessions closed.
    pub fn expire_idle_sessions(&self, max_idle: Duration) -> usize {
        let expired = self.sessions.evict_idle(max_idle);
        for session in &expired {
            tracing::info!("Session '{}' timed out", session.session_id());
            self.close_session(session, None, ExitReason::Timeout);
        }
        expired.len()
    }

    pub fn live_session_count(&self) -> usize {
        self.sessions.live_count()
    }

    /// Stats of a live session, or of an ended one while its record is retained
    pub fn session_stats(&self, session_id: &str) -> Option<SessionStats> {
        match self.sessions.get(session_id) {
            Some(session) => Some(SessionStats::from_context(&session.snapshot())),
            None => self
                .usage
                .session_record(session_id)
                .map(|record| SessionStats::from_record(&record)),
        }
    }

    /// Cancel pending executions of a session. Returns false for an unknown session.
    pub fn abort_session(&self, session_id: &str) -> bool {
        match self.sessions.get(session_id) {
            Some(session) => {
                tracing::info!("Aborting session '{}'", session_id);
                session.abort();
                true
            }
            None => false,
        }
    }

    pub fn stats_overview(&self, window_days: Option<u32>, group_by: GroupBy) -> StatsOverview {
        self.usage.overview(window_days, group_by)
    }
}
