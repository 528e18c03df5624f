//! Stage execution engine
//!
//! One call runs one node through `validating -> executing -> succeeded |
//! failed`. A later call for the same node starts over and replaces the
//! stored output.

use std::sync::Arc;
use std::time::Instant;

use super::graph::WorkflowGraph;
use super::in_flight::InFlightRegistry;
use super::payload::build_payload;
use super::session::SessionHandle;
use super::types::{StageInputs, StageOutput, WorkflowNode};
use crate::error::StageError;
use crate::gateway::StepGateway;
use crate::metrics;
use crate::usage::{UsageAggregator, UsageEvent, UsageMetric};

/// Phase of a single execution, used for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePhase {
    Idle,
    Validating,
    Executing,
    Succeeded,
    Failed,
}

impl std::fmt::Display for StagePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StagePhase::Idle => "idle",
            StagePhase::Validating => "validating",
            StagePhase::Executing => "executing",
            StagePhase::Succeeded => "succeeded",
            StagePhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// First required input that is absent, null or a blank string
pub fn validate_inputs(node: &WorkflowNode, inputs: &StageInputs) -> Result<(), StageError> {
    for field in &node.required_inputs {
        let missing = match inputs.get(field) {
            None => true,
            Some(serde_json::Value::String(s)) => s.trim().is_empty(),
            Some(value) => value.is_null(),
        };
        if missing {
            return Err(StageError::Validation {
                field: field.clone(),
            });
        }
    }
    Ok(())
}

/// Runs pipeline nodes against the stage service
pub struct StageExecutor {
    graph: Arc<WorkflowGraph>,
    gateway: Arc<StepGateway>,
    in_flight: InFlightRegistry,
    usage: Arc<UsageAggregator>,
    history_limit: usize,
}

impl StageExecutor {
    pub fn new(
        graph: Arc<WorkflowGraph>,
        gateway: Arc<StepGateway>,
        usage: Arc<UsageAggregator>,
        history_limit: usize,
    ) -> Self {
        Self {
            graph,
            gateway,
            in_flight: InFlightRegistry::new(),
            usage,
            history_limit,
        }
    }

    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    /// Execute `node_id` for the session.
    ///
    /// Dropping the returned future cancels the outbound call and releases
    /// the in-flight marker.
    pub async fn execute(
        &self,
        session: &SessionHandle,
        node_id: &str,
        inputs: &StageInputs,
    ) -> Result<StageOutput, StageError> {
        let session_id = session.session_id();
        let start = Instant::now();

        let node = self.graph.get(node_id).ok_or_else(|| {
            tracing::warn!("[STAGE_EXECUTOR] Unknown node '{}' requested", node_id);
            StageError::Config(format!("Unknown node '{}'", node_id))
        })?;

        let _guard = self.in_flight.try_acquire(session_id, node_id).inspect_err(|_| {
            tracing::warn!(
                "[STAGE_EXECUTOR] Node '{}' already running for session '{}'",
                node_id,
                session_id
            );
        })?;

        let result = self.run(session, node, inputs).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(output) => {
                session.with_context(|ctx| ctx.record_success(output.clone(), self.history_limit));
                metrics::record_stage_execution(node_id, "success", elapsed.as_secs_f64());
                self.emit_success_usage(session, node, output);
                tracing::info!(
                    "[STAGE_EXECUTOR] {} -> {} for node '{}' in {}ms ({} attempt(s))",
                    StagePhase::Executing,
                    StagePhase::Succeeded,
                    node_id,
                    elapsed.as_millis(),
                    output.attempts
                );
            }
            Err(err) => {
                if err.entered_node() {
                    session.with_context(|ctx| ctx.record_failure(node_id));
                }
                metrics::record_stage_execution(node_id, err.code(), elapsed.as_secs_f64());
                tracing::warn!(
                    "[STAGE_EXECUTOR] -> {} for node '{}' after {}ms: {}",
                    StagePhase::Failed,
                    node_id,
                    elapsed.as_millis(),
                    err
                );
            }
        }

        result
    }

    async fn run(
        &self,
        session: &SessionHandle,
        node: &WorkflowNode,
        inputs: &StageInputs,
    ) -> Result<StageOutput, StageError> {
        tracing::debug!(
            "[STAGE_EXECUTOR] {} -> {} for node '{}' in session '{}'",
            StagePhase::Idle,
            StagePhase::Validating,
            node.id,
            session.session_id()
        );
        validate_inputs(node, inputs)?;

        // Snapshot upstream outputs; the context lock is not held across the call
        let upstream_outputs: Vec<(&WorkflowNode, StageOutput)> = session.with_context(|ctx| {
            node.dependencies
                .iter()
                .filter_map(|dep| {
                    let dep_node = self.graph.get(dep)?;
                    let output = ctx.get_output(dep)?;
                    Some((dep_node, output.clone()))
                })
                .collect()
        });
        let upstream: Vec<(&WorkflowNode, &StageOutput)> =
            upstream_outputs.iter().map(|(n, o)| (*n, o)).collect();

        let payload = build_payload(node, session.session_id(), inputs, &upstream);

        tracing::debug!(
            "[STAGE_EXECUTOR] {} -> {} for node '{}' via {} channel",
            StagePhase::Validating,
            StagePhase::Executing,
            node.id,
            node.channel
        );
        let cancel = session.child_token();
        self.gateway
            .execute_cancellable(node.channel, &payload, &cancel)
            .await
    }

    fn emit_success_usage(&self, session: &SessionHandle, node: &WorkflowNode, output: &StageOutput) {
        let user_id = session.with_context(|ctx| ctx.user_id.clone());
        let event = |metric: UsageMetric| {
            UsageEvent::new(&node.id, session.session_id(), metric)
                .with_node_type(node.node_type)
                .with_user(user_id.clone())
        };

        self.usage.record(event(UsageMetric::Usage));
        self.usage.record(event(UsageMetric::ResponseTime {
            ms: output.elapsed_ms as f64,
        }));
        self.usage.record(event(UsageMetric::ContentLength {
            chars: output.content_length() as f64,
        }));
    }
}
