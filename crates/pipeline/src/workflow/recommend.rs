//! Next-step recommendations scored from the static graph and session progress

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::graph::WorkflowGraph;
use super::types::{WorkflowContext, WorkflowNode};
use crate::config::RecommendationWeights;

/// A candidate next node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub node_id: String,
    pub confidence: f64,
    pub reason: String,
    /// Inputs the caller must supply to run the candidate
    pub required_data: Vec<String>,
}

pub struct RecommendationEngine {
    graph: Arc<WorkflowGraph>,
    weights: RecommendationWeights,
}

impl RecommendationEngine {
    pub fn new(graph: Arc<WorkflowGraph>, weights: RecommendationWeights) -> Self {
        Self { graph, weights }
    }

    pub fn weights(&self) -> &RecommendationWeights {
        &self.weights
    }

    /// Score the declared next steps of `current_node_id`.
    ///
    /// Results keep declaration order unless `rank` is set, in which case they
    /// are stably sorted by descending confidence. An unknown node has no
    /// recommendations.
    pub fn recommend(
        &self,
        current_node_id: &str,
        context: &WorkflowContext,
        rank: bool,
    ) -> Vec<Recommendation> {
        let Some(current) = self.graph.get(current_node_id) else {
            return Vec::new();
        };

        // Only the latest attempt counts; a failed re-run forfeits the bonus
        let current_succeeded = context.last_attempt_succeeded(&current.id)
            && context.get_output(&current.id).is_some_and(|o| !o.is_empty());

        let mut recommendations: Vec<Recommendation> = current
            .next_steps
            .iter()
            .filter_map(|id| self.graph.get(id))
            .map(|candidate| self.score(current, candidate, context, current_succeeded))
            .collect();

        if rank {
            recommendations.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        }
        recommendations
    }

    /// Recommendations from the session's current node, or the graph's entry
    /// nodes for a session that has not visited anything yet
    pub fn recommend_next(&self, context: &WorkflowContext, rank: bool) -> Vec<Recommendation> {
        match context.current_node() {
            Some(current) => self.recommend(current, context, rank),
            None => self
                .graph
                .entry_nodes()
                .map(|node| Recommendation {
                    node_id: node.id.clone(),
                    confidence: self.weights.base.clamp(0.0, 1.0),
                    reason: format!("Start the pipeline with {}", display_name(node)),
                    required_data: node.required_inputs.clone(),
                })
                .collect(),
        }
    }

    fn score(
        &self,
        current: &WorkflowNode,
        candidate: &WorkflowNode,
        context: &WorkflowContext,
        current_succeeded: bool,
    ) -> Recommendation {
        let mut confidence = self.weights.base;
        if current_succeeded {
            confidence += self.weights.success_bonus;
        }
        if !candidate.dependencies.is_empty() {
            let completed = candidate
                .dependencies
                .iter()
                .filter(|dep| context.is_completed(dep))
                .count();
            confidence *= completed as f64 / candidate.dependencies.len() as f64;
        }
        let confidence = confidence.clamp(0.0, 1.0);

        let reason = if confidence < self.weights.low_threshold {
            "prerequisites incomplete".to_string()
        } else if confidence > self.weights.high_threshold {
            "strongly recommended".to_string()
        } else {
            format!("Continue from {}", display_name(current))
        };

        Recommendation {
            node_id: candidate.id.clone(),
            confidence,
            reason,
            required_data: candidate.required_inputs.clone(),
        }
    }
}

fn display_name(node: &WorkflowNode) -> &str {
    if node.name.is_empty() { &node.id } else { &node.name }
}
