//! Node-type specific payload builders
//!
//! Each stage receives the caller's inputs plus the outputs of its completed
//! dependencies, keyed by what the upstream stage produced.

use serde_json::{Value, json};

use super::types::{NodeType, StageInputs, StageOutput, WorkflowNode};
use crate::gateway::StagePayload;

/// Parameter key under which an upstream stage's output is passed downstream
fn upstream_key(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Search => "materials",
        NodeType::Package => "package",
        NodeType::Strategize => "strategy",
        NodeType::Draft => "draft",
        NodeType::Publish => "publication",
    }
}

fn input_or(inputs: &StageInputs, key: &str, default: Value) -> Value {
    inputs
        .get(key)
        .filter(|v| !v.is_null())
        .cloned()
        .unwrap_or(default)
}

/// Build the request for `node` from caller inputs and upstream outputs.
///
/// `upstream` holds the dependencies of `node` that have an output in the
/// session, in dependency declaration order.
pub fn build_payload(
    node: &WorkflowNode,
    session_id: &str,
    inputs: &StageInputs,
    upstream: &[(&WorkflowNode, &StageOutput)],
) -> StagePayload {
    let mut parameters = match node.node_type {
        NodeType::Search => json!({
            "query": input_or(inputs, "query", Value::Null),
            "sources": input_or(inputs, "sources", json!(["web"])),
            "limit": input_or(inputs, "limit", json!(10)),
        }),
        NodeType::Package => json!({
            "topic": input_or(inputs, "topic", Value::Null),
            "angle": input_or(inputs, "angle", Value::Null),
        }),
        NodeType::Strategize => json!({
            "audience": input_or(inputs, "audience", Value::Null),
            "goals": input_or(inputs, "goals", json!([])),
        }),
        NodeType::Draft => json!({
            "tone": input_or(inputs, "tone", Value::Null),
            "length": input_or(inputs, "length", json!("medium")),
        }),
        NodeType::Publish => json!({
            "platform": input_or(inputs, "platform", Value::Null),
            "schedule": input_or(inputs, "schedule", Value::Null),
        }),
    };

    if let Value::Object(ref mut map) = parameters {
        // Caller inputs the builder does not shape are passed through untouched
        for (key, value) in inputs {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
        for (dep, output) in upstream {
            map.insert(upstream_key(dep.node_type).to_string(), output.data.clone());
        }
    }

    StagePayload {
        endpoint: node.endpoint.clone(),
        session_id: session_id.to_string(),
        node_id: node.id.clone(),
        node_type: node.node_type,
        parameters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowGraph;
    use chrono::Utc;

    fn inputs(value: Value) -> StageInputs {
        value.as_object().cloned().unwrap()
    }

    fn output(node_id: &str, data: Value) -> StageOutput {
        StageOutput {
            node_id: node_id.to_string(),
            data,
            attempts: 1,
            elapsed_ms: 5,
            produced_at: Utc::now(),
        }
    }

    #[test]
    fn test_search_payload_applies_defaults() {
        let graph = WorkflowGraph::default_pipeline();
        let node = graph.get("search").unwrap();

        let payload = build_payload(node, "s1", &inputs(json!({"query": "rust async"})), &[]);

        assert_eq!(payload.endpoint, "search-stage");
        assert_eq!(payload.node_type, NodeType::Search);
        assert_eq!(payload.parameters["query"], "rust async");
        assert_eq!(payload.parameters["sources"], json!(["web"]));
        assert_eq!(payload.parameters["limit"], 10);
    }

    #[test]
    fn test_draft_payload_carries_upstream_outputs() {
        let graph = WorkflowGraph::default_pipeline();
        let draft = graph.get("draft").unwrap();
        let package = graph.get("package").unwrap();
        let strategize = graph.get("strategize").unwrap();
        let package_out = output("package", json!({"outline": ["intro", "body"]}));
        let strategy_out = output("strategize", json!("lead with the benchmark"));

        let payload = build_payload(
            draft,
            "s1",
            &inputs(json!({"tone": "playful", "keywords": ["tokio"]})),
            &[(package, &package_out), (strategize, &strategy_out)],
        );

        assert_eq!(payload.parameters["tone"], "playful");
        assert_eq!(payload.parameters["length"], "medium");
        assert_eq!(payload.parameters["keywords"], json!(["tokio"]));
        assert_eq!(payload.parameters["package"]["outline"][1], "body");
        assert_eq!(payload.parameters["strategy"], "lead with the benchmark");
    }
}
