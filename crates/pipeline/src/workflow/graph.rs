//! Static node-dependency graph
//!
//! Loaded once at startup and shared read-only behind an `Arc`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::types::{Channel, NodeType, WorkflowNode};
use crate::error::StageError;

#[derive(Debug, Deserialize, Serialize)]
struct GraphFile {
    nodes: Vec<WorkflowNode>,
}

/// Immutable set of pipeline nodes in declaration order
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    nodes: Vec<WorkflowNode>,
    index: HashMap<String, usize>,
}

impl WorkflowGraph {
    /// Build a graph, rejecting duplicate ids, dangling references and
    /// dependency cycles
    pub fn new(nodes: Vec<WorkflowNode>) -> Result<Self, StageError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if node.id.trim().is_empty() {
                return Err(StageError::Config(format!("Node at position {} has an empty id", i)));
            }
            if index.insert(node.id.clone(), i).is_some() {
                return Err(StageError::Config(format!("Duplicate node id: {}", node.id)));
            }
        }

        for node in &nodes {
            for dep in &node.dependencies {
                if !index.contains_key(dep) {
                    return Err(StageError::Config(format!(
                        "Node '{}' depends on unknown node '{}'",
                        node.id, dep
                    )));
                }
            }
            for next in &node.next_steps {
                if !index.contains_key(next) {
                    return Err(StageError::Config(format!(
                        "Node '{}' points to unknown next step '{}'",
                        node.id, next
                    )));
                }
            }
        }

        let graph = Self { nodes, index };
        graph.check_acyclic()?;
        Ok(graph)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, StageError> {
        let file: GraphFile = toml::from_str(content)
            .map_err(|e| StageError::Config(format!("Invalid graph definition: {}", e)))?;
        Self::new(file.nodes)
    }

    pub fn from_file(path: &Path) -> Result<Self, StageError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StageError::Config(format!("Failed to read graph file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from `path` when given, otherwise the built-in pipeline
    pub fn load(path: Option<&Path>) -> Result<Self, StageError> {
        match path {
            Some(path) => {
                tracing::info!("[GRAPH] Loading node graph from {}", path.display());
                Self::from_file(path)
            }
            None => Ok(Self::default_pipeline()),
        }
    }

    /// search → package → strategize → draft → publish
    pub fn default_pipeline() -> Self {
        let node = |id: &str,
                    node_type: NodeType,
                    name: &str,
                    dependencies: &[&str],
                    required_inputs: &[&str],
                    next_steps: &[&str],
                    channel: Channel| WorkflowNode {
            id: id.to_string(),
            node_type,
            name: name.to_string(),
            dependencies: dependencies.iter().map(|s| s.to_string()).collect(),
            required_inputs: required_inputs.iter().map(|s| s.to_string()).collect(),
            next_steps: next_steps.iter().map(|s| s.to_string()).collect(),
            channel,
            endpoint: format!("{}-stage", id),
        };

        let nodes = vec![
            node(
                "search",
                NodeType::Search,
                "Topic Search",
                &[],
                &["query"],
                &["package"],
                Channel::Chat,
            ),
            node(
                "package",
                NodeType::Package,
                "Material Packaging",
                &["search"],
                &["topic"],
                &["strategize"],
                Channel::Workflow,
            ),
            node(
                "strategize",
                NodeType::Strategize,
                "Content Strategy",
                &["package"],
                &["audience"],
                &["draft"],
                Channel::Workflow,
            ),
            node(
                "draft",
                NodeType::Draft,
                "Drafting",
                &["package", "strategize"],
                &["tone"],
                &["publish"],
                Channel::Workflow,
            ),
            node(
                "publish",
                NodeType::Publish,
                "Publishing",
                &["draft"],
                &["platform"],
                &[],
                Channel::Chat,
            ),
        ];

        // The built-in definition is known to be consistent
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        Self { nodes, index }
    }

    pub fn get(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.index.get(node_id).map(|&i| &self.nodes[i])
    }

    pub fn nodes(&self) -> &[WorkflowNode] {
        &self.nodes
    }

    /// Nodes without dependencies, in declaration order
    pub fn entry_nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.nodes.iter().filter(|n| n.dependencies.is_empty())
    }

    fn check_acyclic(&self) -> Result<(), StageError> {
        fn visit<'a>(
            graph: &'a WorkflowGraph,
            id: &'a str,
            visiting: &mut HashSet<&'a str>,
            done: &mut HashSet<&'a str>,
        ) -> Result<(), StageError> {
            if done.contains(id) {
                return Ok(());
            }
            if !visiting.insert(id) {
                return Err(StageError::Config(format!(
                    "Dependency cycle detected at node '{}'",
                    id
                )));
            }
            if let Some(node) = graph.get(id) {
                for dep in &node.dependencies {
                    visit(graph, dep, visiting, done)?;
                }
            }
            visiting.remove(id);
            done.insert(id);
            Ok(())
        }

        let mut visiting = HashSet::new();
        let mut done = HashSet::new();
        for node in &self.nodes {
            visit(self, &node.id, &mut visiting, &mut done)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pipeline_is_valid() {
        let graph = WorkflowGraph::default_pipeline();
        let rebuilt = WorkflowGraph::new(graph.nodes().to_vec()).unwrap();

        let ids: Vec<_> = rebuilt.nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["search", "package", "strategize", "draft", "publish"]);
        assert_eq!(rebuilt.get("draft").unwrap().dependencies, vec!["package", "strategize"]);

        let entries: Vec<_> = rebuilt.entry_nodes().map(|n| n.id.as_str()).collect();
        assert_eq!(entries, vec!["search"]);
    }

    #[test]
    fn test_load_from_toml() {
        let graph = WorkflowGraph::from_toml_str(
            r#"
            [[nodes]]
            id = "a"
            type = "search"
            requiredInputs = ["query"]
            nextSteps = ["b"]
            channel = "chat"
            endpoint = "bot-a"

            [[nodes]]
            id = "b"
            type = "draft"
            dependencies = ["a"]
            channel = "workflow"
            endpoint = "wf-b"
            "#,
        )
        .unwrap();

        assert_eq!(graph.nodes().len(), 2);
        let b = graph.get("b").unwrap();
        assert_eq!(b.channel, Channel::Workflow);
        assert_eq!(b.dependencies, vec!["a"]);
        assert!(b.required_inputs.is_empty());
    }

    #[test]
    fn test_rejects_unknown_dependency() {
        let mut nodes = WorkflowGraph::default_pipeline().nodes().to_vec();
        nodes[1].dependencies.push("ghost".to_string());
        let err = WorkflowGraph::new(nodes).unwrap_err();
        assert!(matches!(err, StageError::Config(msg) if msg.contains("ghost")));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let mut nodes = WorkflowGraph::default_pipeline().nodes().to_vec();
        nodes.push(nodes[0].clone());
        assert!(WorkflowGraph::new(nodes).is_err());
    }

    #[test]
    fn test_rejects_cycles() {
        let mut nodes = WorkflowGraph::default_pipeline().nodes().to_vec();
        // search now waits on publish, which transitively waits on search
        nodes[0].dependencies.push("publish".to_string());
        let err = WorkflowGraph::new(nodes).unwrap_err();
        assert!(matches!(err, StageError::Config(msg) if msg.contains("cycle")));
    }
}
