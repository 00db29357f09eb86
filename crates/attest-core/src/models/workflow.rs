//! Workflow model — a named directed graph of audit procedure steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::graph::{Edge, WorkflowGraph};

/// One step declaration. The id is the graph node; title/instructions feed
/// the copilot's draft prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl StepNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            instructions: None,
        }
    }

    pub fn with_instructions(id: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            instructions: Some(instructions.into()),
        }
    }
}

/// A stored workflow: step declarations plus directed edges between them.
///
/// Node/edge lists are the persisted inputs the scheduler rebuilds its
/// graph from on every request — there is no cached graph instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Step declarations; ids unique within the workflow.
    pub nodes: Vec<StepNode>,
    pub edges: Vec<Edge>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, slug: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            name: name.into(),
            slug: slug.into(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    pub fn node(&self, id: &str) -> Option<&StepNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Build a fresh scheduling graph from the persisted node/edge lists.
    pub fn graph(&self) -> WorkflowGraph {
        WorkflowGraph::new(self.node_ids(), self.edges.clone())
    }
}
