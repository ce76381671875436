//! Append-only interaction graph.
//!
//! Nodes live in an arena (`Vec`) indexed by id; edges are a separate list of
//! id pairs. Feedback refers back to its interaction by id only, so there is
//! no ownership between nodes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::advisor::Suggestion;
use crate::topics::{Topic, TopicSet};

pub type NodeId = String;

pub fn tool_node_id(tool: Action) -> NodeId {
    format!("tool:{}", tool.as_str())
}

pub fn topic_node_id(topic: Topic) -> NodeId {
    format!("topic:{}", topic.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Interaction,
    Feedback,
    Topic,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// tool → interaction
    Produced,
    /// interaction → feedback, weighted by reward
    Rated,
    /// interaction → topic
    Discusses,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub timestamp: f64,
    pub user_input: String,
    pub agent_response: String,
    /// Action identifier exactly as reported by the reasoning engine.
    pub action: String,
    pub topics: TopicSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_trace: Option<String>,
    /// Advisor output at record time. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<Suggestion>,
}

impl Interaction {
    /// The RL action for this interaction, fixed at creation.
    pub fn rl_action(&self) -> Action {
        Action::resolve(&self.action)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub interaction_id: NodeId,
    pub rating: u8,
    #[serde(default)]
    pub tags: Vec<String>,
    pub reward: f32,
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum NodePayload {
    Interaction(Interaction),
    Feedback(Feedback),
    Topic { label: Topic },
    Tool { tool: Action },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub payload: NodePayload,
}

impl GraphNode {
    pub fn kind(&self) -> NodeKind {
        match self.payload {
            NodePayload::Interaction(_) => NodeKind::Interaction,
            NodePayload::Feedback(_) => NodeKind::Feedback,
            NodePayload::Topic { .. } => NodeKind::Topic,
            NodePayload::Tool { .. } => NodeKind::Tool,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
    pub weight: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "GraphParts", into = "GraphParts")]
pub struct InteractionGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,

    // Derived; rebuilt on load.
    index: HashMap<NodeId, usize>,
    feedback_by_interaction: HashMap<NodeId, Vec<usize>>,
}

/// On-disk form: only the append-only lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GraphParts {
    #[serde(default)]
    nodes: Vec<GraphNode>,
    #[serde(default)]
    edges: Vec<GraphEdge>,
}

impl From<GraphParts> for InteractionGraph {
    fn from(parts: GraphParts) -> Self {
        let mut g = InteractionGraph::new();
        for node in parts.nodes {
            g.insert_node(node);
        }
        for edge in parts.edges {
            g.insert_edge(edge);
        }
        g
    }
}

impl From<InteractionGraph> for GraphParts {
    fn from(g: InteractionGraph) -> Self {
        Self {
            nodes: g.nodes,
            edges: g.edges,
        }
    }
}

impl InteractionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node. Returns `false` (and inserts nothing) if the id is taken.
    pub fn insert_node(&mut self, node: GraphNode) -> bool {
        if self.index.contains_key(&node.id) {
            return false;
        }
        let idx = self.nodes.len();
        if let NodePayload::Feedback(fb) = &node.payload {
            self.feedback_by_interaction
                .entry(fb.interaction_id.clone())
                .or_default()
                .push(idx);
        }
        self.index.insert(node.id.clone(), idx);
        self.nodes.push(node);
        true
    }

    /// Insert a node unless one with the same id exists.
    pub fn ensure_node(&mut self, id: NodeId, payload: impl FnOnce() -> NodePayload) {
        if !self.index.contains_key(&id) {
            self.insert_node(GraphNode {
                id,
                payload: payload(),
            });
        }
    }

    /// Append an edge. Both endpoints must already exist.
    pub fn insert_edge(&mut self, edge: GraphEdge) -> bool {
        if !self.contains(&edge.source) || !self.contains(&edge.target) {
            return false;
        }
        self.edges.push(edge);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn interaction(&self, id: &str) -> Option<&Interaction> {
        match self.node(id).map(|n| &n.payload) {
            Some(NodePayload::Interaction(i)) => Some(i),
            _ => None,
        }
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn interactions(&self) -> impl Iterator<Item = (&NodeId, &Interaction)> {
        self.nodes.iter().filter_map(|n| match &n.payload {
            NodePayload::Interaction(i) => Some((&n.id, i)),
            _ => None,
        })
    }

    /// All feedback in insertion order.
    pub fn feedback(&self) -> impl Iterator<Item = (&NodeId, &Feedback)> {
        self.nodes.iter().filter_map(|n| match &n.payload {
            NodePayload::Feedback(f) => Some((&n.id, f)),
            _ => None,
        })
    }

    /// Feedback for one interaction, oldest first.
    pub fn feedback_for(&self, interaction_id: &str) -> impl Iterator<Item = &Feedback> {
        self.feedback_by_interaction
            .get(interaction_id)
            .into_iter()
            .flatten()
            .filter_map(|&i| match &self.nodes[i].payload {
                NodePayload::Feedback(f) => Some(f),
                _ => None,
            })
    }

    pub fn latest_feedback(&self, interaction_id: &str) -> Option<&Feedback> {
        self.feedback_for(interaction_id).last()
    }

    pub fn count(&self, kind: NodeKind) -> usize {
        self.nodes.iter().filter(|n| n.kind() == kind).count()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interaction(action: &str) -> NodePayload {
        NodePayload::Interaction(Interaction {
            timestamp: 1.0,
            user_input: "q".to_string(),
            agent_response: "a".to_string(),
            action: action.to_string(),
            topics: TopicSet::from([Topic::General]),
            reasoning_trace: None,
            suggestion: None,
        })
    }

    fn feedback(iid: &str, rating: u8) -> NodePayload {
        NodePayload::Feedback(Feedback {
            interaction_id: iid.to_string(),
            rating,
            tags: Vec::new(),
            reward: 0.0,
            timestamp: 2.0,
        })
    }

    #[test]
    fn node_ids_are_never_reused() {
        let mut g = InteractionGraph::new();
        assert!(g.insert_node(GraphNode {
            id: "a".to_string(),
            payload: interaction("general"),
        }));
        assert!(!g.insert_node(GraphNode {
            id: "a".to_string(),
            payload: interaction("general"),
        }));
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn edges_require_existing_endpoints() {
        let mut g = InteractionGraph::new();
        g.ensure_node("a".to_string(), || interaction("general"));
        let ok = g.insert_edge(GraphEdge {
            source: "a".to_string(),
            target: "missing".to_string(),
            kind: EdgeKind::Rated,
            weight: 1.0,
        });
        assert!(!ok);
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn latest_feedback_tracks_insertion_order() {
        let mut g = InteractionGraph::new();
        g.ensure_node("i".to_string(), || interaction("general"));
        g.insert_node(GraphNode {
            id: "f1".to_string(),
            payload: feedback("i", 2),
        });
        g.insert_node(GraphNode {
            id: "f2".to_string(),
            payload: feedback("i", 5),
        });
        assert_eq!(g.feedback_for("i").count(), 2);
        assert_eq!(g.latest_feedback("i").map(|f| f.rating), Some(5));
        assert!(g.latest_feedback("other").is_none());
    }

    #[test]
    fn serde_roundtrip_rebuilds_indexes() {
        let mut g = InteractionGraph::new();
        g.ensure_node("i".to_string(), || interaction("mortgage_calculator"));
        g.ensure_node(tool_node_id(Action::MortgageCalculator), || NodePayload::Tool {
            tool: Action::MortgageCalculator,
        });
        g.insert_edge(GraphEdge {
            source: tool_node_id(Action::MortgageCalculator),
            target: "i".to_string(),
            kind: EdgeKind::Produced,
            weight: 1.0,
        });
        g.insert_node(GraphNode {
            id: "f".to_string(),
            payload: feedback("i", 4),
        });

        let json = serde_json::to_string(&g).unwrap();
        let back: InteractionGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back.nodes(), g.nodes());
        assert_eq!(back.edges(), g.edges());
        assert_eq!(back.latest_feedback("i").map(|f| f.rating), Some(4));
        assert_eq!(
            back.interaction("i").map(|i| i.rl_action()),
            Some(Action::MortgageCalculator)
        );
    }
}
