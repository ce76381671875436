use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::{GraphEdge, GraphNode};
use crate::metrics::{PerformanceSnapshot, TopicStats};
use crate::topics::Topic;

/// Point-in-time view of the whole loop for dashboards.
///
/// Maps are ordered, so serializing the same snapshot twice yields the same
/// bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub performance: PerformanceSnapshot,
    pub topics: BTreeMap<Topic, TopicStats>,
    /// `None` until the first successful training run.
    pub policy_version: Option<u64>,
}

impl GraphExport {
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
