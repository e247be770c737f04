//! Serializable description of a location graph.
//!
//! The inventory / location collaborator pushes whole snapshots in this
//! shape (JSON over HTTP, YAML or JSON seed files on disk). Validation happens
//! in [`GraphSpec::into_graph`], so a malformed snapshot never replaces a good one.

use std::collections::BTreeMap;
use std::path::Path;

use lifeline_core::{Availability, BloodGroup, NodeId, NodeKind};
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::store::{LocationGraph, LocationNode};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphSpec {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSpec {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_availability")]
    pub availability: Availability,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub stock: BTreeMap<BloodGroup, u32>,
}

fn default_availability() -> Availability {
    Availability::Available
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeSpec {
    pub from: NodeId,
    pub to: NodeId,
    pub weight: f64,
}

impl GraphSpec {
    pub fn from_yaml_str(s: &str) -> Result<Self, GraphError> {
        serde_yaml::from_str(s).map_err(|e| GraphError::Parse(e.to_string()))
    }

    pub fn from_json_str(s: &str) -> Result<Self, GraphError> {
        serde_json::from_str(s).map_err(|e| GraphError::Parse(e.to_string()))
    }

    /// Load a snapshot file; `.json` is parsed as JSON, anything else as YAML.
    pub fn from_file(path: &Path) -> Result<Self, GraphError> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn into_graph(self) -> Result<LocationGraph, GraphError> {
        let mut graph = LocationGraph::new();
        for spec in self.nodes {
            let node = LocationNode {
                name: spec.name.unwrap_or_else(|| spec.id.clone()),
                id: spec.id,
                kind: spec.kind,
                availability: spec.availability,
                verified: spec.verified,
                stock: spec.stock,
            };
            graph.add_node(node)?;
        }
        for edge in &self.edges {
            graph.add_edge(&edge.from, &edge.to, edge.weight)?;
        }
        tracing::debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "graph snapshot validated"
        );
        Ok(graph)
    }
}
