use std::collections::{BTreeMap, HashMap};

use lifeline_core::{Availability, BloodGroup, NodeId, NodeKind};
use serde::Serialize;

use crate::error::GraphError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    pub availability: Availability,
    pub verified: bool,
    /// Units on hand per blood group. Absent groups hold zero units.
    pub stock: BTreeMap<BloodGroup, u32>,
}

impl LocationNode {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            availability: Availability::Available,
            verified: true,
            stock: BTreeMap::new(),
        }
    }

    pub fn with_stock(mut self, group: BloodGroup, units: u32) -> Self {
        self.stock.insert(group, units);
        self
    }

    pub fn with_availability(mut self, availability: Availability) -> Self {
        self.availability = availability;
        self
    }

    pub fn with_verified(mut self, verified: bool) -> Self {
        self.verified = verified;
        self
    }

    pub fn units(&self, group: BloodGroup) -> u32 {
        self.stock.get(&group).copied().unwrap_or(0)
    }
}

/// Half of an undirected edge as stored in the adjacency list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub target: NodeId,
    /// Travel cost; always finite and non-negative.
    pub weight: f64,
}

#[derive(Debug, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub nodes_by_kind: HashMap<String, usize>,
    pub units_by_group: BTreeMap<BloodGroup, u64>,
}

/// Weighted undirected graph of supply and request sites.
#[derive(Debug, Clone, Default)]
pub struct LocationGraph {
    pub nodes: HashMap<NodeId, LocationNode>,
    adjacency: HashMap<NodeId, Vec<Edge>>,
    edge_count: usize,
}

impl LocationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: LocationNode) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.adjacency.entry(node.id.clone()).or_default();
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Insert or replace a node, keeping its edges.
    pub fn upsert_node(&mut self, node: LocationNode) {
        self.adjacency.entry(node.id.clone()).or_default();
        self.nodes.insert(node.id.clone(), node);
    }

    /// Connect two existing nodes. A repeated pair keeps the cheaper weight.
    pub fn add_edge(&mut self, a: &str, b: &str, weight: f64) -> Result<(), GraphError> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(GraphError::InvalidWeight {
                from: a.to_string(),
                to: b.to_string(),
                weight,
            });
        }
        for id in [a, b] {
            if !self.nodes.contains_key(id) {
                return Err(GraphError::UnknownNode(id.to_string()));
            }
        }

        let existing = self
            .adjacency
            .get(a)
            .and_then(|edges| edges.iter().position(|e| e.target == b));
        if existing.is_some() {
            for (from, to) in [(a, b), (b, a)] {
                if let Some(edge) = self
                    .adjacency
                    .get_mut(from)
                    .and_then(|edges| edges.iter_mut().find(|e| e.target == to))
                {
                    edge.weight = edge.weight.min(weight);
                }
            }
            return Ok(());
        }

        self.adjacency.entry(a.to_string()).or_default().push(Edge {
            target: b.to_string(),
            weight,
        });
        if a != b {
            self.adjacency.entry(b.to_string()).or_default().push(Edge {
                target: a.to_string(),
                weight,
            });
        }
        self.edge_count += 1;
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&LocationNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Edges leaving `id`, in insertion order.
    pub fn neighbors(&self, id: &str) -> &[Edge] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn units_available(&self, id: &str, group: BloodGroup) -> u32 {
        self.nodes.get(id).map(|n| n.units(group)).unwrap_or(0)
    }

    pub fn set_stock(&mut self, id: &str, group: BloodGroup, units: u32) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))?;
        node.stock.insert(group, units);
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn stats(&self) -> GraphStats {
        let mut nodes_by_kind: HashMap<String, usize> = HashMap::new();
        let mut units_by_group: BTreeMap<BloodGroup, u64> = BTreeMap::new();
        for node in self.nodes.values() {
            *nodes_by_kind.entry(node.kind.to_string()).or_default() += 1;
            for (group, units) in &node.stock {
                *units_by_group.entry(*group).or_default() += u64::from(*units);
            }
        }

        GraphStats {
            node_count: self.nodes.len(),
            edge_count: self.edge_count,
            nodes_by_kind,
            units_by_group,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> LocationGraph {
        let mut g = LocationGraph::new();
        g.add_node(LocationNode::new("site", NodeKind::RequestSite)).unwrap();
        g.add_node(LocationNode::new("bank", NodeKind::BloodBank).with_stock(BloodGroup::OPos, 6))
            .unwrap();
        g.add_node(LocationNode::new("donor", NodeKind::Donor).with_stock(BloodGroup::APos, 1))
            .unwrap();
        g
    }

    #[test]
    fn edges_are_undirected() {
        let mut g = graph();
        g.add_edge("site", "bank", 2.5).unwrap();
        assert_eq!(g.neighbors("site"), &[Edge { target: "bank".into(), weight: 2.5 }]);
        assert_eq!(g.neighbors("bank"), &[Edge { target: "site".into(), weight: 2.5 }]);
        assert_eq!(g.edge_count(), 1);
    }

    #[test]
    fn repeated_edge_keeps_cheaper_weight() {
        let mut g = graph();
        g.add_edge("site", "bank", 4.0).unwrap();
        g.add_edge("bank", "site", 1.5).unwrap();
        g.add_edge("site", "bank", 3.0).unwrap();
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.neighbors("site")[0].weight, 1.5);
        assert_eq!(g.neighbors("bank")[0].weight, 1.5);
    }

    #[test]
    fn negative_and_nan_weights_rejected() {
        let mut g = graph();
        assert!(matches!(
            g.add_edge("site", "bank", -1.0),
            Err(GraphError::InvalidWeight { .. })
        ));
        assert!(g.add_edge("site", "bank", f64::NAN).is_err());
        assert!(g.add_edge("site", "bank", f64::INFINITY).is_err());
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn edge_to_unknown_node_rejected() {
        let mut g = graph();
        assert!(matches!(
            g.add_edge("site", "ghost", 1.0),
            Err(GraphError::UnknownNode(id)) if id == "ghost"
        ));
    }

    #[test]
    fn duplicate_node_rejected() {
        let mut g = graph();
        assert!(g.add_node(LocationNode::new("bank", NodeKind::BloodBank)).is_err());
    }

    #[test]
    fn stock_lookup_and_stats() {
        let mut g = graph();
        assert_eq!(g.units_available("bank", BloodGroup::OPos), 6);
        assert_eq!(g.units_available("bank", BloodGroup::ONeg), 0);
        assert_eq!(g.units_available("ghost", BloodGroup::OPos), 0);

        g.set_stock("donor", BloodGroup::APos, 2).unwrap();
        let stats = g.stats();
        assert_eq!(stats.node_count, 3);
        assert_eq!(stats.nodes_by_kind["BloodBank"], 1);
        assert_eq!(stats.units_by_group[&BloodGroup::APos], 2);
        assert_eq!(stats.units_by_group[&BloodGroup::OPos], 6);
    }
}
