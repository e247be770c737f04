use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Instant;

use lifeline_core::NodeId;
use lifeline_graph::{LocationGraph, LocationNode};

/// A priority queue entry for Dijkstra's algorithm.
///
/// Uses reversed ordering so `BinaryHeap` (a max-heap) behaves as a min-heap.
/// Equal distances pop in ascending node-id order.
#[derive(Debug, Clone)]
struct State {
    distance: f64,
    node: NodeId,
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for State {}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Path costs are compared at this many steps per unit of weight, so sums
/// like 0.1 + 0.2 and 0.3 rank as the same cost.
const COST_SCALE: f64 = 1e6;

/// Fixed-point key for comparing path costs.
pub fn cost_key(cost: f64) -> i64 {
    (cost * COST_SCALE).round() as i64
}

/// Order two path costs by their fixed-point keys.
pub fn cmp_cost(a: f64, b: f64) -> Ordering {
    cost_key(a).cmp(&cost_key(b))
}

/// Bounds on a single search.
#[derive(Debug, Clone, Copy)]
pub struct SearchLimits {
    /// Maximum number of settled nodes.
    pub max_visited: usize,
    pub deadline: Option<Instant>,
}

impl SearchLimits {
    pub fn unbounded() -> Self {
        Self {
            max_visited: usize::MAX,
            deadline: None,
        }
    }

    fn exceeded(&self, visited: usize) -> bool {
        visited >= self.max_visited || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// A settled node accepted by the search predicate.
#[derive(Debug, Clone)]
pub struct Reached<T> {
    pub node_id: NodeId,
    pub distance: f64,
    pub path: Vec<NodeId>,
    pub payload: T,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome<T> {
    /// Accepted nodes in settle order (non-decreasing distance).
    pub found: Vec<Reached<T>>,
    pub visited: usize,
    /// The search stopped on its limits rather than on its own.
    pub budget_exhausted: bool,
}

/// Dijkstra from `source`, stopping once `want` nodes have been accepted.
///
/// `accept` is evaluated as each node is settled, so constraints prune the
/// walk instead of being applied to full-graph distances afterwards. Nodes at
/// the same distance as the last accepted node (per [`cmp_cost`]) are still
/// settled so the caller can tie-break among them. Runs in O((V + E) log V).
///
/// Returns `None` if `source` is not in the graph.
pub fn nearest_where<T, F>(
    graph: &LocationGraph,
    source: &str,
    want: usize,
    limits: SearchLimits,
    mut accept: F,
) -> Option<SearchOutcome<T>>
where
    F: FnMut(&LocationNode) -> Option<T>,
{
    if !graph.contains(source) {
        return None;
    }

    let mut dist: HashMap<NodeId, f64> = HashMap::new();
    let mut prev: HashMap<NodeId, NodeId> = HashMap::new();
    let mut settled: HashSet<NodeId> = HashSet::new();
    let mut heap = BinaryHeap::new();
    let mut found: Vec<Reached<T>> = Vec::new();
    let mut budget_exhausted = false;

    dist.insert(source.to_string(), 0.0);
    heap.push(State {
        distance: 0.0,
        node: source.to_string(),
    });

    while let Some(State { distance, node }) = heap.pop() {
        // Skip stale entries and nodes already settled
        if settled.contains(&node) || distance > *dist.get(&node).unwrap_or(&f64::INFINITY) {
            continue;
        }

        if want > 0 && found.len() >= want {
            let last = found.last().map(|r| r.distance).unwrap_or(f64::INFINITY);
            if cmp_cost(distance, last) == Ordering::Greater {
                break;
            }
        }

        if limits.exceeded(settled.len()) {
            budget_exhausted = true;
            break;
        }
        settled.insert(node.clone());

        if let Some(payload) = graph.node(&node).and_then(&mut accept) {
            found.push(Reached {
                path: reconstruct_path(&prev, source, &node),
                node_id: node.clone(),
                distance,
                payload,
            });
        }

        for edge in graph.neighbors(&node) {
            if settled.contains(&edge.target) {
                continue;
            }
            let new_dist = distance + edge.weight;
            let current = *dist.get(&edge.target).unwrap_or(&f64::INFINITY);
            if new_dist < current {
                dist.insert(edge.target.clone(), new_dist);
                prev.insert(edge.target.clone(), node.clone());
                heap.push(State {
                    distance: new_dist,
                    node: edge.target.clone(),
                });
            }
        }
    }

    Some(SearchOutcome {
        found,
        visited: settled.len(),
        budget_exhausted,
    })
}

/// Compute the shortest path between two nodes.
///
/// Returns `Some((path, total_distance))`, or `None` if either node is
/// missing or `to` is unreachable from `from`.
pub fn shortest_path(graph: &LocationGraph, from: &str, to: &str) -> Option<(Vec<NodeId>, f64)> {
    if !graph.contains(to) {
        return None;
    }
    let outcome = nearest_where(graph, from, 1, SearchLimits::unbounded(), |node| {
        (node.id == to).then_some(())
    })?;
    outcome
        .found
        .into_iter()
        .next()
        .map(|reached| (reached.path, reached.distance))
}

/// Reconstruct the path from `from` to `to` by following predecessor links.
fn reconstruct_path(prev: &HashMap<NodeId, NodeId>, from: &str, to: &str) -> Vec<NodeId> {
    let mut path = vec![to.to_string()];
    let mut current = to;

    while current != from {
        match prev.get(current) {
            Some(p) => {
                path.push(p.clone());
                current = p;
            }
            None => break,
        }
    }

    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifeline_core::NodeKind;

    fn node(id: &str) -> LocationNode {
        LocationNode::new(id, NodeKind::Donor)
    }

    /// Build a simple linear graph: A - B - C
    fn build_linear_graph() -> LocationGraph {
        let mut g = LocationGraph::new();
        for id in ["a", "b", "c"] {
            g.add_node(node(id)).unwrap();
        }
        g.add_edge("a", "b", 1.0).unwrap();
        g.add_edge("b", "c", 1.0).unwrap();
        g
    }

    /// Diamond with a cheap detour:
    ///   A --(1)--> B --(1)--> D
    ///   A --(0.25)--> C --(0.25)--> D
    fn build_diamond_graph() -> LocationGraph {
        let mut g = LocationGraph::new();
        for id in ["a", "b", "c", "d"] {
            g.add_node(node(id)).unwrap();
        }
        g.add_edge("a", "b", 1.0).unwrap();
        g.add_edge("b", "d", 1.0).unwrap();
        g.add_edge("a", "c", 0.25).unwrap();
        g.add_edge("c", "d", 0.25).unwrap();
        g
    }

    #[test]
    fn shortest_path_linear() {
        let g = build_linear_graph();
        let (path, dist) = shortest_path(&g, "a", "c").expect("should find a path A -> B -> C");
        assert_eq!(path, vec!["a", "b", "c"]);
        assert!((dist - 2.0).abs() < 1e-9);
    }

    #[test]
    fn shortest_path_diamond_prefers_cheaper_detour() {
        let g = build_diamond_graph();
        let (path, dist) = shortest_path(&g, "a", "d").unwrap();
        assert_eq!(path, vec!["a", "c", "d"]);
        assert!((dist - 0.5).abs() < 1e-9);
    }

    #[test]
    fn shortest_path_same_node() {
        let g = build_linear_graph();
        let (path, dist) = shortest_path(&g, "a", "a").unwrap();
        assert_eq!(path, vec!["a"]);
        assert_eq!(dist, 0.0);
    }

    #[test]
    fn shortest_path_no_path() {
        let mut g = LocationGraph::new();
        g.add_node(node("a")).unwrap();
        g.add_node(node("b")).unwrap();
        assert!(shortest_path(&g, "a", "b").is_none(), "disconnected nodes should return None");
    }

    #[test]
    fn shortest_path_nonexistent_node() {
        let g = build_linear_graph();
        assert!(shortest_path(&g, "a", "zzz").is_none());
        assert!(shortest_path(&g, "zzz", "a").is_none());
    }

    #[test]
    fn nearest_where_collects_equal_cost_ties() {
        let mut g = LocationGraph::new();
        for id in ["s", "x", "y", "z"] {
            g.add_node(node(id)).unwrap();
        }
        g.add_edge("s", "y", 2.0).unwrap();
        g.add_edge("s", "x", 2.0).unwrap();
        g.add_edge("s", "z", 3.0).unwrap();

        let outcome = nearest_where(&g, "s", 1, SearchLimits::unbounded(), |n| {
            (n.id != "s").then_some(())
        })
        .unwrap();
        let ids: Vec<_> = outcome.found.iter().map(|r| r.node_id.as_str()).collect();
        // Both cost-2 nodes, in id order; the cost-3 node is never settled.
        assert_eq!(ids, vec!["x", "y"]);
        assert_eq!(outcome.visited, 3);
        assert!(!outcome.budget_exhausted);
    }

    #[test]
    fn nearest_where_stops_on_visit_budget() {
        let g = build_linear_graph();
        let limits = SearchLimits { max_visited: 2, deadline: None };
        let outcome = nearest_where(&g, "a", 1, limits, |n| (n.id == "c").then_some(())).unwrap();
        assert!(outcome.found.is_empty());
        assert!(outcome.budget_exhausted);
        assert_eq!(outcome.visited, 2);
    }

    #[test]
    fn nearest_where_stops_on_deadline() {
        let g = build_linear_graph();
        let limits = SearchLimits { max_visited: usize::MAX, deadline: Some(Instant::now()) };
        let outcome = nearest_where(&g, "a", 1, limits, |_| Some(())).unwrap();
        assert!(outcome.budget_exhausted);
        assert!(outcome.found.is_empty());
    }

    #[test]
    fn cost_comparison_absorbs_float_noise() {
        assert_eq!(cmp_cost(0.1 + 0.2, 0.3), Ordering::Equal);
        assert_eq!(cmp_cost(2.3, 2.31), Ordering::Less);
        assert_eq!(cost_key(4.0), 4_000_000);
    }

    #[test]
    fn equal_cost_nodes_settle_past_the_wanted_count() {
        let mut g = LocationGraph::new();
        for id in ["s", "x", "relay", "y"] {
            g.add_node(node(id)).unwrap();
        }
        g.add_edge("s", "x", 0.3).unwrap();
        g.add_edge("s", "relay", 0.1).unwrap();
        g.add_edge("relay", "y", 0.2).unwrap();
        let outcome = nearest_where(&g, "s", 1, SearchLimits::unbounded(), |n| {
            matches!(n.id.as_str(), "x" | "y").then_some(())
        })
        .unwrap();
        let ids: Vec<_> = outcome.found.iter().map(|r| r.node_id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"x") && ids.contains(&"y"));
    }

    #[test]
    fn zero_weight_edges_are_traversed() {
        let mut g = build_linear_graph();
        g.add_node(node("d")).unwrap();
        g.add_edge("c", "d", 0.0).unwrap();
        let (path, dist) = shortest_path(&g, "a", "d").unwrap();
        assert_eq!(path, vec!["a", "b", "c", "d"]);
        assert!((dist - 2.0).abs() < 1e-9);
    }
}
