//! Allocation routing: bounded Dijkstra over the location graph with
//! blood-group compatibility applied as each node is settled.

pub mod error;
pub mod matcher;
pub mod pool;
pub mod shortest_path;

pub use error::RouterError;
pub use matcher::{
    draw_group, find_best_match, find_candidates, rank_candidates, Candidate, MatchPolicy,
    RankedCandidates, SupplyQuery,
};
pub use pool::RoutingPool;
pub use shortest_path::{
    cmp_cost, cost_key, nearest_where, shortest_path, SearchLimits, SearchOutcome,
};
