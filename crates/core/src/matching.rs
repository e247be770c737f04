use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blood::BloodGroup;
use crate::entity::{NodeId, RequestId};

/// Outcome of routing one request to one supply node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub request_id: RequestId,
    pub chosen_node_id: NodeId,
    /// Sum of edge weights along `path`.
    pub path_cost: f64,
    /// Node ids from the request site to the chosen node, inclusive.
    pub path: Vec<NodeId>,
    /// 1-based position of the chosen node among the ranked candidates.
    pub rank: usize,
    pub candidates_considered: usize,
    pub blood_group_used: BloodGroup,
    pub quantity_units: u32,
    pub computed_at: DateTime<Utc>,
}

impl MatchResult {
    /// Idempotency key for downstream consumers.
    pub fn key(&self) -> MatchKey {
        MatchKey {
            request_id: self.request_id.clone(),
            computed_at: self.computed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchKey {
    pub request_id: RequestId,
    pub computed_at: DateTime<Utc>,
}

/// Why a request could not be matched this time round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMatchReason {
    NoCompatibleStock,
    UnknownLocation,
    SearchBudgetExhausted,
    InventoryContention,
}

impl NoMatchReason {
    pub fn code(self) -> &'static str {
        match self {
            NoMatchReason::NoCompatibleStock => "no_compatible_stock",
            NoMatchReason::UnknownLocation => "unknown_location",
            NoMatchReason::SearchBudgetExhausted => "search_budget_exhausted",
            NoMatchReason::InventoryContention => "inventory_contention",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            NoMatchReason::NoCompatibleStock => "no compatible stock within graph",
            NoMatchReason::UnknownLocation => "request location is not in the graph",
            NoMatchReason::SearchBudgetExhausted => "search budget exhausted before a match",
            NoMatchReason::InventoryContention => "stock taken by a concurrent allocation",
        }
    }
}

impl std::fmt::Display for NoMatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}
