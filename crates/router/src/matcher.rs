//! Nearest compatible supply for a request.
//!
//! A candidate is a settled node that can hand over the full quantity in one
//! blood group the recipient accepts. Candidates are ranked by
//! (path cost, availability, node kind, node id) so repeated runs over the
//! same graph always pick the same node.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lifeline_core::config::RoutingConfig;
use lifeline_core::{
    Availability, BloodGroup, LifelineError, MatchMode, MatchResult, NoMatchReason, NodeId,
    NodeKind, Request, RequestId,
};
use lifeline_graph::{LocationGraph, LocationNode};
use serde::Serialize;
use tracing::debug;

use crate::shortest_path::{cmp_cost, nearest_where, SearchLimits};

/// Routing knobs taken from [`RoutingConfig`].
#[derive(Debug, Clone)]
pub struct MatchPolicy {
    pub mode: MatchMode,
    pub require_verified: bool,
    pub max_visited: usize,
    pub timeout: Duration,
    pub max_candidates: usize,
}

impl From<&RoutingConfig> for MatchPolicy {
    fn from(config: &RoutingConfig) -> Self {
        Self {
            mode: config.match_mode,
            require_verified: config.require_verified_nodes,
            max_visited: config.max_visited_nodes,
            timeout: Duration::from_millis(config.search_timeout_ms),
            max_candidates: config.max_candidates.max(1),
        }
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self::from(&RoutingConfig::default())
    }
}

impl MatchPolicy {
    fn limits(&self) -> SearchLimits {
        SearchLimits {
            max_visited: self.max_visited,
            deadline: Instant::now().checked_add(self.timeout),
        }
    }

    fn can_supply_from(&self, node: &LocationNode) -> bool {
        node.kind != NodeKind::RequestSite
            && node.availability.can_supply()
            && (node.verified || !self.require_verified)
    }
}

/// What a search needs to know about the request.
#[derive(Debug, Clone, Copy)]
pub struct SupplyQuery<'a> {
    pub blood_group: BloodGroup,
    pub quantity_units: u32,
    pub location_node_id: &'a str,
}

impl<'a> From<&'a Request> for SupplyQuery<'a> {
    fn from(request: &'a Request) -> Self {
        Self {
            blood_group: request.blood_group,
            quantity_units: request.quantity_units,
            location_node_id: &request.location_node_id,
        }
    }
}

/// A node able to cover the request, with the route to reach it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub node_id: NodeId,
    pub kind: NodeKind,
    pub availability: Availability,
    pub path_cost: f64,
    pub path: Vec<NodeId>,
    /// Group that would be drawn from this node.
    pub blood_group: BloodGroup,
    /// Units of that group on hand when the search ran.
    pub units_available: u32,
}

impl Candidate {
    fn rank_cmp(&self, other: &Self) -> Ordering {
        cmp_cost(self.path_cost, other.path_cost)
            .then_with(|| {
                self.availability
                    .preference()
                    .cmp(&other.availability.preference())
            })
            .then_with(|| {
                self.kind
                    .supply_preference()
                    .cmp(&other.kind.supply_preference())
            })
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

/// Ranked candidates for one request.
#[derive(Debug, Clone)]
pub struct RankedCandidates {
    pub request_id: RequestId,
    pub quantity_units: u32,
    /// Best first. Never empty.
    pub candidates: Vec<Candidate>,
    pub visited: usize,
}

impl RankedCandidates {
    /// Build the match for the candidate at `index` (0-based).
    pub fn to_match(&self, index: usize, computed_at: DateTime<Utc>) -> Option<MatchResult> {
        let candidate = self.candidates.get(index)?;
        Some(MatchResult {
            request_id: self.request_id.clone(),
            chosen_node_id: candidate.node_id.clone(),
            path_cost: candidate.path_cost,
            path: candidate.path.clone(),
            rank: index + 1,
            candidates_considered: self.candidates.len(),
            blood_group_used: candidate.blood_group,
            quantity_units: self.quantity_units,
            computed_at,
        })
    }
}

/// Group to draw from `node` for `recipient`, if any covers `quantity` alone.
///
/// The recipient's own group wins when it has enough units. Otherwise the
/// compatible group with the most units is used, ties going to the earlier
/// group in `BloodGroup::ALL`. Units are never split across groups.
pub fn draw_group(
    node: &LocationNode,
    recipient: BloodGroup,
    quantity: u32,
    mode: MatchMode,
) -> Option<(BloodGroup, u32)> {
    let own = node.units(recipient);
    if own >= quantity && recipient.accepts_from(recipient, mode) {
        return Some((recipient, own));
    }

    let mut best: Option<(BloodGroup, u32)> = None;
    for donor in recipient.donors_for(mode) {
        let units = node.units(donor);
        if units < quantity {
            continue;
        }
        match best {
            Some((_, best_units)) if best_units >= units => {}
            _ => best = Some((donor, units)),
        }
    }
    best
}

/// Search outward from the query location and collect up to `limit`
/// candidates, best first.
pub fn find_candidates(
    query: SupplyQuery<'_>,
    graph: &LocationGraph,
    policy: &MatchPolicy,
    limit: usize,
) -> Result<(Vec<Candidate>, usize), NoMatchReason> {
    let want = limit.max(1);
    let outcome = nearest_where(graph, query.location_node_id, want, policy.limits(), |node| {
        if !policy.can_supply_from(node) {
            return None;
        }
        draw_group(node, query.blood_group, query.quantity_units, policy.mode)
            .map(|drawn| (node.kind, node.availability, drawn))
    })
    .ok_or(NoMatchReason::UnknownLocation)?;

    let mut candidates: Vec<Candidate> = outcome
        .found
        .into_iter()
        .map(|reached| {
            let (kind, availability, (blood_group, units_available)) = reached.payload;
            Candidate {
                node_id: reached.node_id,
                kind,
                availability,
                path_cost: reached.distance,
                path: reached.path,
                blood_group,
                units_available,
            }
        })
        .collect();
    candidates.sort_by(Candidate::rank_cmp);
    candidates.truncate(want);

    if candidates.is_empty() {
        return Err(if outcome.budget_exhausted {
            NoMatchReason::SearchBudgetExhausted
        } else {
            NoMatchReason::NoCompatibleStock
        });
    }
    Ok((candidates, outcome.visited))
}

/// Ranked candidates for `request`, or the reason there are none.
pub fn rank_candidates(
    request: &Request,
    graph: &LocationGraph,
    policy: &MatchPolicy,
) -> Result<RankedCandidates, LifelineError> {
    let started = Instant::now();
    let result = find_candidates(SupplyQuery::from(request), graph, policy, policy.max_candidates);
    match result {
        Ok((candidates, visited)) => {
            debug!(
                request_id = %request.id,
                candidates = candidates.len(),
                visited,
                elapsed_us = started.elapsed().as_micros() as u64,
                "candidates ranked"
            );
            Ok(RankedCandidates {
                request_id: request.id.clone(),
                quantity_units: request.quantity_units,
                candidates,
                visited,
            })
        }
        Err(reason) => {
            debug!(request_id = %request.id, %reason, "no candidates");
            Err(LifelineError::NoMatchFound {
                request_id: request.id.clone(),
                reason,
            })
        }
    }
}

/// Best supply node for `request` against `graph`.
pub fn find_best_match(
    request: &Request,
    graph: &LocationGraph,
    policy: &MatchPolicy,
    now: DateTime<Utc>,
) -> Result<MatchResult, LifelineError> {
    let ranked = rank_candidates(request, graph, policy)?;
    ranked.to_match(0, now).ok_or_else(|| LifelineError::NoMatchFound {
        request_id: request.id.clone(),
        reason: NoMatchReason::NoCompatibleStock,
    })
}
