//! Allocation cycle: pop, route, reserve, commit.
//!
//! A cycle runs in three phases so the coordination task can keep serving
//! commands while routes are searched:
//!
//! 1. [`begin_cycle`] pops up to N distinct requests (needs `&mut EngineState`).
//! 2. [`route_cycle`] ranks candidates in parallel against one graph snapshot
//!    and reserves units in priority order (no access to the state).
//! 3. [`commit_cycle`] re-checks every request. Cancelled ones have their
//!    reservation returned; the rest become `Processing` or go back into the
//!    queue with a reason code.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use lifeline_core::{LifelineError, MatchResult, NoMatchReason, Request, RequestId, RequestStatus};
use lifeline_graph::{Inventory, InventoryError, LocationGraph, Reservation};
use lifeline_router::{RankedCandidates, RoutingPool};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::events::EngineEvent;
use crate::state::{inventory_error, Allocation, EngineState};

/// Requests popped for one cycle and the graph they will be routed on.
pub struct CyclePlan {
    requests: Vec<Request>,
    graph: Arc<LocationGraph>,
    inventory: Arc<Inventory>,
    generation: u64,
    started: Instant,
}

impl CyclePlan {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn request_ids(&self) -> Vec<RequestId> {
        self.requests.iter().map(|r| r.id.clone()).collect()
    }
}

pub enum RouteOutcome {
    Reserved {
        ranked: RankedCandidates,
        /// Index of the candidate whose units were reserved.
        index: usize,
        reservation: Reservation,
    },
    NoMatch(NoMatchReason),
    Failed(LifelineError),
}

/// Routing results waiting to be committed.
pub struct RoutedCycle {
    outcomes: Vec<(Request, RouteOutcome)>,
    inventory: Arc<Inventory>,
    generation: u64,
    started: Instant,
    races: u64,
}

impl RoutedCycle {
    pub fn outcomes(&self) -> impl Iterator<Item = (&Request, &RouteOutcome)> {
        self.outcomes.iter().map(|(r, o)| (r, o))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmatchedRequest {
    pub request_id: RequestId,
    pub reason: NoMatchReason,
    pub description: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub attempted: usize,
    pub matched: Vec<MatchResult>,
    pub unmatched: Vec<UnmatchedRequest>,
    /// Matches dropped because the request left the queue mid-flight.
    pub discarded: Vec<RequestId>,
    /// Requests put back without a verdict (graph replaced, storage error).
    pub deferred: Vec<RequestId>,
    pub inventory_races: u64,
    pub duration_ms: u64,
}

/// Pop up to `max_attempts` distinct requests in priority order.
pub fn begin_cycle(state: &mut EngineState, now: DateTime<Utc>, max_attempts: usize) -> CyclePlan {
    let mut requests = Vec::new();
    while requests.len() < max_attempts.max(1) {
        match state.queue.pop_highest(now) {
            Ok(request) => requests.push(request),
            Err(_) => break,
        }
    }
    if !requests.is_empty() {
        state.mark_queue_dirty();
        debug!(popped = requests.len(), "cycle started");
    }
    let (graph, inventory) = state.routing_view();
    CyclePlan {
        requests,
        graph,
        inventory,
        generation: state.generation,
        started: Instant::now(),
    }
}

/// Rank every planned request and reserve units, best request first.
pub fn route_cycle(plan: CyclePlan, pool: &RoutingPool) -> RoutedCycle {
    let CyclePlan {
        requests,
        graph,
        inventory,
        generation,
        started,
    } = plan;
    let mut races = 0u64;

    let outcomes = match inventory.apply_to(&graph) {
        Ok(snapshot) => {
            let ranked = pool.rank_batch(&requests, &snapshot);
            requests
                .into_iter()
                .zip(ranked)
                .map(|(request, result)| {
                    let outcome = match result {
                        Ok(ranked) => {
                            allocate(&request, ranked, &graph, &inventory, pool, &mut races)
                        }
                        Err(LifelineError::NoMatchFound { reason, .. }) => {
                            RouteOutcome::NoMatch(reason)
                        }
                        Err(e) => RouteOutcome::Failed(e),
                    };
                    (request, outcome)
                })
                .collect()
        }
        Err(e) => {
            let e = inventory_error(e);
            requests
                .into_iter()
                .map(|request| (request, RouteOutcome::Failed(e.clone())))
                .collect()
        }
    };

    RoutedCycle {
        outcomes,
        inventory,
        generation,
        started,
        races,
    }
}

/// Reserve from the best candidate still holding stock. If every ranked
/// node was drained by an earlier reservation, re-route once on live levels.
fn allocate(
    request: &Request,
    ranked: RankedCandidates,
    graph: &LocationGraph,
    inventory: &Inventory,
    pool: &RoutingPool,
    races: &mut u64,
) -> RouteOutcome {
    match try_reserve(&ranked, inventory, races) {
        Ok(Some((index, reservation))) => {
            return RouteOutcome::Reserved {
                ranked,
                index,
                reservation,
            }
        }
        Ok(None) => {}
        Err(e) => return RouteOutcome::Failed(e),
    }

    debug!(request_id = %request.id, "all candidates drained, re-routing on live stock");
    let fresh = match inventory.apply_to(graph) {
        Ok(g) => g,
        Err(e) => return RouteOutcome::Failed(inventory_error(e)),
    };
    match pool.rank_one(request, &fresh) {
        Ok(ranked) => match try_reserve(&ranked, inventory, races) {
            Ok(Some((index, reservation))) => RouteOutcome::Reserved {
                ranked,
                index,
                reservation,
            },
            Ok(None) => RouteOutcome::NoMatch(NoMatchReason::InventoryContention),
            Err(e) => RouteOutcome::Failed(e),
        },
        Err(LifelineError::NoMatchFound { .. }) => {
            RouteOutcome::NoMatch(NoMatchReason::InventoryContention)
        }
        Err(e) => RouteOutcome::Failed(e),
    }
}

fn try_reserve(
    ranked: &RankedCandidates,
    inventory: &Inventory,
    races: &mut u64,
) -> Result<Option<(usize, Reservation)>, LifelineError> {
    for (index, candidate) in ranked.candidates.iter().enumerate() {
        match inventory.reserve(&candidate.node_id, candidate.blood_group, ranked.quantity_units) {
            Ok(reservation) => return Ok(Some((index, reservation))),
            Err(InventoryError::Insufficient { available, .. }) => {
                *races += 1;
                debug!(
                    request_id = %ranked.request_id,
                    node_id = %candidate.node_id,
                    blood_group = %candidate.blood_group,
                    requested = ranked.quantity_units,
                    available,
                    "inventory race, trying next candidate"
                );
            }
            Err(e) => return Err(inventory_error(e)),
        }
    }
    Ok(None)
}

/// Apply routing results to the state.
pub fn commit_cycle(
    state: &mut EngineState,
    routed: RoutedCycle,
    now: DateTime<Utc>,
) -> CycleReport {
    let RoutedCycle {
        outcomes,
        inventory,
        generation,
        started,
        races,
    } = routed;
    let mut report = CycleReport {
        attempted: outcomes.len(),
        inventory_races: races,
        ..CycleReport::default()
    };
    if outcomes.is_empty() {
        return report;
    }

    for (request, outcome) in outcomes {
        let id = request.id;
        match outcome {
            RouteOutcome::Reserved {
                ranked,
                index,
                reservation,
            } => {
                // Still ours only if active, Pending and not re-queued under the same id.
                let in_flight = state
                    .queue
                    .get(&id)
                    .is_some_and(|r| r.status == RequestStatus::Pending)
                    && !state.queue.is_queued(&id);
                if !in_flight {
                    if let Err(e) = inventory.release(reservation) {
                        warn!(request_id = %id, error = %e, "failed to return reserved units");
                    }
                    state.metrics.cancelled_in_flight += 1;
                    info!(request_id = %id, "match discarded, request left the queue mid-flight");
                    report.discarded.push(id);
                    continue;
                }
                if generation != state.generation {
                    // The ledger the units came from was replaced.
                    state.queue.requeue(&id, None);
                    info!(request_id = %id, "graph replaced mid-cycle, request re-queued");
                    report.deferred.push(id);
                    continue;
                }
                let Some(result) = ranked.to_match(index, now) else {
                    if let Err(e) = inventory.release(reservation) {
                        warn!(request_id = %id, error = %e, "failed to return reserved units");
                    }
                    state.queue.requeue(&id, None);
                    report.deferred.push(id);
                    continue;
                };
                match state.queue.update_status(&id, RequestStatus::Processing) {
                    Ok(_) => {
                        info!(
                            request_id = %id,
                            node_id = %result.chosen_node_id,
                            blood_group = %result.blood_group_used,
                            units = result.quantity_units,
                            path_cost = result.path_cost,
                            rank = result.rank,
                            "match committed"
                        );
                        state.allocations.insert(
                            id,
                            Allocation {
                                result: result.clone(),
                                reservation,
                                generation,
                            },
                        );
                        state.metrics.matches_committed += 1;
                        state.emit(EngineEvent::MatchComputed(result.clone()));
                        report.matched.push(result);
                    }
                    Err(e) => {
                        warn!(request_id = %id, error = %e, "commit failed, returning units");
                        if let Err(e) = inventory.release(reservation) {
                            warn!(request_id = %id, error = %e, "failed to return reserved units");
                        }
                        state.queue.requeue(&id, None);
                        report.deferred.push(id);
                    }
                }
            }
            RouteOutcome::NoMatch(reason) => {
                state.metrics.record_no_match(reason);
                if state.queue.requeue(&id, Some(reason)) {
                    info!(request_id = %id, reason = reason.code(), "no match, request re-queued");
                }
                report.unmatched.push(UnmatchedRequest {
                    request_id: id,
                    reason,
                    description: reason.description(),
                });
            }
            RouteOutcome::Failed(e) => {
                error!(request_id = %id, error = %e, "routing failed, request re-queued");
                state.queue.requeue(&id, None);
                report.deferred.push(id);
            }
        }
    }

    let elapsed = started.elapsed();
    report.duration_ms = elapsed.as_millis() as u64;
    state.metrics.requests_attempted += report.attempted as u64;
    state.metrics.inventory_races += races;
    state.metrics.record_cycle(elapsed, now);
    state.mark_queue_dirty();
    info!(
        attempted = report.attempted,
        matched = report.matched.len(),
        unmatched = report.unmatched.len(),
        discarded = report.discarded.len(),
        duration_ms = report.duration_ms,
        "cycle complete"
    );
    report
}

/// Put popped requests back after a routing phase that never reported.
pub fn abandon_cycle(state: &mut EngineState, request_ids: &[RequestId]) {
    for id in request_ids {
        state.queue.requeue(id, None);
    }
    state.mark_queue_dirty();
}

/// One full cycle on the calling thread.
pub fn run_cycle(
    state: &mut EngineState,
    pool: &RoutingPool,
    now: DateTime<Utc>,
    max_attempts: usize,
) -> CycleReport {
    let plan = begin_cycle(state, now, max_attempts);
    if plan.is_empty() {
        return CycleReport::default();
    }
    let routed = route_cycle(plan, pool);
    commit_cycle(state, routed, now)
}
