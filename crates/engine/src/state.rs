//! Everything the engine owns, behind one `&mut` borrow.
//!
//! `EngineState` is plain data driven by the coordination task; nothing here
//! locks or awaits. Mutations queue events in an outbox which the owner drains
//! with [`EngineState::take_events`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lifeline_core::config::EngineConfig;
use lifeline_core::{
    BloodGroup, LifelineError, MatchResult, NoMatchReason, NodeId, OverrideInput, Request,
    RequestId, RequestInput, RequestStatus, Result, MAX_QUANTITY_UNITS, MIN_QUANTITY_UNITS,
};
use lifeline_graph::{GraphStats, Inventory, InventoryError, LocationGraph, Reservation};
use lifeline_queue::{PriorityQueueManager, QueueEntry, QueueFilter, QueueStats};
use lifeline_router::Candidate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{OverrideAuditEntry, OverrideAuditLog};
use crate::events::{ClosedRequest, EngineEvent};
use crate::metrics::EngineMetrics;

/// A committed match and the units it holds.
#[derive(Debug)]
pub(crate) struct Allocation {
    pub result: MatchResult,
    pub reservation: Reservation,
    /// Graph generation the units were taken from.
    pub generation: u64,
}

/// Parameters of a nearest-supply listing.
#[derive(Debug, Clone, Deserialize)]
pub struct CandidateQuery {
    pub blood_group: BloodGroup,
    pub location_node_id: NodeId,
    #[serde(default = "default_quantity")]
    pub quantity_units: u32,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_quantity() -> u32 {
    1
}

fn default_limit() -> usize {
    5
}

pub const MAX_CANDIDATE_LIMIT: usize = 50;

/// Result of a nearest-supply listing.
///
/// `no_match` is set when `candidates` is empty, so a search cut short by its
/// budget can be told apart from an area with no compatible stock.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CandidateListing {
    pub candidates: Vec<Candidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_match: Option<NoMatchReason>,
}

impl CandidateQuery {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_QUANTITY_UNITS..=MAX_QUANTITY_UNITS).contains(&self.quantity_units) {
            return Err(LifelineError::InvalidRequest(format!(
                "quantity_units must be in {MIN_QUANTITY_UNITS}..={MAX_QUANTITY_UNITS}"
            )));
        }
        if !(1..=MAX_CANDIDATE_LIMIT).contains(&self.limit) {
            return Err(LifelineError::InvalidRequest(format!(
                "limit must be in 1..={MAX_CANDIDATE_LIMIT}"
            )));
        }
        if self.location_node_id.trim().is_empty() {
            return Err(LifelineError::InvalidRequest("location_node_id is required".into()));
        }
        Ok(())
    }
}

pub struct EngineState {
    pub(crate) queue: PriorityQueueManager,
    pub(crate) graph: Arc<LocationGraph>,
    pub(crate) inventory: Arc<Inventory>,
    /// Bumped on every full graph replacement.
    pub(crate) generation: u64,
    pub(crate) allocations: HashMap<RequestId, Allocation>,
    pub(crate) audit: OverrideAuditLog,
    pub(crate) metrics: EngineMetrics,
    outbox: Vec<EngineEvent>,
    queue_dirty: bool,
}

pub(crate) fn inventory_error(e: InventoryError) -> LifelineError {
    match e {
        InventoryError::Insufficient {
            node_id,
            blood_group,
            requested,
            available,
        } => LifelineError::InventoryRace {
            node_id,
            blood_group,
            requested,
            available,
        },
        InventoryError::LockPoisoned(msg) => LifelineError::Storage(msg),
    }
}

impl EngineState {
    pub fn new(graph: LocationGraph, config: &EngineConfig) -> Self {
        let inventory = Inventory::from_graph(&graph);
        Self {
            queue: PriorityQueueManager::new(),
            graph: Arc::new(graph),
            inventory: Arc::new(inventory),
            generation: 0,
            allocations: HashMap::new(),
            audit: OverrideAuditLog::with_max_entries(config.audit_max_entries),
            metrics: EngineMetrics::default(),
            outbox: Vec::new(),
            queue_dirty: false,
        }
    }

    // ── Inbound operations ───────────────────────────────────

    pub fn submit(&mut self, input: RequestInput, now: DateTime<Utc>) -> Result<RequestId> {
        let accepted = input
            .into_request(now)
            .and_then(|request| self.queue.insert(request, now));
        match accepted {
            Ok(id) => {
                self.metrics.requests_submitted += 1;
                self.queue_dirty = true;
                if !self.queue.get(&id).is_some_and(|r| self.graph.contains(&r.location_node_id)) {
                    warn!(request_id = %id, "request location not in current graph");
                }
                info!(request_id = %id, "request accepted");
                Ok(id)
            }
            Err(e) => {
                self.metrics.requests_rejected += 1;
                warn!(error = %e, "request rejected");
                Err(e)
            }
        }
    }

    /// Cancel an active request. Units held by a committed allocation go
    /// back to the ledger they came from.
    pub fn cancel(&mut self, id: &str, now: DateTime<Utc>) -> Result<Request> {
        let closed = self.queue.update_status(id, RequestStatus::Cancelled)?;
        let allocation = match self.allocations.remove(id) {
            Some(Allocation {
                result,
                reservation,
                generation,
            }) => {
                if generation == self.generation {
                    if let Err(e) = self.inventory.release(reservation) {
                        warn!(request_id = %id, error = %e, "failed to return allocated units");
                    }
                }
                Some(result)
            }
            None => None,
        };
        self.metrics.requests_cancelled += 1;
        self.close(closed.clone(), allocation, now);
        Ok(closed)
    }

    pub fn apply_override(
        &mut self,
        id: &str,
        input: OverrideInput,
        now: DateTime<Utc>,
    ) -> Result<OverrideAuditEntry> {
        input.validate()?;
        let (previous_score, new_score) = self.queue.apply_override(id, now)?;
        let entry = OverrideAuditEntry {
            request_id: id.to_string(),
            authorized_by: input.authorized_by.trim().to_string(),
            reason: input.reason.trim().to_string(),
            previous_score,
            new_score,
            applied_at: now,
        };
        warn!(
            request_id = %id,
            authorized_by = %entry.authorized_by,
            reason = %entry.reason,
            previous_score,
            new_score,
            "emergency override applied"
        );
        self.audit.record(entry.clone());
        self.metrics.overrides_applied += 1;
        self.queue_dirty = true;
        Ok(entry)
    }

    /// `Processing -> Fulfilled`; the allocation's units stay consumed.
    pub fn confirm_fulfillment(&mut self, id: &str, now: DateTime<Utc>) -> Result<Request> {
        let closed = self.queue.update_status(id, RequestStatus::Fulfilled)?;
        let allocation = self.allocations.remove(id).map(|a| a.result);
        self.metrics.requests_fulfilled += 1;
        self.close(closed.clone(), allocation, now);
        Ok(closed)
    }

    /// Replace topology and reset the ledger to the snapshot's stock.
    pub fn update_graph(&mut self, graph: LocationGraph) -> GraphStats {
        let stats = graph.stats();
        self.inventory = Arc::new(Inventory::from_graph(&graph));
        self.graph = Arc::new(graph);
        self.generation += 1;
        info!(
            nodes = stats.node_count,
            edges = stats.edge_count,
            generation = self.generation,
            "graph snapshot replaced"
        );
        stats
    }

    pub fn set_stock(&mut self, node_id: &str, group: BloodGroup, units: u32) -> Result<()> {
        if !self.graph.contains(node_id) {
            return Err(LifelineError::NotFound(format!("node {node_id}")));
        }
        self.inventory
            .set_level(node_id, group, units)
            .map_err(inventory_error)?;
        debug!(node_id, blood_group = %group, units, "stock level set");
        Ok(())
    }

    /// Shared handles for an off-thread search.
    pub fn routing_view(&self) -> (Arc<LocationGraph>, Arc<Inventory>) {
        (Arc::clone(&self.graph), Arc::clone(&self.inventory))
    }

    /// Current topology carrying live ledger levels.
    pub fn live_graph(&self) -> Result<LocationGraph> {
        self.inventory.apply_to(&self.graph).map_err(inventory_error)
    }

    pub fn unit_level(&self, node_id: &str, group: BloodGroup) -> Result<u32> {
        self.inventory.level(node_id, group).map_err(inventory_error)
    }

    pub fn graph_stats(&self) -> GraphStats {
        self.graph.stats()
    }

    // ── Queue views ──────────────────────────────────────────

    pub fn refresh(&mut self, now: DateTime<Utc>) {
        self.queue.refresh_all(now);
        self.queue_dirty = true;
    }

    pub fn request(&self, id: &str) -> Option<&Request> {
        self.queue.get(id)
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<QueueEntry> {
        self.queue.snapshot(now)
    }

    pub fn filter(&self, filter: &QueueFilter, now: DateTime<Utc>) -> Vec<QueueEntry> {
        self.queue.filter(filter, now)
    }

    pub fn stats(&self, now: DateTime<Utc>) -> QueueStats {
        self.queue.stats(now)
    }

    pub fn audit_entries(&self, limit: usize) -> Vec<OverrideAuditEntry> {
        self.audit.recent(limit)
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn allocation(&self, id: &str) -> Option<&MatchResult> {
        self.allocations.get(id).map(|a| &a.result)
    }

    // ── Outbox ───────────────────────────────────────────────

    pub(crate) fn emit(&mut self, event: EngineEvent) {
        self.outbox.push(event);
    }

    pub(crate) fn mark_queue_dirty(&mut self) {
        self.queue_dirty = true;
    }

    /// Drain pending events, appending a queue snapshot if the queue changed.
    pub fn take_events(&mut self, now: DateTime<Utc>) -> Vec<EngineEvent> {
        let mut events = std::mem::take(&mut self.outbox);
        if std::mem::take(&mut self.queue_dirty) {
            events.push(EngineEvent::QueueChanged(self.queue.snapshot(now)));
        }
        events
    }

    fn close(&mut self, request: Request, allocation: Option<MatchResult>, now: DateTime<Utc>) {
        self.queue_dirty = true;
        self.emit(EngineEvent::RequestClosed(ClosedRequest {
            request,
            allocation,
            closed_at: now,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lifeline_core::{NodeKind, Urgency};
    use lifeline_graph::LocationNode;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn state() -> EngineState {
        let mut g = LocationGraph::new();
        g.add_node(LocationNode::new("site", NodeKind::RequestSite)).unwrap();
        g.add_node(LocationNode::new("bank", NodeKind::BloodBank).with_stock(BloodGroup::OPos, 4))
            .unwrap();
        g.add_edge("site", "bank", 1.0).unwrap();
        EngineState::new(g, &EngineConfig::default())
    }

    fn input(id: &str) -> RequestInput {
        RequestInput {
            id: Some(id.into()),
            patient_name: "Sarah Johnson".into(),
            blood_group: Some("O+".into()),
            quantity_units: Some(1),
            urgency: Some(Urgency::Normal),
            location_node_id: "site".into(),
            ..Default::default()
        }
    }

    #[test]
    fn submit_counts_and_rejects() {
        let mut s = state();
        s.submit(input("r1"), now()).unwrap();
        let mut bad = input("r2");
        bad.blood_group = None;
        assert!(matches!(s.submit(bad, now()), Err(LifelineError::InvalidRequest(_))));
        assert!(s.submit(input("r1"), now()).is_err(), "duplicate id");
        assert_eq!(s.metrics().requests_submitted, 1);
        assert_eq!(s.metrics().requests_rejected, 2);

        let events = s.take_events(now());
        assert!(matches!(events.as_slice(), [EngineEvent::QueueChanged(q)] if q.len() == 1));
        assert!(s.take_events(now()).is_empty());
    }

    #[test]
    fn override_is_audited() {
        let mut s = state();
        s.submit(input("r1"), now()).unwrap();
        let entry = s
            .apply_override(
                "r1",
                OverrideInput { authorized_by: "DR-117".into(), reason: "trauma bay".into() },
                now(),
            )
            .unwrap();
        assert_eq!(entry.previous_score, 52);
        assert_eq!(entry.new_score, 102);
        assert_eq!(s.audit_entries(10), vec![entry]);

        let unauthorised = OverrideInput { authorized_by: " ".into(), reason: "x".into() };
        assert!(matches!(
            s.apply_override("r1", unauthorised, now()),
            Err(LifelineError::InvalidRequest(_))
        ));
        let missing = OverrideInput { authorized_by: "DR-117".into(), reason: "x".into() };
        assert!(matches!(s.apply_override("zz", missing, now()), Err(LifelineError::NotFound(_))));
    }

    #[test]
    fn set_stock_requires_known_node() {
        let mut s = state();
        s.set_stock("bank", BloodGroup::ANeg, 7).unwrap();
        assert_eq!(s.unit_level("bank", BloodGroup::ANeg).unwrap(), 7);
        assert!(matches!(
            s.set_stock("ghost", BloodGroup::ANeg, 1),
            Err(LifelineError::NotFound(_))
        ));
        assert_eq!(s.live_graph().unwrap().units_available("bank", BloodGroup::ANeg), 7);
    }

    #[test]
    fn graph_replacement_resets_ledger() {
        let mut s = state();
        s.set_stock("bank", BloodGroup::OPos, 0).unwrap();
        let mut g = LocationGraph::new();
        g.add_node(LocationNode::new("bank", NodeKind::BloodBank).with_stock(BloodGroup::OPos, 9))
            .unwrap();
        let stats = s.update_graph(g);
        assert_eq!(stats.node_count, 1);
        assert_eq!(s.generation, 1);
        assert_eq!(s.unit_level("bank", BloodGroup::OPos).unwrap(), 9);
    }

    #[test]
    fn fulfilling_pending_request_is_invalid() {
        let mut s = state();
        s.submit(input("r1"), now()).unwrap();
        assert!(matches!(
            s.confirm_fulfillment("r1", now()),
            Err(LifelineError::InvalidTransition { .. })
        ));
        let cancelled = s.cancel("r1", now()).unwrap();
        assert_eq!(cancelled.status, RequestStatus::Cancelled);
        assert!(s.request("r1").is_none());
        assert!(matches!(s.cancel("r1", now()), Err(LifelineError::NotFound(_))));
    }

    #[test]
    fn candidate_query_validation() {
        let q = CandidateQuery {
            blood_group: BloodGroup::ONeg,
            location_node_id: "site".into(),
            quantity_units: 1,
            limit: 5,
        };
        assert!(q.validate().is_ok());
        assert!(CandidateQuery { limit: 0, ..q.clone() }.validate().is_err());
        assert!(CandidateQuery { quantity_units: 11, ..q.clone() }.validate().is_err());
        assert!(CandidateQuery { location_node_id: "".into(), ..q }.validate().is_err());
    }
}
