use std::collections::HashMap;

use chrono::{DateTime, Utc};
use lifeline_core::{
    BloodGroup, LifelineError, NoMatchReason, NodeId, Request, RequestId, RequestStatus,
    RequesterType, Result, Urgency,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::heap::{HeapKey, IndexedHeap};
use crate::scoring::{self, ScoreBreakdown};

/// Owns ordering state for every active (Pending or Processing) request.
///
/// Only Pending requests waiting for routing sit in the heap. A popped
/// request stays in the active set until the orchestrator either requeues
/// it or moves it on, so cancellations arriving mid-flight still find it.
#[derive(Debug, Default)]
pub struct PriorityQueueManager {
    requests: HashMap<RequestId, Request>,
    heap: IndexedHeap,
    /// Earliest instant at which some queued score grows by a wait minute.
    next_rescore_at: Option<DateTime<Utc>>,
}

/// Read-only view of one active request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    /// 1-based position in service order.
    pub rank: usize,
    pub request_id: RequestId,
    pub patient_name: String,
    pub blood_group: BloodGroup,
    pub quantity_units: u32,
    pub urgency: Urgency,
    pub requester_type: RequesterType,
    pub location_node_id: NodeId,
    pub status: RequestStatus,
    pub priority_score: u32,
    pub score: ScoreBreakdown,
    pub wait_minutes: i64,
    pub submitted_at: DateTime<Utc>,
    pub override_active: bool,
    /// Popped for routing and not yet requeued or committed.
    pub in_flight: bool,
    pub last_failure: Option<NoMatchReason>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueFilter {
    pub urgency: Option<Urgency>,
    pub status: Option<RequestStatus>,
    pub blood_group: Option<BloodGroup>,
    /// Case-insensitive match on patient name or request id.
    pub search: Option<String>,
}

impl QueueFilter {
    pub fn matches(&self, entry: &QueueEntry) -> bool {
        if self.urgency.is_some_and(|u| u != entry.urgency) {
            return false;
        }
        if self.status.is_some_and(|s| s != entry.status) {
            return false;
        }
        if self.blood_group.is_some_and(|g| g != entry.blood_group) {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                entry.patient_name.to_lowercase().contains(&term)
                    || entry.request_id.to_lowercase().contains(&term)
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub total_active: usize,
    pub pending: usize,
    pub processing: usize,
    pub in_flight: usize,
    pub critical: usize,
    pub overridden: usize,
    pub avg_wait_minutes: f64,
    pub max_wait_minutes: i64,
}

impl PriorityQueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active requests.
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Requests waiting to be popped.
    pub fn queued_len(&self) -> usize {
        self.heap.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.requests.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Request> {
        self.requests.get(id)
    }

    pub fn is_queued(&self, id: &str) -> bool {
        self.heap.contains(id)
    }

    /// Score and enqueue a new Pending request.
    pub fn insert(&mut self, mut request: Request, now: DateTime<Utc>) -> Result<RequestId> {
        request.validate()?;
        if request.status != RequestStatus::Pending {
            return Err(LifelineError::InvalidRequest(format!(
                "request {} must be Pending to enter the queue, is {}",
                request.id, request.status
            )));
        }
        if self.requests.contains_key(&request.id) {
            return Err(LifelineError::InvalidRequest(format!(
                "request {} is already active",
                request.id
            )));
        }

        self.refresh_if_due(now);
        request.priority_score = scoring::score(&request, now);
        self.note_rescore(&request, now);
        let id = request.id.clone();
        self.heap.push(Self::key_of(&request));
        debug!(request_id = %id, score = request.priority_score, "request queued");
        self.requests.insert(id.clone(), request);
        Ok(id)
    }

    pub fn peek_highest(&mut self, now: DateTime<Utc>) -> Result<&Request> {
        self.refresh_if_due(now);
        let id = self.heap.peek().map(|k| k.id.clone()).ok_or(LifelineError::EmptyQueue)?;
        self.requests.get(&id).ok_or(LifelineError::EmptyQueue)
    }

    /// Remove the best request from the heap and hand out a copy. The
    /// request stays active (in flight) until requeued or transitioned.
    pub fn pop_highest(&mut self, now: DateTime<Utc>) -> Result<Request> {
        self.refresh_if_due(now);
        let key = self.heap.pop().ok_or(LifelineError::EmptyQueue)?;
        let request = self.requests.get(&key.id).cloned().ok_or(LifelineError::EmptyQueue)?;
        debug!(request_id = %request.id, score = request.priority_score, "request popped");
        Ok(request)
    }

    /// Recompute one score. Unknown ids are ignored.
    pub fn touch(&mut self, id: &str, now: DateTime<Utc>) -> Option<u32> {
        let request = self.requests.get_mut(id)?;
        let score = scoring::score(request, now);
        request.priority_score = score;
        let next = scoring::next_rescore_at(request, now);
        self.heap.update_score(id, score);
        self.merge_rescore(next);
        Some(score)
    }

    /// Move a request through its lifecycle. Terminal statuses leave the
    /// active set; the removed request is returned with its final status.
    pub fn update_status(&mut self, id: &str, status: RequestStatus) -> Result<Request> {
        let request = self
            .requests
            .get_mut(id)
            .ok_or_else(|| LifelineError::NotFound(format!("request {id}")))?;
        if !request.status.can_transition_to(status) {
            return Err(LifelineError::InvalidTransition {
                request_id: id.to_string(),
                from: request.status,
                to: status,
            });
        }
        request.status = status;

        if status != RequestStatus::Pending {
            self.heap.remove(id);
        }
        if status.is_terminal() {
            let closed = self
                .requests
                .remove(id)
                .ok_or_else(|| LifelineError::NotFound(format!("request {id}")))?;
            info!(request_id = %id, %status, "request closed");
            return Ok(closed);
        }
        debug!(request_id = %id, %status, "status updated");
        Ok(request.clone())
    }

    /// Put a popped, still-Pending request back with its score preserved.
    pub fn requeue(&mut self, id: &str, failure: Option<NoMatchReason>) -> bool {
        let Some(request) = self.requests.get_mut(id) else {
            return false;
        };
        if request.status != RequestStatus::Pending || self.heap.contains(id) {
            return false;
        }
        request.last_failure = failure;
        self.heap.push(Self::key_of(request));
        true
    }

    /// Activate the override bonus and re-rank. Returns (previous, new) score.
    pub fn apply_override(&mut self, id: &str, now: DateTime<Utc>) -> Result<(u32, u32)> {
        let request = self
            .requests
            .get_mut(id)
            .ok_or_else(|| LifelineError::NotFound(format!("request {id}")))?;
        let previous = request.priority_score;
        request.override_active = true;
        let new = scoring::score(request, now);
        request.priority_score = new;
        self.heap.update_score(id, new);
        Ok((previous, new))
    }

    /// Rescore every active request (periodic tick).
    pub fn refresh_all(&mut self, now: DateTime<Utc>) {
        let mut next: Option<DateTime<Utc>> = None;
        for request in self.requests.values_mut() {
            request.priority_score = scoring::score(request, now);
            next = earliest(next, scoring::next_rescore_at(request, now));
        }
        let requests = &self.requests;
        self.heap.rebuild(|key| {
            requests.get(&key.id).map(|r| r.priority_score).unwrap_or(key.score)
        });
        self.next_rescore_at = next;
    }

    /// Ordered view of the active set with scores as of `now`. Does not
    /// touch the stored ordering.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<QueueEntry> {
        let mut scored: Vec<(HeapKey, &Request, ScoreBreakdown)> = self
            .requests
            .values()
            .map(|r| {
                let breakdown = scoring::breakdown(r, now);
                let key = HeapKey {
                    score: breakdown.total,
                    submitted_at: r.submitted_at,
                    id: r.id.clone(),
                };
                (key, r, breakdown)
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        scored
            .into_iter()
            .enumerate()
            .map(|(i, (key, r, breakdown))| QueueEntry {
                rank: i + 1,
                request_id: r.id.clone(),
                patient_name: r.patient_name.clone(),
                blood_group: r.blood_group,
                quantity_units: r.quantity_units,
                urgency: r.urgency,
                requester_type: r.requester_type,
                location_node_id: r.location_node_id.clone(),
                status: r.status,
                priority_score: key.score,
                score: breakdown,
                wait_minutes: r.wait_minutes(now),
                submitted_at: r.submitted_at,
                override_active: r.override_active,
                in_flight: r.status == RequestStatus::Pending && !self.heap.contains(&r.id),
                last_failure: r.last_failure,
            })
            .collect()
    }

    pub fn filter(&self, filter: &QueueFilter, now: DateTime<Utc>) -> Vec<QueueEntry> {
        self.snapshot(now)
            .into_iter()
            .filter(|entry| filter.matches(entry))
            .collect()
    }

    pub fn stats(&self, now: DateTime<Utc>) -> QueueStats {
        let mut stats = QueueStats {
            total_active: self.requests.len(),
            ..QueueStats::default()
        };
        let mut wait_sum = 0i64;
        for request in self.requests.values() {
            match request.status {
                RequestStatus::Pending => {
                    stats.pending += 1;
                    if !self.heap.contains(&request.id) {
                        stats.in_flight += 1;
                    }
                }
                RequestStatus::Processing => stats.processing += 1,
                _ => {}
            }
            if request.urgency == Urgency::Critical {
                stats.critical += 1;
            }
            if request.override_active {
                stats.overridden += 1;
            }
            let waited = request.wait_minutes(now);
            wait_sum += waited;
            stats.max_wait_minutes = stats.max_wait_minutes.max(waited);
        }
        if !self.requests.is_empty() {
            stats.avg_wait_minutes = wait_sum as f64 / self.requests.len() as f64;
        }
        stats
    }

    fn key_of(request: &Request) -> HeapKey {
        HeapKey {
            score: request.priority_score,
            submitted_at: request.submitted_at,
            id: request.id.clone(),
        }
    }

    fn refresh_if_due(&mut self, now: DateTime<Utc>) {
        if self.next_rescore_at.is_some_and(|at| now >= at) {
            self.refresh_all(now);
        }
    }

    fn note_rescore(&mut self, request: &Request, now: DateTime<Utc>) {
        self.merge_rescore(scoring::next_rescore_at(request, now));
    }

    fn merge_rescore(&mut self, at: Option<DateTime<Utc>>) {
        self.next_rescore_at = earliest(self.next_rescore_at, at);
    }
}

fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
