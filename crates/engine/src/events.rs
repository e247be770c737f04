//! Outbound events and their delivery to downstream sinks.
//!
//! Every sink receives every event. A failed delivery is retried with a
//! linear backoff and, if it still fails, parked in a bounded backlog that is
//! retried before the next event goes out. Sinks must therefore tolerate
//! duplicates; `MatchKey` (request id + computed_at) identifies a match.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lifeline_core::config::EventConfig;
use lifeline_core::{MatchKey, MatchResult, Request, RequestId};
use lifeline_queue::QueueEntry;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Sink rejected event: {0}")]
    Rejected(String),
}

/// A request leaving the active set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedRequest {
    /// Final state, status Fulfilled or Cancelled.
    pub request: Request,
    /// The committed allocation, if one existed.
    pub allocation: Option<MatchResult>,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EngineEvent {
    MatchComputed(MatchResult),
    QueueChanged(Vec<QueueEntry>),
    RequestClosed(ClosedRequest),
}

impl EngineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::MatchComputed(_) => "match_computed",
            EngineEvent::QueueChanged(_) => "queue_changed",
            EngineEvent::RequestClosed(_) => "request_closed",
        }
    }

    fn request_id(&self) -> Option<&str> {
        match self {
            EngineEvent::MatchComputed(m) => Some(&m.request_id),
            EngineEvent::RequestClosed(c) => Some(&c.request.id),
            EngineEvent::QueueChanged(_) => None,
        }
    }
}

/// Downstream consumer of engine events (storage, dashboards).
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn on_match_computed(&self, result: &MatchResult) -> Result<(), SinkError>;

    async fn on_queue_changed(&self, snapshot: &[QueueEntry]) -> Result<(), SinkError>;

    async fn on_request_closed(&self, _closed: &ClosedRequest) -> Result<(), SinkError> {
        Ok(())
    }

    /// Human-readable name for this sink (e.g., "memory", "log").
    fn sink_name(&self) -> &str;
}

async fn deliver_to(sink: &dyn EventSink, event: &EngineEvent) -> Result<(), SinkError> {
    match event {
        EngineEvent::MatchComputed(m) => sink.on_match_computed(m).await,
        EngineEvent::QueueChanged(s) => sink.on_queue_changed(s).await,
        EngineEvent::RequestClosed(c) => sink.on_request_closed(c).await,
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    pub backlog: usize,
}

struct Parked {
    sink: usize,
    event: Arc<EngineEvent>,
}

/// Fans events out to sinks with retry and a bounded redelivery backlog.
pub struct EventDispatcher {
    sinks: Vec<Arc<dyn EventSink>>,
    backlog: VecDeque<Parked>,
    config: EventConfig,
    failures: Arc<AtomicU64>,
}

impl EventDispatcher {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>, config: EventConfig) -> Self {
        Self {
            sinks,
            backlog: VecDeque::new(),
            config,
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared counter of deliveries that exhausted their retries.
    pub fn failure_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.failures)
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Retry parked deliveries, then deliver `event` to every sink.
    pub async fn dispatch(&mut self, event: EngineEvent) -> DispatchReport {
        let mut report = self.retry_backlog().await;
        let event = Arc::new(event);
        for index in 0..self.sinks.len() {
            if self.attempt(index, &event).await {
                report.delivered += 1;
            } else {
                report.failed += 1;
                self.park(index, Arc::clone(&event));
            }
        }
        report.backlog = self.backlog.len();
        report
    }

    /// One pass over the backlog; whatever fails again stays parked.
    pub async fn retry_backlog(&mut self) -> DispatchReport {
        let mut report = DispatchReport::default();
        let parked: Vec<Parked> = self.backlog.drain(..).collect();
        for entry in parked {
            if self.attempt(entry.sink, &entry.event).await {
                report.delivered += 1;
            } else {
                report.failed += 1;
                self.park(entry.sink, entry.event);
            }
        }
        report.backlog = self.backlog.len();
        report
    }

    async fn attempt(&self, index: usize, event: &EngineEvent) -> bool {
        let Some(sink) = self.sinks.get(index) else {
            return true;
        };
        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let start = Instant::now();
            match deliver_to(sink.as_ref(), event).await {
                Ok(()) => {
                    debug!(
                        sink = sink.sink_name(),
                        event = event.kind(),
                        request_id = event.request_id().unwrap_or("-"),
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Event delivered"
                    );
                    return true;
                }
                Err(e) => {
                    warn!(
                        sink = sink.sink_name(),
                        event = event.kind(),
                        attempt,
                        max_attempts,
                        error = %e,
                        "Event delivery failed"
                    );
                    if attempt < max_attempts && self.config.retry_backoff_ms > 0 {
                        let backoff = self.config.retry_backoff_ms * u64::from(attempt);
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }
        self.failures.fetch_add(1, Ordering::Relaxed);
        false
    }

    fn park(&mut self, sink: usize, event: Arc<EngineEvent>) {
        if self.config.backlog_limit == 0 {
            warn!(event = event.kind(), "Event dropped, backlog disabled");
            return;
        }
        if self.backlog.len() >= self.config.backlog_limit {
            if let Some(dropped) = self.backlog.pop_front() {
                warn!(event = dropped.event.kind(), "Event backlog full, dropping oldest");
            }
        }
        self.backlog.push_back(Parked { sink, event });
    }
}

/// Run the dispatcher until the event channel closes.
pub fn spawn_dispatcher(
    mut dispatcher: EventDispatcher,
    mut rx: mpsc::UnboundedReceiver<EngineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Event dispatcher started with {} sinks", dispatcher.sinks.len());
        while let Some(event) = rx.recv().await {
            dispatcher.dispatch(event).await;
        }
        if dispatcher.backlog_len() > 0 {
            let report = dispatcher.retry_backlog().await;
            if report.backlog > 0 {
                warn!(
                    undelivered = report.backlog,
                    "Event dispatcher stopped with undelivered events"
                );
            }
        }
        info!("Event dispatcher stopped");
    })
}

// ── Sinks ─────────────────────────────────────────────────────

/// Keeps the latest state in memory for the HTTP read side.
///
/// Matches are keyed by [`MatchKey`], so redelivery never duplicates them.
#[derive(Debug)]
pub struct MemorySink {
    matches: RwLock<BTreeMap<MatchKey, MatchResult>>,
    latest_by_request: RwLock<HashMap<RequestId, MatchKey>>,
    queue: RwLock<Vec<QueueEntry>>,
    closed: RwLock<VecDeque<ClosedRequest>>,
    max_entries: usize,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::with_max_entries(1000)
    }
}

impl MemorySink {
    pub fn with_max_entries(max: usize) -> Self {
        Self {
            matches: RwLock::new(BTreeMap::new()),
            latest_by_request: RwLock::new(HashMap::new()),
            queue: RwLock::new(Vec::new()),
            closed: RwLock::new(VecDeque::new()),
            max_entries: max.max(1),
        }
    }

    fn lock_err<E: std::fmt::Display>(e: E) -> SinkError {
        SinkError::Unavailable(format!("memory sink lock poisoned: {e}"))
    }

    /// Most recent matches first.
    pub fn recent_matches(&self, limit: usize) -> Vec<MatchResult> {
        let Ok(matches) = self.matches.read() else {
            return Vec::new();
        };
        let mut all: Vec<MatchResult> = matches.values().cloned().collect();
        all.sort_by(|a, b| {
            b.computed_at
                .cmp(&a.computed_at)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });
        all.truncate(limit);
        all
    }

    pub fn match_for(&self, request_id: &str) -> Option<MatchResult> {
        let key = self.latest_by_request.read().ok()?.get(request_id).cloned()?;
        self.matches.read().ok()?.get(&key).cloned()
    }

    pub fn match_count(&self) -> usize {
        self.matches.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn queue(&self) -> Vec<QueueEntry> {
        self.queue.read().map(|q| q.clone()).unwrap_or_default()
    }

    pub fn closed(&self) -> Vec<ClosedRequest> {
        self.closed
            .read()
            .map(|c| c.iter().rev().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl EventSink for MemorySink {
    async fn on_match_computed(&self, result: &MatchResult) -> Result<(), SinkError> {
        let key = result.key();
        let mut matches = self.matches.write().map_err(Self::lock_err)?;
        if matches.contains_key(&key) {
            return Ok(());
        }
        matches.insert(key.clone(), result.clone());
        while matches.len() > self.max_entries {
            if matches.pop_first().is_none() {
                break;
            }
        }
        drop(matches);
        self.latest_by_request
            .write()
            .map_err(Self::lock_err)?
            .insert(result.request_id.clone(), key);
        Ok(())
    }

    async fn on_queue_changed(&self, snapshot: &[QueueEntry]) -> Result<(), SinkError> {
        *self.queue.write().map_err(Self::lock_err)? = snapshot.to_vec();
        Ok(())
    }

    async fn on_request_closed(&self, closed: &ClosedRequest) -> Result<(), SinkError> {
        let mut log = self.closed.write().map_err(Self::lock_err)?;
        let duplicate = log
            .iter()
            .any(|c| c.request.id == closed.request.id && c.closed_at == closed.closed_at);
        if !duplicate {
            if log.len() >= self.max_entries {
                log.pop_front();
            }
            log.push_back(closed.clone());
        }
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "memory"
    }
}

/// Traces every event; never fails.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait::async_trait]
impl EventSink for LogSink {
    async fn on_match_computed(&self, result: &MatchResult) -> Result<(), SinkError> {
        info!(
            request_id = %result.request_id,
            node_id = %result.chosen_node_id,
            blood_group = %result.blood_group_used,
            units = result.quantity_units,
            path_cost = result.path_cost,
            rank = result.rank,
            "Match computed"
        );
        Ok(())
    }

    async fn on_queue_changed(&self, snapshot: &[QueueEntry]) -> Result<(), SinkError> {
        debug!(active = snapshot.len(), "Queue changed");
        Ok(())
    }

    async fn on_request_closed(&self, closed: &ClosedRequest) -> Result<(), SinkError> {
        info!(request_id = %closed.request.id, status = %closed.request.status, "Request closed");
        Ok(())
    }

    fn sink_name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use lifeline_core::BloodGroup;

    struct FlakySink {
        fail_first: usize,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl EventSink for FlakySink {
        async fn on_match_computed(&self, _result: &MatchResult) -> Result<(), SinkError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(SinkError::Unavailable("mock failure".into()))
            } else {
                Ok(())
            }
        }
        async fn on_queue_changed(&self, _snapshot: &[QueueEntry]) -> Result<(), SinkError> {
            Ok(())
        }
        fn sink_name(&self) -> &str {
            "flaky"
        }
    }

    fn match_result(id: &str) -> MatchResult {
        MatchResult {
            request_id: id.into(),
            chosen_node_id: "bank".into(),
            path_cost: 2.5,
            path: vec!["site".into(), "bank".into()],
            rank: 1,
            candidates_considered: 1,
            blood_group_used: BloodGroup::OPos,
            quantity_units: 2,
            computed_at: Utc::now(),
        }
    }

    fn config(max_attempts: u32) -> EventConfig {
        EventConfig {
            max_attempts,
            retry_backoff_ms: 0,
            backlog_limit: 10,
        }
    }

    #[tokio::test]
    async fn retries_until_delivered() {
        let sink = Arc::new(FlakySink { fail_first: 2, calls: AtomicUsize::new(0) });
        let mut dispatcher = EventDispatcher::new(vec![sink.clone()], config(3));
        let report = dispatcher.dispatch(EngineEvent::MatchComputed(match_result("r1"))).await;
        assert_eq!(report, DispatchReport { delivered: 1, failed: 0, backlog: 0 });
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_park_then_redeliver() {
        let sink = Arc::new(FlakySink { fail_first: 2, calls: AtomicUsize::new(0) });
        let mut dispatcher = EventDispatcher::new(vec![sink.clone()], config(1));
        let failures = dispatcher.failure_counter();

        let report = dispatcher.dispatch(EngineEvent::MatchComputed(match_result("r1"))).await;
        assert_eq!(report.failed, 1);
        assert_eq!(dispatcher.backlog_len(), 1);

        // The parked event fails once more while r2 goes through; the next
        // backlog pass clears it.
        dispatcher.dispatch(EngineEvent::MatchComputed(match_result("r2"))).await;
        let report = dispatcher.retry_backlog().await;
        assert_eq!(report.backlog, 0);
        assert_eq!(failures.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn backlog_is_bounded() {
        let sink = Arc::new(FlakySink { fail_first: usize::MAX, calls: AtomicUsize::new(0) });
        let config = EventConfig { max_attempts: 1, retry_backoff_ms: 0, backlog_limit: 2 };
        let mut dispatcher = EventDispatcher::new(vec![sink], config);
        for i in 0..5 {
            dispatcher.dispatch(EngineEvent::MatchComputed(match_result(&format!("r{i}")))).await;
        }
        assert_eq!(dispatcher.backlog_len(), 2);
    }

    #[tokio::test]
    async fn memory_sink_is_idempotent_on_match_key() {
        let sink = MemorySink::default();
        let m = match_result("r1");
        sink.on_match_computed(&m).await.unwrap();
        sink.on_match_computed(&m).await.unwrap();
        assert_eq!(sink.match_count(), 1);
        assert_eq!(sink.match_for("r1"), Some(m.clone()));

        let mut later = m.clone();
        later.computed_at = m.computed_at + chrono::Duration::seconds(5);
        sink.on_match_computed(&later).await.unwrap();
        assert_eq!(sink.match_count(), 2);
        assert_eq!(sink.recent_matches(1)[0].computed_at, later.computed_at);
        assert_eq!(sink.match_for("r1").map(|m| m.computed_at), Some(later.computed_at));
    }

    #[tokio::test]
    async fn dispatcher_task_drains_channel() {
        let memory = Arc::new(MemorySink::default());
        let dispatcher = EventDispatcher::new(
            vec![memory.clone(), Arc::new(LogSink)],
            EventConfig::default(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_dispatcher(dispatcher, rx);
        tx.send(EngineEvent::MatchComputed(match_result("r1"))).unwrap();
        tx.send(EngineEvent::QueueChanged(Vec::new())).unwrap();
        drop(tx);
        handle.await.unwrap();
        assert_eq!(memory.match_count(), 1);
    }
}
