use std::sync::Arc;

use lifeline_core::{
    BloodGroup, LifelineError, NoMatchReason, OverrideInput, Request, RequestId, RequestInput,
    Result,
};
use lifeline_graph::{GraphStats, LocationGraph};
use lifeline_queue::{QueueEntry, QueueFilter, QueueStats};
use lifeline_router::{RoutingPool, SupplyQuery};
use tokio::sync::{mpsc, oneshot, watch};

use crate::actor::Command;
use crate::audit::OverrideAuditEntry;
use crate::metrics::EngineMetrics;
use crate::orchestrator::CycleReport;
use crate::state::{inventory_error, CandidateListing, CandidateQuery};

/// Cloneable front door to the coordination task.
///
/// Every method fails with `ShuttingDown` once the task has stopped.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Arc<Vec<QueueEntry>>>,
    pool: Arc<RoutingPool>,
}

impl EngineHandle {
    pub(crate) fn new(
        tx: mpsc::Sender<Command>,
        snapshots: watch::Receiver<Arc<Vec<QueueEntry>>>,
        pool: Arc<RoutingPool>,
    ) -> Self {
        Self { tx, snapshots, pool }
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| LifelineError::ShuttingDown)?;
        rx.await.map_err(|_| LifelineError::ShuttingDown)
    }

    pub async fn submit(&self, input: RequestInput) -> Result<RequestId> {
        self.call(|reply| Command::Submit { input, reply }).await?
    }

    pub async fn cancel(&self, id: impl Into<RequestId>) -> Result<Request> {
        let id = id.into();
        self.call(|reply| Command::Cancel { id, reply }).await?
    }

    pub async fn apply_override(
        &self,
        id: impl Into<RequestId>,
        input: OverrideInput,
    ) -> Result<OverrideAuditEntry> {
        let id = id.into();
        self.call(|reply| Command::Override { id, input, reply }).await?
    }

    pub async fn confirm_fulfillment(&self, id: impl Into<RequestId>) -> Result<Request> {
        let id = id.into();
        self.call(|reply| Command::Fulfill { id, reply }).await?
    }

    pub async fn update_graph(&self, graph: LocationGraph) -> Result<GraphStats> {
        self.call(|reply| Command::UpdateGraph { graph, reply }).await
    }

    pub async fn set_stock(
        &self,
        node_id: impl Into<String>,
        blood_group: BloodGroup,
        units: u32,
    ) -> Result<()> {
        let node_id = node_id.into();
        self.call(|reply| Command::SetStock {
            node_id,
            blood_group,
            units,
            reply,
        })
        .await?
    }

    /// Nearest supply nodes for an ad-hoc query, searched off the
    /// coordination task against live stock levels.
    pub async fn find_candidates(&self, query: CandidateQuery) -> Result<CandidateListing> {
        query.validate()?;
        let (graph, inventory) = self.call(|reply| Command::RoutingView { reply }).await?;
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || {
            let live = inventory.apply_to(&graph).map_err(inventory_error)?;
            let supply = SupplyQuery {
                blood_group: query.blood_group,
                quantity_units: query.quantity_units,
                location_node_id: &query.location_node_id,
            };
            match pool.candidates(supply, &live, query.limit) {
                Ok(candidates) => Ok(CandidateListing {
                    candidates,
                    no_match: None,
                }),
                Err(NoMatchReason::UnknownLocation) => Err(LifelineError::NotFound(format!(
                    "location {}",
                    query.location_node_id
                ))),
                Err(reason) => Ok(CandidateListing {
                    candidates: Vec::new(),
                    no_match: Some(reason),
                }),
            }
        })
        .await
        .map_err(|e| LifelineError::Storage(format!("candidate search aborted: {e}")))?
    }

    /// Latest published queue snapshot. Never waits on the coordination task.
    pub fn snapshot(&self) -> Arc<Vec<QueueEntry>> {
        Arc::clone(&self.snapshots.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<QueueEntry>>> {
        self.snapshots.clone()
    }

    /// Filtered view with scores as of now.
    pub async fn queue(&self, filter: QueueFilter) -> Result<Vec<QueueEntry>> {
        self.call(|reply| Command::Queue { filter, reply }).await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.call(|reply| Command::Stats { reply }).await
    }

    pub async fn audit(&self, limit: usize) -> Result<Vec<OverrideAuditEntry>> {
        self.call(|reply| Command::Audit { limit, reply }).await
    }

    pub async fn metrics(&self) -> Result<EngineMetrics> {
        self.call(|reply| Command::Metrics { reply }).await
    }

    /// Run a cycle now, or join the one already in flight.
    pub async fn run_cycle_now(&self) -> Result<CycleReport> {
        self.call(|reply| Command::RunCycle { reply }).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.call(|reply| Command::Shutdown { reply }).await
    }
}
