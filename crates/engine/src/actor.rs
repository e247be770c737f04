//! Single-owner coordination task.
//!
//! All mutations of [`EngineState`] arrive as [`Command`]s on one channel and
//! are applied in order by one task. Route searches run on the blocking pool
//! while the task keeps applying commands, so a cancel can land between
//! routing and commit. Queue snapshots are published through a `watch`
//! channel for readers that must not wait on the task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lifeline_core::config::{Config, EngineConfig};
use lifeline_core::{
    BloodGroup, LifelineError, NodeId, OverrideInput, Request, RequestId, RequestInput,
};
use lifeline_graph::{GraphStats, Inventory, LocationGraph};
use lifeline_queue::{QueueEntry, QueueFilter, QueueStats};
use lifeline_router::RoutingPool;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::audit::OverrideAuditEntry;
use crate::clock::Clock;
use crate::error::EngineError;
use crate::events::{spawn_dispatcher, EngineEvent, EventDispatcher, EventSink};
use crate::handle::EngineHandle;
use crate::metrics::EngineMetrics;
use crate::orchestrator::{self, CycleReport, RoutedCycle};
use crate::state::EngineState;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, LifelineError>>;

pub(crate) enum Command {
    Submit {
        input: RequestInput,
        reply: Reply<RequestId>,
    },
    Cancel {
        id: RequestId,
        reply: Reply<Request>,
    },
    Override {
        id: RequestId,
        input: OverrideInput,
        reply: Reply<OverrideAuditEntry>,
    },
    Fulfill {
        id: RequestId,
        reply: Reply<Request>,
    },
    UpdateGraph {
        graph: LocationGraph,
        reply: oneshot::Sender<GraphStats>,
    },
    SetStock {
        node_id: NodeId,
        blood_group: BloodGroup,
        units: u32,
        reply: Reply<()>,
    },
    RoutingView {
        reply: oneshot::Sender<(Arc<LocationGraph>, Arc<Inventory>)>,
    },
    Queue {
        filter: QueueFilter,
        reply: oneshot::Sender<Vec<QueueEntry>>,
    },
    Stats {
        reply: oneshot::Sender<QueueStats>,
    },
    Audit {
        limit: usize,
        reply: oneshot::Sender<Vec<OverrideAuditEntry>>,
    },
    Metrics {
        reply: oneshot::Sender<EngineMetrics>,
    },
    RunCycle {
        reply: oneshot::Sender<CycleReport>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct InFlight {
    request_ids: Vec<RequestId>,
    task: JoinHandle<RoutedCycle>,
}

/// The running engine: coordination task, event dispatcher and a handle.
pub struct EngineRuntime {
    pub handle: EngineHandle,
    engine_task: JoinHandle<()>,
    dispatcher_task: JoinHandle<()>,
}

impl EngineRuntime {
    /// Stop the coordination task, finishing any cycle in flight, then wait
    /// for pending events to be delivered.
    pub async fn shutdown(self) {
        if let Err(e) = self.handle.shutdown().await {
            debug!(error = %e, "engine already stopped");
        }
        drop(self.handle);
        if let Err(e) = self.engine_task.await {
            error!(error = %e, "engine task panicked");
        }
        if let Err(e) = self.dispatcher_task.await {
            error!(error = %e, "event dispatcher panicked");
        }
    }
}

pub struct Engine {
    state: EngineState,
    config: EngineConfig,
    pool: Arc<RoutingPool>,
    clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<EngineEvent>,
    snapshots: watch::Sender<Arc<Vec<QueueEntry>>>,
    delivery_failures: Arc<AtomicU64>,
    cycle_waiters: Vec<oneshot::Sender<CycleReport>>,
}

impl Engine {
    /// Start the engine on the current tokio runtime.
    pub fn spawn(
        config: &Config,
        graph: LocationGraph,
        sinks: Vec<Arc<dyn EventSink>>,
        clock: Arc<dyn Clock>,
    ) -> Result<EngineRuntime, EngineError> {
        let pool = Arc::new(RoutingPool::new(&config.routing)?);
        let state = EngineState::new(graph, &config.engine);

        let dispatcher = EventDispatcher::new(sinks, config.events.clone());
        let delivery_failures = dispatcher.failure_counter();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let dispatcher_task = spawn_dispatcher(dispatcher, events_rx);

        let (tx, rx) = mpsc::channel(config.engine.command_buffer.max(1));
        let initial = Arc::new(state.snapshot(clock.now()));
        let (snapshots_tx, snapshots_rx) = watch::channel(initial);

        let engine = Engine {
            state,
            config: config.engine.clone(),
            pool: Arc::clone(&pool),
            clock,
            events: events_tx,
            snapshots: snapshots_tx,
            delivery_failures,
            cycle_waiters: Vec::new(),
        };
        let engine_task = tokio::spawn(engine.run(rx));
        let handle = EngineHandle::new(tx, snapshots_rx, pool);

        Ok(EngineRuntime {
            handle,
            engine_task,
            dispatcher_task,
        })
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        info!(
            "Engine started (tick={}s, cycle={}ms, attempts/cycle={})",
            self.config.tick_interval_secs,
            self.config.cycle_interval_ms,
            self.config.max_attempts_per_cycle
        );
        let mut tick = interval_ms(self.config.tick_interval_secs.saturating_mul(1000));
        let mut cycle = interval_ms(self.config.cycle_interval_ms);
        let mut in_flight: Option<InFlight> = None;
        let mut shutdown_reply: Option<oneshot::Sender<()>> = None;

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(cmd) => self.handle(cmd, &mut in_flight),
                    None => break,
                },
                _ = next_tick(&mut tick) => {
                    self.state.refresh(self.clock.now());
                }
                _ = next_tick(&mut cycle) => {
                    if in_flight.is_none() && self.state.queue.queued_len() > 0 {
                        in_flight = self.start_cycle();
                    }
                }
                joined = join_routing(&mut in_flight) => {
                    let request_ids = in_flight.take().map(|f| f.request_ids).unwrap_or_default();
                    self.finish_cycle(joined, &request_ids);
                }
            }
            self.flush();
        }

        if let Some(flight) = in_flight.take() {
            let joined = flight.task.await;
            self.finish_cycle(joined, &flight.request_ids);
        }
        self.answer_waiters(CycleReport::default());
        self.flush();
        info!("Engine stopped");
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    fn handle(&mut self, cmd: Command, in_flight: &mut Option<InFlight>) {
        let now = self.clock.now();
        match cmd {
            Command::Submit { input, reply } => {
                let _ = reply.send(self.state.submit(input, now));
            }
            Command::Cancel { id, reply } => {
                let _ = reply.send(self.state.cancel(&id, now));
            }
            Command::Override { id, input, reply } => {
                let _ = reply.send(self.state.apply_override(&id, input, now));
            }
            Command::Fulfill { id, reply } => {
                let _ = reply.send(self.state.confirm_fulfillment(&id, now));
            }
            Command::UpdateGraph { graph, reply } => {
                let _ = reply.send(self.state.update_graph(graph));
            }
            Command::SetStock {
                node_id,
                blood_group,
                units,
                reply,
            } => {
                let _ = reply.send(self.state.set_stock(&node_id, blood_group, units));
            }
            Command::RoutingView { reply } => {
                let _ = reply.send(self.state.routing_view());
            }
            Command::Queue { filter, reply } => {
                let _ = reply.send(self.state.filter(&filter, now));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.state.stats(now));
            }
            Command::Audit { limit, reply } => {
                let _ = reply.send(self.state.audit_entries(limit));
            }
            Command::Metrics { reply } => {
                let mut metrics = self.state.metrics().clone();
                metrics.event_delivery_failures = self.delivery_failures.load(Ordering::Relaxed);
                let _ = reply.send(metrics);
            }
            Command::RunCycle { reply } => {
                self.cycle_waiters.push(reply);
                if in_flight.is_none() {
                    *in_flight = self.start_cycle();
                    if in_flight.is_none() {
                        self.answer_waiters(CycleReport::default());
                    }
                }
            }
            // Handled by the run loop.
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn start_cycle(&mut self) -> Option<InFlight> {
        let plan = orchestrator::begin_cycle(
            &mut self.state,
            self.clock.now(),
            self.config.max_attempts_per_cycle,
        );
        if plan.is_empty() {
            return None;
        }
        let request_ids = plan.request_ids();
        let pool = Arc::clone(&self.pool);
        let task = tokio::task::spawn_blocking(move || orchestrator::route_cycle(plan, &pool));
        Some(InFlight { request_ids, task })
    }

    fn finish_cycle(&mut self, joined: Result<RoutedCycle, JoinError>, request_ids: &[RequestId]) {
        let report = match joined {
            Ok(routed) => orchestrator::commit_cycle(&mut self.state, routed, self.clock.now()),
            Err(e) => {
                error!(error = %e, "routing task failed, re-queueing popped requests");
                orchestrator::abandon_cycle(&mut self.state, request_ids);
                CycleReport {
                    attempted: request_ids.len(),
                    deferred: request_ids.to_vec(),
                    ..CycleReport::default()
                }
            }
        };
        self.answer_waiters(report);
    }

    fn answer_waiters(&mut self, report: CycleReport) {
        for waiter in self.cycle_waiters.drain(..) {
            let _ = waiter.send(report.clone());
        }
    }

    /// Forward queued events and publish the latest snapshot.
    fn flush(&mut self) {
        for event in self.state.take_events(self.clock.now()) {
            if let EngineEvent::QueueChanged(snapshot) = &event {
                self.snapshots.send_replace(Arc::new(snapshot.clone()));
            }
            if self.events.send(event).is_err() {
                debug!("event dispatcher gone, dropping event");
            }
        }
    }
}

fn interval_ms(period_ms: u64) -> Option<Interval> {
    if period_ms == 0 {
        return None;
    }
    let period = Duration::from_millis(period_ms);
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn join_routing(in_flight: &mut Option<InFlight>) -> Result<RoutedCycle, JoinError> {
    match in_flight {
        Some(flight) => (&mut flight.task).await,
        None => std::future::pending().await,
    }
}
