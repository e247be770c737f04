//! Server startup: seed graph loading and engine spawning.

use std::path::Path;
use std::sync::Arc;

use lifeline_core::Config;
use lifeline_engine::{Engine, EngineRuntime, EventSink, LogSink, MemorySink, SystemClock};
use lifeline_graph::{GraphSpec, LocationGraph};
use tracing::{info, warn};

use crate::state::AppState;

/// Load the start-up graph, or an empty one when no seed is configured.
pub fn load_seed_graph(seed: Option<&Path>) -> anyhow::Result<LocationGraph> {
    let Some(path) = seed else {
        warn!("No graph seed configured, starting with an empty graph");
        return Ok(LocationGraph::new());
    };
    let graph = GraphSpec::from_file(path)
        .and_then(GraphSpec::into_graph)
        .map_err(|e| anyhow::anyhow!("failed to load graph seed {}: {}", path.display(), e))?;
    let stats = graph.stats();
    info!(
        "Loaded graph seed {} ({} nodes, {} edges)",
        path.display(),
        stats.node_count,
        stats.edge_count
    );
    Ok(graph)
}

/// Spawn the engine with the default sinks and build the shared HTTP state.
pub fn build_app_state(
    config: &Config,
    graph: LocationGraph,
) -> anyhow::Result<(Arc<AppState>, EngineRuntime)> {
    let matches = Arc::new(MemorySink::default());
    let sinks: Vec<Arc<dyn EventSink>> = vec![matches.clone(), Arc::new(LogSink)];
    let runtime = Engine::spawn(config, graph, sinks, Arc::new(SystemClock))?;
    let state = Arc::new(AppState::new(runtime.handle.clone(), matches));
    Ok((state, runtime))
}
