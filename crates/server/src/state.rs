use std::sync::Arc;

use chrono::{DateTime, Utc};
use lifeline_engine::{EngineHandle, MemorySink};

pub struct AppState {
    pub engine: EngineHandle,
    /// Read model fed by the engine's event stream; backs `/matches`.
    pub matches: Arc<MemorySink>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(engine: EngineHandle, matches: Arc<MemorySink>) -> Self {
        Self {
            engine,
            matches,
            started_at: Utc::now(),
        }
    }
}
