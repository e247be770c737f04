//! Allocation orchestration: the coordination task, the allocation cycle
//! and the event fan-out that sits behind it.

pub mod actor;
pub mod audit;
pub mod clock;
pub mod error;
pub mod events;
pub mod handle;
pub mod metrics;
pub mod orchestrator;
pub mod state;

pub use actor::{Engine, EngineRuntime};
pub use audit::{OverrideAuditEntry, OverrideAuditLog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::EngineError;
pub use events::{
    ClosedRequest, DispatchReport, EngineEvent, EventDispatcher, EventSink, LogSink, MemorySink,
    SinkError,
};
pub use handle::EngineHandle;
pub use metrics::EngineMetrics;
pub use orchestrator::{CycleReport, UnmatchedRequest};
pub use state::{CandidateListing, CandidateQuery, EngineState, MAX_CANDIDATE_LIMIT};
