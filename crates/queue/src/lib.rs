//! Priority Queue Manager: scores active requests and serves them in
//! (score, submission time, id) order.

pub mod heap;
pub mod manager;
pub mod scoring;

pub use heap::{HeapKey, IndexedHeap};
pub use manager::{PriorityQueueManager, QueueEntry, QueueFilter, QueueStats};
pub use scoring::{score, ScoreBreakdown, MAX_SCORE, OVERRIDE_BONUS};
