//! Location graph and stock ledger for the allocation engine.
//!
//! - `store`: donor / blood-bank / request-site nodes joined by
//!   non-negative weighted undirected edges
//! - `snapshot`: serde description of a graph (YAML or JSON) and its validation
//! - `inventory`: the mutex-guarded per-node, per-group unit ledger

pub mod error;
pub mod inventory;
pub mod snapshot;
pub mod store;

pub use error::{GraphError, InventoryError};
pub use inventory::{Inventory, Reservation};
pub use snapshot::{EdgeSpec, GraphSpec, NodeSpec};
pub use store::{Edge, GraphStats, LocationGraph, LocationNode};
