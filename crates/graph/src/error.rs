use lifeline_core::{BloodGroup, NodeId};

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Duplicate node: {0}")]
    DuplicateNode(NodeId),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Invalid weight {weight} on edge {from} -> {to}: weights must be finite and non-negative")]
    InvalidWeight { from: NodeId, to: NodeId, weight: f64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InventoryError {
    #[error("Insufficient stock at {node_id}/{blood_group}: requested {requested}, available {available}")]
    Insufficient {
        node_id: NodeId,
        blood_group: BloodGroup,
        requested: u32,
        available: u32,
    },

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}
