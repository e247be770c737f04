use thiserror::Error;

use crate::blood::BloodGroup;
use crate::entity::{NodeId, RequestId};
use crate::matching::NoMatchReason;
use crate::request::RequestStatus;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LifelineError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Queue is empty")]
    EmptyQueue,

    #[error("No match found for {request_id}: {reason}")]
    NoMatchFound {
        request_id: RequestId,
        reason: NoMatchReason,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Inventory race on {node_id}/{blood_group}: requested {requested}, available {available}")]
    InventoryRace {
        node_id: NodeId,
        blood_group: BloodGroup,
        requested: u32,
        available: u32,
    },

    #[error("Invalid transition for {request_id}: {from} -> {to}")]
    InvalidTransition {
        request_id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Engine is shutting down")]
    ShuttingDown,
}

impl LifelineError {
    /// Benign and recoverable errors do not abort an allocation cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LifelineError::EmptyQueue
                | LifelineError::NoMatchFound { .. }
                | LifelineError::NotFound(_)
                | LifelineError::InventoryRace { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LifelineError>;
