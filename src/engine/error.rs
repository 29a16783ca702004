use crate::model::{FailureReason, ItemId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    NotFound(ItemId),
    Inactive(ItemId),
    CapacityExceeded { item_id: ItemId, capacity: u32 },
    NotReserved(ItemId),
    /// The ad-hoc factory could not create its item; the batch is aborted.
    CreationFailed(String),
    /// The WAL writer failed or is gone. Retried at single-item granularity.
    TransientStore(String),
    ReadFailed(String),
    InvalidInput(&'static str),
    LimitExceeded(&'static str),
    CapacityBelowReserved { item_id: ItemId, capacity: u32, reserved: usize },
    Cancelled,
}

impl EngineError {
    /// Expected outcomes of normal use: never logged as failures, never retried.
    pub fn is_business_outcome(&self) -> bool {
        matches!(
            self,
            EngineError::NotFound(_)
                | EngineError::Inactive(_)
                | EngineError::CapacityExceeded { .. }
                | EngineError::NotReserved(_)
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::TransientStore(_))
    }

    /// Per-target reason for a batch, or `None` if the error is terminal for the whole call.
    pub(crate) fn as_failure(&self) -> Option<FailureReason> {
        match self {
            EngineError::NotFound(_) => Some(FailureReason::NotFound),
            EngineError::Inactive(_) => Some(FailureReason::Inactive),
            EngineError::CapacityExceeded { .. } => Some(FailureReason::CapacityExceeded),
            EngineError::LimitExceeded(_) => Some(FailureReason::LimitExceeded),
            EngineError::TransientStore(e) => Some(FailureReason::Transient(e.clone())),
            EngineError::Cancelled => Some(FailureReason::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "item not found: {id}"),
            EngineError::Inactive(id) => write!(f, "item is not active: {id}"),
            EngineError::CapacityExceeded { item_id, capacity } => {
                write!(f, "item {item_id} is full: all {capacity} slots reserved")
            }
            EngineError::NotReserved(id) => {
                write!(f, "no reservation held by caller on item {id}")
            }
            EngineError::CreationFailed(e) => write!(f, "ad-hoc item creation failed: {e}"),
            EngineError::TransientStore(e) => write!(f, "store error: {e}"),
            EngineError::ReadFailed(e) => write!(f, "read failed: {e}"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::CapacityBelowReserved { item_id, capacity, reserved } => write!(
                f,
                "cannot set capacity of item {item_id} to {capacity}: {reserved} reservations held"
            ),
            EngineError::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl std::error::Error for EngineError {}
