//! Error type returned by the fulfillment services.

use thiserror::Error;

use storekeep_core::DomainError;

use crate::store::StoreError;

pub type FulfillmentResult<T> = Result<T, FulfillmentError>;

/// Failure of a ledger, movement, adjustment or order operation.
///
/// Domain and storage errors are flattened so callers can match on the
/// taxonomy directly (`NotFound`, `InvalidState`, `InsufficientStock`,
/// `Validation`, `Timeout`) without digging through layers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FulfillmentError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("insufficient stock for {target}: requested {requested}, available {available}")]
    InsufficientStock {
        target: String,
        requested: i64,
        available: i64,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// Optimistic concurrency or uniqueness conflict that survived retries.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("store error: {0}")]
    Store(StoreError),
}

impl FulfillmentError {
    pub fn not_found(what: impl core::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn is_insufficient_stock(&self) -> bool {
        matches!(self, Self::InsufficientStock { .. })
    }
}

impl From<DomainError> for FulfillmentError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => Self::Validation(msg),
            DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::InvariantViolation(msg) => Self::InvariantViolation(msg),
            DomainError::InvalidState(msg) => Self::InvalidState(msg),
            DomainError::InsufficientStock {
                target,
                requested,
                available,
            } => Self::InsufficientStock {
                target,
                requested,
                available,
            },
            DomainError::NotFound => Self::NotFound("record".to_string()),
            DomainError::Conflict(msg) => Self::Conflict(msg),
            DomainError::Timeout(msg) => Self::Timeout(msg),
            DomainError::Unauthorized => Self::Unauthorized,
        }
    }
}

impl From<StoreError> for FulfillmentError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Store(other),
        }
    }
}
