use std::time::Duration;

use crate::utils::IsTransient;

// ============================================================================
// Error Taxonomy
// ============================================================================
//
// - ValidationError: malformed ingested payload, rejected before the core
// - StoreError:      durable store failures, always surfaced to the caller
// - CacheError:      cache failures, absorbed and logged by every caller
// - ServiceError:    what the access service returns (NotFound or Store)
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("malformed order payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("order_uid must not be empty")]
    EmptyOrderUid,

    #[error("order {0} has no items")]
    NoItems(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("order {0} already exists")]
    Duplicate(String),

    #[error("order {order_uid} is missing its {missing} record")]
    Incomplete {
        order_uid: String,
        missing: &'static str,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Timeout(_) => true,
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut
            ),
            StoreError::Duplicate(_) | StoreError::Incomplete { .. } => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("cache circuit breaker is open")]
    CircuitOpen,

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("order {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IsTransient for ServiceError {
    fn is_transient(&self) -> bool {
        match self {
            ServiceError::NotFound(_) => false,
            ServiceError::Store(e) => e.is_transient(),
        }
    }
}
