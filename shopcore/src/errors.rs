//! Error taxonomy, split by layer.
//!
//! [`StoreError`] covers the persistence seam; [`WorkflowError`] covers the
//! business operations and is what callers of the storefront surface see.
//! A version conflict at the store becomes a [`WorkflowError::ConcurrencyConflict`],
//! which the executor retries against fresh state; every other variant is
//! terminal and goes straight back to the caller.

use std::time::Duration;

use thiserror::Error;

use crate::domain::ids::{PaymentIntentId, ProductId};
use crate::domain::order::OrderStatus;
use crate::types::{StreamId, StreamVersion};

/// Failures at the storage layer.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The requested stream does not exist.
    #[error("stream '{0}' not found")]
    StreamNotFound(StreamId),

    /// An append carried a stale expected version.
    #[error("version conflict on stream '{stream}': expected {expected}, current {current}")]
    VersionConflict {
        /// The stream whose version check failed.
        stream: StreamId,
        /// The version the writer observed before appending.
        expected: StreamVersion,
        /// The version the stream is actually at.
        current: StreamVersion,
    },

    /// An event payload could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// The backing store could not be reached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The operation did not complete in time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store is temporarily refusing work.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A bug or unclassified failure inside the store.
    #[error("internal store error: {0}")]
    Internal(String),
}

/// The kind of entity a [`WorkflowError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A catalog product.
    Product,
    /// A shopping cart.
    Cart,
    /// A line item within a cart.
    CartItem,
    /// A placed order.
    Order,
    /// A payment intent held by the external processor.
    PaymentIntent,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Product => "product",
            Self::Cart => "cart",
            Self::CartItem => "cart item",
            Self::Order => "order",
            Self::PaymentIntent => "payment intent",
        };
        f.write_str(name)
    }
}

/// Failures surfaced by storefront operations.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// Malformed or missing input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced entity does not exist (or is discontinued).
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What kind of entity was looked up.
        kind: ResourceKind,
        /// The identifier that failed to resolve.
        id: String,
    },

    /// A requested quantity exceeds what is on hand. Names the failing
    /// product so clients can prompt the user to adjust that line.
    #[error(
        "insufficient stock for {name} ({product_id}): requested {requested}, available {available}"
    )]
    InsufficientStock {
        /// The product that could not be fulfilled.
        product_id: ProductId,
        /// Its display name at the time of the check.
        name: String,
        /// How many units the request asked for.
        requested: u32,
        /// How many units were actually available.
        available: u32,
    },

    /// An order-status change outside the allowed state machine.
    #[error("invalid order status transition: {from} -> {to}")]
    InvalidTransition {
        /// The order's current status.
        from: OrderStatus,
        /// The status the caller asked for.
        to: OrderStatus,
    },

    /// The payment processor has not reported success for this intent.
    #[error("payment not confirmed for intent {intent_id}: processor reports '{status}'")]
    PaymentNotConfirmed {
        /// The intent the confirmation was attempted for.
        intent_id: PaymentIntentId,
        /// The status the processor reported instead of success.
        status: String,
    },

    /// The caller's role does not permit this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The payment processor was unreachable or returned an error.
    /// Retryable by the client with the same idempotency key.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// Optimistic concurrency control observed conflicting writes. The
    /// executor retries these; callers only see one if retries run out.
    #[error("concurrency conflict on streams: {streams:?}")]
    ConcurrencyConflict {
        /// The streams that were written concurrently.
        streams: Vec<StreamId>,
    },

    /// A non-conflict storage failure.
    #[error("store error: {0}")]
    Store(StoreError),

    /// A bug or unclassified failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WorkflowError {
    /// Shorthand for a not-found error on any displayable identifier.
    pub fn not_found(kind: ResourceKind, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// The conventional HTTP status code for this error, for use by a JSON
    /// transport layer.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::PaymentNotConfirmed { .. } => 400,
            Self::Forbidden(_) => 403,
            Self::NotFound { .. } => 404,
            Self::InsufficientStock { .. }
            | Self::InvalidTransition { .. }
            | Self::ConcurrencyConflict { .. } => 409,
            Self::ExternalService(_) => 502,
            Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    /// Whether a client may retry the same request (with the same
    /// idempotency key, where one applies) and expect it might succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExternalService(_) | Self::ConcurrencyConflict { .. }
        )
    }

}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { stream, .. } => Self::ConcurrencyConflict {
                streams: vec![stream],
            },
            other => Self::Store(other),
        }
    }
}

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result alias for workflow operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Convenience used by order-placement paths to surface a stock shortfall
/// that names the failing product.
pub(crate) fn insufficient_stock(
    product_id: &ProductId,
    name: &str,
    requested: u32,
    available: u32,
) -> WorkflowError {
    WorkflowError::InsufficientStock {
        product_id: product_id.clone(),
        name: name.to_string(),
        requested,
        available,
    }
}
