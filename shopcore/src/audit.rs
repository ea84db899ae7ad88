//! Best-effort audit trail.
//!
//! Audit records are a side effect of order creation, cancellation, and
//! refunds. They are fire-and-forget: a sink failure is logged and
//! swallowed, never surfaced to the caller and never a reason to roll
//! anything back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ids::UserId;
use crate::types::Timestamp;

/// What a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// An order was placed.
    OrderPlaced,
    /// An order was cancelled.
    OrderCancelled,
    /// An order was refunded.
    OrderRefunded,
    /// A stock level was manually corrected.
    StockAdjusted,
    /// A product was discontinued or re-listed.
    AvailabilityChanged,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::OrderPlaced => "order_placed",
            Self::OrderCancelled => "order_cancelled",
            Self::OrderRefunded => "order_refunded",
            Self::StockAdjusted => "stock_adjusted",
            Self::AvailabilityChanged => "availability_changed",
        };
        f.write_str(name)
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Acting principal.
    pub actor: UserId,
    /// What happened.
    pub action: AuditAction,
    /// Resource type, e.g. "order".
    pub resource: String,
    /// Resource identifier.
    pub resource_id: String,
    /// Free-form context.
    pub details: String,
    /// Whether the underlying operation succeeded.
    pub success: bool,
    /// When the record was made.
    pub at: Timestamp,
}

impl AuditEntry {
    /// Builds a record stamped now.
    pub fn new(
        actor: UserId,
        action: AuditAction,
        resource: impl Into<String>,
        resource_id: impl std::fmt::Display,
        details: impl Into<String>,
        success: bool,
    ) -> Self {
        Self {
            actor,
            action,
            resource: resource.into(),
            resource_id: resource_id.to_string(),
            details: details.into(),
            success,
            at: Timestamp::now(),
        }
    }
}

/// A sink failed to accept a record.
#[derive(Debug, Clone, Error)]
#[error("audit sink failure: {0}")]
pub struct AuditError(pub String);

/// Somewhere audit records go.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Accepts one record.
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError>;
}

/// Emits audit records as structured log events. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        tracing::info!(
            actor = %entry.actor,
            action = %entry.action,
            resource = %entry.resource,
            resource_id = %entry.resource_id,
            success = entry.success,
            details = %entry.details,
            "audit"
        );
        Ok(())
    }
}

/// Delivers a record, swallowing and logging any sink failure.
pub async fn record_best_effort(sink: &dyn AuditSink, entry: AuditEntry) {
    let action = entry.action;
    let resource_id = entry.resource_id.clone();
    if let Err(err) = sink.record(entry).await {
        tracing::warn!(
            action = %action,
            resource_id = %resource_id,
            error = %err,
            "audit record dropped"
        );
    }
}
