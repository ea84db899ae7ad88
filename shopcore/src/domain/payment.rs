//! The payment adapter: external processor seam, intent lifecycle, and
//! the idempotency plumbing around payment-driven order creation.
//!
//! The processor is behind [`PaymentProcessor`]; everything it says is
//! treated as untrusted until verified (webhook signatures) or re-fetched
//! (intent status at confirmation time). Order creation on the payment
//! path is keyed by the processor's transaction id: the first confirmation
//! writes a [`ShopEvent::PaymentCaptured`] marker on the transaction's
//! dedupe stream, and every later confirmation — client retry or webhook
//! redelivery — reads that marker and returns the same order.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::events::ShopEvent;
use crate::domain::ids::{OrderId, PaymentIntentId, TransactionId, UserId};
use crate::domain::money::Money;
use crate::errors::{ResourceKind, WorkflowError, WorkflowResult};
use crate::executor::Command;
use crate::store::StoredEvent;
use crate::types::StreamId;

/// Status the processor reports for an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    /// Created; the customer has not completed payment.
    RequiresPayment,
    /// Payment submitted, not yet settled.
    Processing,
    /// Captured. Only this status permits order creation.
    Succeeded,
    /// Payment failed or was abandoned.
    Failed,
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RequiresPayment => "requires_payment",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// An intent as the processor describes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    /// Processor-issued id.
    pub id: PaymentIntentId,
    /// Current status.
    pub status: IntentStatus,
    /// Amount the intent covers.
    pub amount: Money,
    /// Secret the browser needs to complete payment.
    pub client_secret: String,
    /// Transaction id, present once captured.
    pub transaction_id: Option<TransactionId>,
    /// Last four digits of the card used, once known.
    pub card_last4: Option<String>,
}

/// Receipt for an accepted refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundReceipt {
    /// Processor-issued refund id.
    pub refund_id: String,
    /// Amount refunded.
    pub amount: Money,
}

/// A verified webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    /// Delivery id; processors redeliver, so handling dedupes on this.
    pub event_id: String,
    /// What happened.
    pub kind: WebhookEventKind,
    /// The intent the event concerns.
    pub intent_id: PaymentIntentId,
    /// Transaction id, on success events.
    pub transaction_id: Option<TransactionId>,
    /// Failure reason, on failure events.
    pub failure_reason: Option<String>,
}

/// The webhook event types this core consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookEventKind {
    /// `payment_intent.succeeded`
    IntentSucceeded,
    /// `payment_intent.payment_failed`
    IntentFailed,
}

/// Failures talking to the processor.
#[derive(Debug, Clone, Error)]
pub enum ProcessorError {
    /// Network-level failure; the caller may retry.
    #[error("payment processor unreachable: {0}")]
    Unreachable(String),
    /// The processor understood and refused the request.
    #[error("payment processor rejected the request: {0}")]
    Rejected(String),
    /// A webhook payload failed signature verification.
    #[error("webhook signature verification failed")]
    InvalidSignature,
}

impl From<ProcessorError> for WorkflowError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::InvalidSignature => {
                Self::Forbidden("webhook signature verification failed".into())
            }
            other => Self::ExternalService(other.to_string()),
        }
    }
}

/// The external payment processor.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Opens an intent for the given amount.
    async fn create_intent(
        &self,
        amount: Money,
        customer: &UserId,
    ) -> Result<PaymentIntent, ProcessorError>;

    /// Fetches the current state of an intent. Called at confirmation time;
    /// the processor, not the client, is the authority on success.
    async fn retrieve_intent(
        &self,
        intent_id: &PaymentIntentId,
    ) -> Result<PaymentIntent, ProcessorError>;

    /// Requests a refund against a captured transaction.
    async fn refund(
        &self,
        transaction_id: &TransactionId,
        amount: Money,
    ) -> Result<RefundReceipt, ProcessorError>;

    /// Verifies a webhook payload's signature and parses it. Unverified
    /// payloads never reach the workflow.
    fn verify_webhook(&self, payload: &[u8], signature: &str)
        -> Result<WebhookEvent, ProcessorError>;
}

#[async_trait]
impl<P> PaymentProcessor for std::sync::Arc<P>
where
    P: PaymentProcessor + ?Sized,
{
    async fn create_intent(
        &self,
        amount: Money,
        customer: &UserId,
    ) -> Result<PaymentIntent, ProcessorError> {
        (**self).create_intent(amount, customer).await
    }

    async fn retrieve_intent(
        &self,
        intent_id: &PaymentIntentId,
    ) -> Result<PaymentIntent, ProcessorError> {
        (**self).retrieve_intent(intent_id).await
    }

    async fn refund(
        &self,
        transaction_id: &TransactionId,
        amount: Money,
    ) -> Result<RefundReceipt, ProcessorError> {
        (**self).refund(transaction_id, amount).await
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookEvent, ProcessorError> {
        (**self).verify_webhook(payload, signature)
    }
}

/// Fold of one payment-intent stream.
#[derive(Debug, Clone, Default)]
pub struct IntentState {
    /// Customer and amount, once the intent has been opened on our side.
    pub opened: Option<(UserId, Money)>,
    /// Whether the processor has reported success.
    pub confirmed: bool,
    /// Whether the processor has reported failure.
    pub failed: bool,
    /// Transaction id from the success report.
    pub transaction_id: Option<TransactionId>,
    /// Webhook delivery ids already applied to this intent.
    pub seen_webhook_events: HashSet<String>,
}

impl IntentState {
    /// Folds one event. Non-intent events are ignored.
    pub fn apply(&mut self, event: &ShopEvent) {
        match event {
            ShopEvent::PaymentIntentOpened {
                customer, amount, ..
            } => {
                self.opened = Some((customer.clone(), *amount));
            }
            ShopEvent::PaymentIntentConfirmed {
                transaction_id,
                webhook_event_id,
                ..
            } => {
                self.confirmed = true;
                self.transaction_id = Some(transaction_id.clone());
                if let Some(id) = webhook_event_id {
                    self.seen_webhook_events.insert(id.clone());
                }
            }
            ShopEvent::PaymentIntentFailed {
                webhook_event_id, ..
            } => {
                self.failed = true;
                if let Some(id) = webhook_event_id {
                    self.seen_webhook_events.insert(id.clone());
                }
            }
            _ => {}
        }
    }
}

/// Fold of one transaction dedupe stream.
#[derive(Debug, Clone, Default)]
pub struct TransactionState {
    /// The order this transaction already produced, if any.
    pub order_id: Option<OrderId>,
}

impl TransactionState {
    /// Folds one event. Non-transaction events are ignored.
    pub fn apply(&mut self, event: &ShopEvent) {
        if let ShopEvent::PaymentCaptured { order_id, .. } = event {
            self.order_id = Some(order_id.clone());
        }
    }
}

/// Records that an intent was opened with the processor for a customer's
/// checkout.
#[derive(Debug, Clone)]
pub struct OpenPaymentIntent {
    /// Processor-issued intent id.
    pub intent_id: PaymentIntentId,
    /// The paying customer.
    pub customer: UserId,
    /// Amount the intent covers.
    pub amount: Money,
}

#[async_trait]
impl Command for OpenPaymentIntent {
    type State = IntentState;
    type Event = ShopEvent;

    fn name(&self) -> &'static str {
        "open-payment-intent"
    }

    fn read_streams(&self) -> Vec<StreamId> {
        vec![self.intent_id.stream()]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<ShopEvent>) {
        state.apply(&event.payload);
    }

    async fn handle(&self, state: IntentState) -> WorkflowResult<Vec<(StreamId, ShopEvent)>> {
        if state.opened.is_some() {
            return Err(WorkflowError::Validation(format!(
                "payment intent {} is already recorded",
                self.intent_id
            )));
        }

        Ok(vec![(
            self.intent_id.stream(),
            ShopEvent::PaymentIntentOpened {
                intent_id: self.intent_id.clone(),
                customer: self.customer.clone(),
                amount: self.amount,
            },
        )])
    }
}

/// Applies a verified webhook delivery to the intent it concerns.
/// Redeliveries of the same delivery id are no-ops.
#[derive(Debug, Clone)]
pub struct ApplyWebhook {
    /// The verified event.
    pub event: WebhookEvent,
}

#[async_trait]
impl Command for ApplyWebhook {
    type State = IntentState;
    type Event = ShopEvent;

    fn name(&self) -> &'static str {
        "apply-webhook"
    }

    fn read_streams(&self) -> Vec<StreamId> {
        vec![self.event.intent_id.stream()]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<ShopEvent>) {
        state.apply(&event.payload);
    }

    async fn handle(&self, state: IntentState) -> WorkflowResult<Vec<(StreamId, ShopEvent)>> {
        if state.opened.is_none() {
            return Err(WorkflowError::not_found(
                ResourceKind::PaymentIntent,
                &self.event.intent_id,
            ));
        }

        if state.seen_webhook_events.contains(&self.event.event_id) {
            return Ok(vec![]);
        }

        match self.event.kind {
            WebhookEventKind::IntentSucceeded => {
                if state.confirmed {
                    return Ok(vec![]);
                }
                let transaction_id = self.event.transaction_id.clone().ok_or_else(|| {
                    WorkflowError::ExternalService(
                        "success webhook arrived without a transaction id".into(),
                    )
                })?;
                Ok(vec![(
                    self.event.intent_id.stream(),
                    ShopEvent::PaymentIntentConfirmed {
                        intent_id: self.event.intent_id.clone(),
                        transaction_id,
                        webhook_event_id: Some(self.event.event_id.clone()),
                    },
                )])
            }
            WebhookEventKind::IntentFailed => {
                if state.failed {
                    return Ok(vec![]);
                }
                Ok(vec![(
                    self.event.intent_id.stream(),
                    ShopEvent::PaymentIntentFailed {
                        intent_id: self.event.intent_id.clone(),
                        reason: self
                            .event
                            .failure_reason
                            .clone()
                            .unwrap_or_else(|| "unspecified".into()),
                        webhook_event_id: Some(self.event.event_id.clone()),
                    },
                )])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent_id() -> PaymentIntentId {
        PaymentIntentId::try_new("pi_123".to_string()).unwrap()
    }

    fn txn() -> TransactionId {
        TransactionId::try_new("txn_456".to_string()).unwrap()
    }

    fn customer() -> UserId {
        UserId::try_new("user-42".to_string()).unwrap()
    }

    #[test]
    fn intent_state_tracks_the_lifecycle() {
        let mut state = IntentState::default();
        state.apply(&ShopEvent::PaymentIntentOpened {
            intent_id: intent_id(),
            customer: customer(),
            amount: Money::from_cents(11_500).unwrap(),
        });
        assert!(state.opened.is_some());
        assert!(!state.confirmed);

        state.apply(&ShopEvent::PaymentIntentConfirmed {
            intent_id: intent_id(),
            transaction_id: txn(),
            webhook_event_id: Some("evt_1".into()),
        });
        assert!(state.confirmed);
        assert_eq!(state.transaction_id, Some(txn()));
        assert!(state.seen_webhook_events.contains("evt_1"));
    }

    #[test]
    fn transaction_state_remembers_the_order() {
        let order_id = OrderId::generate();
        let mut state = TransactionState::default();
        state.apply(&ShopEvent::PaymentCaptured {
            transaction_id: txn(),
            order_id: order_id.clone(),
        });
        assert_eq!(state.order_id, Some(order_id));
    }

    #[test]
    fn processor_errors_map_to_the_workflow_taxonomy() {
        let err: WorkflowError = ProcessorError::Unreachable("timeout".into()).into();
        assert!(matches!(err, WorkflowError::ExternalService(_)));
        assert_eq!(err.status_code(), 502);

        let err: WorkflowError = ProcessorError::InvalidSignature.into();
        assert!(matches!(err, WorkflowError::Forbidden(_)));
        assert_eq!(err.status_code(), 403);
    }
}
