//! Shared fixtures for the ShopCore integration tests: a configurable
//! fake payment processor, a collecting audit sink, and entity builders.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use shopcore::audit::{AuditEntry, AuditError, AuditSink};
use shopcore::domain::payment::{
    IntentStatus, PaymentIntent, PaymentProcessor, ProcessorError, RefundReceipt, WebhookEvent,
    WebhookEventKind,
};
use shopcore::{
    Address, Brand, Category, DiscountPercent, Money, PaymentIntentId, Product, ProductId,
    ProductName, Quantity, TransactionId, UserId,
};

/// Signature the fake processor accepts on webhooks.
pub const VALID_SIGNATURE: &str = "t=now,v1=valid";

/// Wire shape of the fake processor's webhook payloads.
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Delivery id.
    pub event_id: String,
    /// `payment_intent.succeeded` or `payment_intent.payment_failed`.
    pub kind: String,
    /// Intent the event concerns.
    pub intent_id: String,
    /// Transaction id on success events.
    pub transaction_id: Option<String>,
    /// Reason on failure events.
    pub reason: Option<String>,
}

/// Serializes a success webhook for an intent.
pub fn success_webhook(event_id: &str, intent_id: &PaymentIntentId, txn: &TransactionId) -> Vec<u8> {
    serde_json::to_vec(&WebhookPayload {
        event_id: event_id.to_string(),
        kind: "payment_intent.succeeded".to_string(),
        intent_id: intent_id.to_string(),
        transaction_id: Some(txn.to_string()),
        reason: None,
    })
    .expect("webhook payload serializes")
}

/// In-memory stand-in for the external payment processor.
///
/// Intents are created in `requires_payment`; tests flip them to
/// succeeded/failed to simulate the customer completing payment.
#[derive(Default)]
pub struct FakeProcessor {
    intents: Mutex<HashMap<PaymentIntentId, PaymentIntent>>,
    counter: AtomicU64,
    unreachable: AtomicBool,
    reject_refunds: AtomicBool,
    refunds: Mutex<Vec<(TransactionId, Money)>>,
}

impl FakeProcessor {
    /// A processor with no intents.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail as unreachable.
    pub fn go_dark(&self) {
        self.unreachable.store(true, Ordering::SeqCst);
    }

    /// Makes refund requests fail.
    pub fn reject_refunds(&self) {
        self.reject_refunds.store(true, Ordering::SeqCst);
    }

    /// Simulates the customer completing payment: the intent becomes
    /// succeeded and gains a transaction id. Returns that id.
    pub fn complete_payment(&self, intent_id: &PaymentIntentId) -> TransactionId {
        let mut intents = self.intents.lock().expect("lock poisoned");
        let intent = intents.get_mut(intent_id).expect("intent exists");
        let txn = TransactionId::try_new(format!("txn_{}", intent_id.as_ref()))
            .expect("transaction id is valid");
        intent.status = IntentStatus::Succeeded;
        intent.transaction_id = Some(txn.clone());
        intent.card_last4 = Some("4242".to_string());
        txn
    }

    /// Simulates a failed payment attempt.
    pub fn fail_payment(&self, intent_id: &PaymentIntentId) {
        let mut intents = self.intents.lock().expect("lock poisoned");
        let intent = intents.get_mut(intent_id).expect("intent exists");
        intent.status = IntentStatus::Failed;
    }

    /// Refunds the processor has accepted, in order.
    pub fn refunds(&self) -> Vec<(TransactionId, Money)> {
        self.refunds.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn create_intent(
        &self,
        amount: Money,
        _customer: &UserId,
    ) -> Result<PaymentIntent, ProcessorError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ProcessorError::Unreachable("connection refused".into()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = PaymentIntentId::try_new(format!("pi_{n}")).expect("intent id is valid");
        let intent = PaymentIntent {
            id: id.clone(),
            status: IntentStatus::RequiresPayment,
            amount,
            client_secret: format!("pi_{n}_secret"),
            transaction_id: None,
            card_last4: None,
        };
        self.intents
            .lock()
            .expect("lock poisoned")
            .insert(id, intent.clone());
        Ok(intent)
    }

    async fn retrieve_intent(
        &self,
        intent_id: &PaymentIntentId,
    ) -> Result<PaymentIntent, ProcessorError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ProcessorError::Unreachable("connection refused".into()));
        }
        self.intents
            .lock()
            .expect("lock poisoned")
            .get(intent_id)
            .cloned()
            .ok_or_else(|| ProcessorError::Rejected(format!("no such intent: {intent_id}")))
    }

    async fn refund(
        &self,
        transaction_id: &TransactionId,
        amount: Money,
    ) -> Result<RefundReceipt, ProcessorError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ProcessorError::Unreachable("connection refused".into()));
        }
        if self.reject_refunds.load(Ordering::SeqCst) {
            return Err(ProcessorError::Rejected("refunds disabled".into()));
        }
        let mut refunds = self.refunds.lock().expect("lock poisoned");
        refunds.push((transaction_id.clone(), amount));
        Ok(RefundReceipt {
            refund_id: format!("re_{}", refunds.len()),
            amount,
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookEvent, ProcessorError> {
        if signature != VALID_SIGNATURE {
            return Err(ProcessorError::InvalidSignature);
        }
        let payload: WebhookPayload = serde_json::from_slice(payload)
            .map_err(|e| ProcessorError::Rejected(format!("malformed webhook payload: {e}")))?;

        let kind = match payload.kind.as_str() {
            "payment_intent.succeeded" => WebhookEventKind::IntentSucceeded,
            "payment_intent.payment_failed" => WebhookEventKind::IntentFailed,
            other => {
                return Err(ProcessorError::Rejected(format!(
                    "unsupported webhook kind: {other}"
                )))
            }
        };

        Ok(WebhookEvent {
            event_id: payload.event_id,
            kind,
            intent_id: PaymentIntentId::try_new(payload.intent_id)
                .map_err(|e| ProcessorError::Rejected(e.to_string()))?,
            transaction_id: payload
                .transaction_id
                .map(TransactionId::try_new)
                .transpose()
                .map_err(|e| ProcessorError::Rejected(e.to_string()))?,
            failure_reason: payload.reason,
        })
    }
}

/// Audit sink that remembers every record, for assertions.
#[derive(Default)]
pub struct CollectingAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl CollectingAuditSink {
    /// An empty sink behind an `Arc`, ready to hand to a storefront.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Everything recorded so far.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl AuditSink for CollectingAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuditError> {
        self.entries.lock().expect("lock poisoned").push(entry);
        Ok(())
    }
}

/// Builds a catalog product.
pub fn product(id: &str, name: &str, price_cents: u64, stock: u32) -> Product {
    Product {
        id: pid(id),
        name: ProductName::try_new(name.to_string()).expect("product name is valid"),
        brand: Brand::try_new("Bosch".to_string()).expect("brand is valid"),
        category: Category::try_new("brakes".to_string()).expect("category is valid"),
        price: Money::from_cents(price_cents).expect("price is valid"),
        stock,
        available: true,
        discount: DiscountPercent::default(),
        image_url: Some(format!("https://img.example/{id}.jpg")),
    }
}

/// Parses a product id.
pub fn pid(id: &str) -> ProductId {
    ProductId::try_new(id.to_string()).expect("product id is valid")
}

/// Parses a user id.
pub fn user(id: &str) -> UserId {
    UserId::try_new(id.to_string()).expect("user id is valid")
}

/// Builds a line-item quantity.
pub fn qty(n: u32) -> Quantity {
    Quantity::try_new(n).expect("quantity is valid")
}

/// Builds cents.
pub fn cents(c: u64) -> Money {
    Money::from_cents(c).expect("amount is valid")
}

/// The storefront type the integration tests drive.
pub type Shop =
    shopcore::Storefront<shopcore_memory::InMemoryEventStore<shopcore::ShopEvent>, Arc<FakeProcessor>>;

/// Everything a test needs: the storefront plus handles to its
/// collaborators.
pub struct TestContext {
    /// The storefront under test.
    pub shop: Shop,
    /// Direct handle to the same store the storefront uses.
    pub store: shopcore_memory::InMemoryEventStore<shopcore::ShopEvent>,
    /// Handle to the fake processor.
    pub processor: Arc<FakeProcessor>,
    /// Handle to the collecting audit sink.
    pub audit: Arc<CollectingAuditSink>,
}

/// Builds a storefront over a fresh in-memory store with the given
/// pricing policy.
pub fn setup_with(pricing: shopcore::PricingPolicy) -> TestContext {
    let store = shopcore_memory::InMemoryEventStore::new();
    let processor = Arc::new(FakeProcessor::new());
    let audit = CollectingAuditSink::shared();
    let shop = shopcore::Storefront::new(store.clone(), Arc::clone(&processor))
        .with_pricing(pricing)
        .with_audit_sink(audit.clone());
    TestContext {
        shop,
        store,
        processor,
        audit,
    }
}

/// Builds a storefront with flat $5 tax and $10 shipping.
pub fn setup() -> TestContext {
    setup_with(shopcore::PricingPolicy::flat(cents(500), cents(1000)))
}

/// Registers a product through the staff surface.
pub async fn seed_product(ctx: &TestContext, entry: Product) {
    ctx.shop
        .register_product(&user("staff-1"), shopcore::Role::Staff, entry)
        .await
        .expect("product registration succeeds");
}

/// A complete shipping/billing address.
pub fn address() -> Address {
    Address {
        recipient: "Avery Lane".to_string(),
        line1: "12 Gasket Way".to_string(),
        line2: None,
        city: "Springfield".to_string(),
        postal_code: "49507".to_string(),
        country: "US".to_string(),
    }
}
