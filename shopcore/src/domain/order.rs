//! Orders: placement, status lifecycle, cancellation, refunds.
//!
//! Placement is the one operation where several entities must change
//! together. The [`PlaceOrder`] command reads the order stream, the cart
//! stream, and every referenced product stream, then emits the order
//! record, one stock debit per product, the ledger trail those debits carry,
//! and the cart clearing — all in one atomic append. A concurrent order that
//! drained stock first bumps a product stream version, which fails this
//! command's append and re-runs it against the committed stock level, so two
//! buyers can never both take the last unit.
//!
//! Line items freeze the product name and unit price at placement. Cart
//! views intentionally join the live catalog instead; the two behaviors are
//! both load-bearing and must not be unified.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::cart::CartState;
use crate::domain::events::ShopEvent;
use crate::domain::ids::{OrderId, OrderNumber, PaymentIntentId, ProductId, TransactionId, UserId};
use crate::domain::money::{Money, Quantity};
use crate::domain::payment::{IntentState, TransactionState};
use crate::domain::pricing::PricingPolicy;
use crate::domain::product::{CatalogState, ProductName};
use crate::errors::{insufficient_stock, ResourceKind, WorkflowError, WorkflowResult};
use crate::executor::Command;
use crate::store::{EventStore, ReadOptions, StoredEvent};
use crate::types::{StreamId, Timestamp};

/// Order lifecycle.
///
/// Forward path: pending → processing → shipped → delivered. Cancellation
/// is possible until fulfillment starts shipping; refunds once the order is
/// being processed or has been delivered. Delivered, cancelled, and
/// refunded are terminal (delivered only exits via refund).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Recorded, payment settled or on delivery, not yet picked.
    Pending,
    /// Being picked and packed.
    Processing,
    /// Handed to the carrier.
    Shipped,
    /// Received by the customer.
    Delivered,
    /// Cancelled before shipping; stock restored.
    Cancelled,
    /// Refunded after processing or delivery; stock restored.
    Refunded,
}

impl OrderStatus {
    /// Whether the state machine allows moving from `self` to `to`.
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Processing | Self::Cancelled)
                | (Self::Processing, Self::Shipped | Self::Cancelled | Self::Refunded)
                | (Self::Shipped, Self::Delivered)
                | (Self::Delivered, Self::Refunded)
        )
    }

    /// Whether an order in this status can still be cancelled.
    pub const fn is_cancellable(self) -> bool {
        self.can_transition_to(Self::Cancelled)
    }

    /// Whether an order in this status can be refunded.
    pub const fn is_refundable(self) -> bool {
        self.can_transition_to(Self::Refunded)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        };
        f.write_str(name)
    }
}

/// A postal address. Opaque to the workflow beyond basic completeness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Recipient name.
    pub recipient: String,
    /// Street address, first line.
    pub line1: String,
    /// Street address, second line.
    pub line2: Option<String>,
    /// City or locality.
    pub city: String,
    /// Postal code.
    pub postal_code: String,
    /// Country.
    pub country: String,
}

impl Address {
    /// Validates completeness: everything but `line2` must be non-blank.
    pub fn validate(&self) -> WorkflowResult<()> {
        let required = [
            ("recipient", &self.recipient),
            ("line1", &self.line1),
            ("city", &self.city),
            ("postal_code", &self.postal_code),
            ("country", &self.country),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(WorkflowError::Validation(format!(
                    "address field '{field}' must not be empty"
                )));
            }
        }
        Ok(())
    }
}

/// How the order was (or will be) paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Card payment through the external processor.
    Card,
    /// Payment collected on delivery.
    CashOnDelivery,
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Card => f.write_str("card"),
            Self::CashOnDelivery => f.write_str("cash_on_delivery"),
        }
    }
}

/// Settlement state recorded on the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Not yet collected (cash on delivery).
    Unpaid,
    /// Captured by the processor.
    Paid,
    /// Returned to the customer.
    Refunded,
}

/// Payment details frozen onto the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDescriptor {
    /// Payment method.
    pub method: PaymentMethod,
    /// Settlement state.
    pub status: PaymentStatus,
    /// External transaction id, when the processor captured one.
    pub transaction_id: Option<TransactionId>,
    /// Last four digits of the card, for receipts.
    pub card_last4: Option<String>,
}

impl PaymentDescriptor {
    /// Descriptor for a cash-on-delivery order.
    pub const fn cash_on_delivery() -> Self {
        Self {
            method: PaymentMethod::CashOnDelivery,
            status: PaymentStatus::Unpaid,
            transaction_id: None,
            card_last4: None,
        }
    }

    /// Descriptor for a card order already captured by the processor.
    pub const fn captured_card(transaction_id: TransactionId, card_last4: Option<String>) -> Self {
        Self {
            method: PaymentMethod::Card,
            status: PaymentStatus::Paid,
            transaction_id: Some(transaction_id),
            card_last4,
        }
    }
}

/// One line of an order: the product reference plus the name and unit price
/// frozen at placement. Never recomputed from the live catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Historical reference to the product.
    pub product_id: ProductId,
    /// Name at placement.
    pub name: ProductName,
    /// Unit price at placement.
    pub unit_price: Money,
    /// Units ordered.
    pub quantity: Quantity,
}

impl OrderLine {
    /// Price of this line: unit price times quantity.
    pub fn line_total(&self) -> WorkflowResult<Money> {
        self.unit_price.times(self.quantity)
    }
}

/// Refund details recorded when an order is refunded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRecord {
    /// Refund id issued by the processor (or an internal marker for
    /// cash-on-delivery refunds).
    pub refund_id: String,
    /// Amount returned.
    pub amount: Money,
    /// Why the refund was issued.
    pub reason: String,
    /// When it was issued.
    pub refunded_at: Timestamp,
}

/// A placed order. Immutable except for status and payment settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Identifier.
    pub id: OrderId,
    /// Human-readable order number.
    pub number: OrderNumber,
    /// Owning customer.
    pub customer: UserId,
    /// Frozen line items.
    pub lines: Vec<OrderLine>,
    /// Sum of line totals.
    pub subtotal: Money,
    /// Tax charged.
    pub tax: Money,
    /// Shipping charged.
    pub shipping_cost: Money,
    /// subtotal + tax + shipping.
    pub total: Money,
    /// Where the order ships.
    pub shipping_address: Address,
    /// Who is billed.
    pub billing_address: Address,
    /// Payment details.
    pub payment: PaymentDescriptor,
    /// Lifecycle status.
    pub status: OrderStatus,
    /// When the order was placed.
    pub placed_at: Timestamp,
}

impl Order {
    /// Checks the total invariant within the rounding tolerance.
    pub fn totals_consistent(&self) -> bool {
        self.subtotal
            .checked_add(self.tax)
            .and_then(|s| s.checked_add(self.shipping_cost))
            .map(|sum| sum.within_tolerance_of(self.total))
            .unwrap_or(false)
    }
}

/// Fold of one order stream.
#[derive(Debug, Clone, Default)]
pub struct OrderState {
    /// The order, if one has been placed on this stream.
    pub order: Option<Order>,
}

impl OrderState {
    /// Folds one event. Non-order events are ignored.
    pub fn apply(&mut self, event: &ShopEvent) {
        match event {
            ShopEvent::OrderPlaced { order } => {
                self.order = Some(order.clone());
            }
            ShopEvent::OrderStatusChanged { status, .. } => {
                if let Some(order) = self.order.as_mut() {
                    order.status = *status;
                }
            }
            ShopEvent::OrderCancelled { .. } => {
                if let Some(order) = self.order.as_mut() {
                    order.status = OrderStatus::Cancelled;
                }
            }
            ShopEvent::OrderRefunded { .. } => {
                if let Some(order) = self.order.as_mut() {
                    order.status = OrderStatus::Refunded;
                    order.payment.status = PaymentStatus::Refunded;
                }
            }
            _ => {}
        }
    }
}

/// A requested line: what the client is allowed to specify. Prices and
/// names are deliberately absent; they are re-read from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemRequest {
    /// Product to order.
    pub product_id: ProductId,
    /// Units requested.
    pub quantity: Quantity,
}

/// Ties an order placement to a captured payment, making it exactly-once
/// per transaction id.
#[derive(Debug, Clone)]
pub struct PaymentClaim {
    /// The intent the customer paid.
    pub intent_id: PaymentIntentId,
    /// The processor's transaction id; keys the dedupe stream.
    pub transaction_id: TransactionId,
}

/// Places an order: snapshot prices, debit stock, clear the cart — one
/// atomic commit or a clean, specific error.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    /// Pre-minted order id.
    pub order_id: OrderId,
    /// Pre-minted human-readable number.
    pub order_number: OrderNumber,
    /// The buying customer.
    pub customer: UserId,
    /// Requested lines (client quantities, never client prices).
    pub items: Vec<OrderItemRequest>,
    /// Destination address.
    pub shipping_address: Address,
    /// Billing address.
    pub billing_address: Address,
    /// Payment details to freeze onto the order.
    pub payment: PaymentDescriptor,
    /// Tax and shipping rules.
    pub pricing: PricingPolicy,
    /// Placement time.
    pub placed_at: Timestamp,
    /// Whether to clear the customer's cart in the same commit. Reorders
    /// leave the cart alone.
    pub clear_cart: bool,
    /// Present on the payment-confirmation path.
    pub payment_claim: Option<PaymentClaim>,
}

/// Combined fold for order placement.
#[derive(Debug, Default)]
pub struct PlaceOrderState {
    order: OrderState,
    catalog: CatalogState,
    cart: CartState,
    transaction: TransactionState,
    intent: IntentState,
}

impl PlaceOrderState {
    /// The order id a previous confirmation of the same transaction
    /// recorded, if any.
    pub fn already_captured(&self) -> Option<&OrderId> {
        self.transaction.order_id.as_ref()
    }
}

#[async_trait]
impl Command for PlaceOrder {
    type State = PlaceOrderState;
    type Event = ShopEvent;

    fn name(&self) -> &'static str {
        "place-order"
    }

    fn read_streams(&self) -> Vec<StreamId> {
        let mut streams = vec![self.order_id.stream()];
        if self.clear_cart {
            streams.push(self.customer.cart_stream());
        }
        for item in &self.items {
            streams.push(item.product_id.stream());
        }
        if let Some(claim) = &self.payment_claim {
            streams.push(claim.transaction_id.stream());
            streams.push(claim.intent_id.stream());
        }
        streams
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<ShopEvent>) {
        state.order.apply(&event.payload);
        state.catalog.apply(&event.payload);
        state.cart.apply(&event.payload);
        state.transaction.apply(&event.payload);
        state.intent.apply(&event.payload);
    }

    async fn handle(&self, state: PlaceOrderState) -> WorkflowResult<Vec<(StreamId, ShopEvent)>> {
        // A repeated confirmation of the same transaction is a no-op; the
        // caller reads the recorded order id off the dedupe stream.
        if self.payment_claim.is_some() && state.already_captured().is_some() {
            return Ok(vec![]);
        }

        if state.order.order.is_some() {
            return Err(WorkflowError::Internal(format!(
                "order id {} is already in use",
                self.order_id
            )));
        }

        if self.items.is_empty() {
            return Err(WorkflowError::Validation(
                "an order requires at least one item".into(),
            ));
        }
        self.shipping_address.validate()?;
        self.billing_address.validate()?;

        // Merge duplicate product references so one conditional debit is
        // emitted per product.
        let mut merged: Vec<(ProductId, Quantity)> = Vec::new();
        for item in &self.items {
            match merged.iter_mut().find(|(id, _)| id == &item.product_id) {
                Some((_, quantity)) => *quantity = quantity.checked_add(item.quantity)?,
                None => merged.push((item.product_id.clone(), item.quantity)),
            }
        }

        let mut lines = Vec::with_capacity(merged.len());
        let mut subtotal = Money::zero();
        let mut events: Vec<(StreamId, ShopEvent)> = Vec::new();

        for (product_id, quantity) in &merged {
            let product = state.catalog.require(product_id)?;
            if !product.available {
                // Discontinued products are unresolvable for new orders.
                return Err(WorkflowError::not_found(ResourceKind::Product, product_id));
            }

            let requested = quantity.into_inner();
            if product.stock < requested {
                return Err(insufficient_stock(
                    product_id,
                    product.name.as_ref(),
                    requested,
                    product.stock,
                ));
            }

            let line = OrderLine {
                product_id: product_id.clone(),
                name: product.name.clone(),
                unit_price: product.price,
                quantity: *quantity,
            };
            subtotal = subtotal.checked_add(line.line_total()?)?;
            lines.push(line);

            events.push((
                product_id.stream(),
                ShopEvent::StockDebited {
                    product_id: product_id.clone(),
                    previous: product.stock,
                    stock: product.stock - requested,
                    order_id: self.order_id.clone(),
                    actor: self.customer.clone(),
                },
            ));
        }

        let breakdown = self.pricing.quote(subtotal)?;

        let order = Order {
            id: self.order_id.clone(),
            number: self.order_number.clone(),
            customer: self.customer.clone(),
            lines,
            subtotal: breakdown.subtotal,
            tax: breakdown.tax,
            shipping_cost: breakdown.shipping_cost,
            total: breakdown.total,
            shipping_address: self.shipping_address.clone(),
            billing_address: self.billing_address.clone(),
            payment: self.payment.clone(),
            status: OrderStatus::Pending,
            placed_at: self.placed_at,
        };

        events.push((self.order_id.stream(), ShopEvent::OrderPlaced { order }));

        if self.clear_cart && state.cart.exists {
            events.push((
                self.customer.cart_stream(),
                ShopEvent::CartCleared {
                    order_id: Some(self.order_id.clone()),
                },
            ));
        }

        if let Some(claim) = &self.payment_claim {
            events.push((
                claim.transaction_id.stream(),
                ShopEvent::PaymentCaptured {
                    transaction_id: claim.transaction_id.clone(),
                    order_id: self.order_id.clone(),
                },
            ));
            if !state.intent.confirmed {
                events.push((
                    claim.intent_id.stream(),
                    ShopEvent::PaymentIntentConfirmed {
                        intent_id: claim.intent_id.clone(),
                        transaction_id: claim.transaction_id.clone(),
                        webhook_event_id: None,
                    },
                ));
            }
        }

        Ok(events)
    }
}

/// Moves an order forward through the state machine. Cancellation and
/// refunds have their own commands because they also move stock.
#[derive(Debug, Clone)]
pub struct UpdateOrderStatus {
    /// Order to update.
    pub order_id: OrderId,
    /// Requested status.
    pub status: OrderStatus,
    /// Staff member making the change.
    pub actor: UserId,
}

#[async_trait]
impl Command for UpdateOrderStatus {
    type State = OrderState;
    type Event = ShopEvent;

    fn name(&self) -> &'static str {
        "update-order-status"
    }

    fn read_streams(&self) -> Vec<StreamId> {
        vec![self.order_id.stream()]
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<ShopEvent>) {
        state.apply(&event.payload);
    }

    async fn handle(&self, state: OrderState) -> WorkflowResult<Vec<(StreamId, ShopEvent)>> {
        let order = state
            .order
            .as_ref()
            .ok_or_else(|| WorkflowError::not_found(ResourceKind::Order, &self.order_id))?;

        if matches!(self.status, OrderStatus::Cancelled | OrderStatus::Refunded) {
            return Err(WorkflowError::Validation(format!(
                "status '{}' is set by the cancellation/refund operations, not directly",
                self.status
            )));
        }

        if !order.status.can_transition_to(self.status) {
            return Err(WorkflowError::InvalidTransition {
                from: order.status,
                to: self.status,
            });
        }

        Ok(vec![(
            self.order_id.stream(),
            ShopEvent::OrderStatusChanged {
                order_id: self.order_id.clone(),
                previous: order.status,
                status: self.status,
                actor: self.actor.clone(),
            },
        )])
    }
}

/// Cancels an order that has not shipped, restoring its stock.
#[derive(Debug, Clone)]
pub struct CancelOrder {
    /// Order to cancel.
    pub order_id: OrderId,
    /// Products the order references; determines the streams to lock.
    /// Line quantities come from the folded order, not from the caller.
    pub product_ids: Vec<ProductId>,
    /// Who asked for the cancellation.
    pub actor: UserId,
    /// Free-text reason recorded with the cancellation.
    pub reason: String,
}

/// Fold for cancellation and refund: the order plus its products.
#[derive(Debug, Default)]
pub struct OrderWithCatalogState {
    /// The order being acted on.
    pub order: OrderState,
    /// Stock levels of the order's products.
    pub catalog: CatalogState,
}

impl OrderWithCatalogState {
    fn apply(&mut self, event: &ShopEvent) {
        self.order.apply(event);
        self.catalog.apply(event);
    }
}

fn restore_events(
    order: &Order,
    catalog: &CatalogState,
    actor: &UserId,
) -> WorkflowResult<Vec<(StreamId, ShopEvent)>> {
    let mut events = Vec::with_capacity(order.lines.len());
    for line in &order.lines {
        let product = catalog.require(&line.product_id)?;
        let restored = product
            .stock
            .checked_add(line.quantity.into_inner())
            .ok_or_else(|| {
                WorkflowError::Internal(format!(
                    "stock overflow restoring {} units of {}",
                    line.quantity, line.product_id
                ))
            })?;
        events.push((
            line.product_id.stream(),
            ShopEvent::StockRestored {
                product_id: line.product_id.clone(),
                previous: product.stock,
                stock: restored,
                order_id: order.id.clone(),
                actor: actor.clone(),
            },
        ));
    }
    Ok(events)
}

#[async_trait]
impl Command for CancelOrder {
    type State = OrderWithCatalogState;
    type Event = ShopEvent;

    fn name(&self) -> &'static str {
        "cancel-order"
    }

    fn read_streams(&self) -> Vec<StreamId> {
        let mut streams = vec![self.order_id.stream()];
        streams.extend(self.product_ids.iter().map(ProductId::stream));
        streams
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<ShopEvent>) {
        state.apply(&event.payload);
    }

    async fn handle(
        &self,
        state: OrderWithCatalogState,
    ) -> WorkflowResult<Vec<(StreamId, ShopEvent)>> {
        let order = state
            .order
            .order
            .as_ref()
            .ok_or_else(|| WorkflowError::not_found(ResourceKind::Order, &self.order_id))?;

        if !order.status.is_cancellable() {
            return Err(WorkflowError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }

        let mut events = restore_events(order, &state.catalog, &self.actor)?;
        events.push((
            self.order_id.stream(),
            ShopEvent::OrderCancelled {
                order_id: self.order_id.clone(),
                actor: self.actor.clone(),
                reason: self.reason.clone(),
            },
        ));
        Ok(events)
    }
}

/// Records a refund that the payment processor has already accepted,
/// restoring stock and freezing the refund metadata onto the order.
#[derive(Debug, Clone)]
pub struct RecordRefund {
    /// Order being refunded.
    pub order_id: OrderId,
    /// Products the order references; determines the streams to lock.
    pub product_ids: Vec<ProductId>,
    /// Staff member issuing the refund.
    pub actor: UserId,
    /// Refund details from the processor.
    pub refund: RefundRecord,
}

#[async_trait]
impl Command for RecordRefund {
    type State = OrderWithCatalogState;
    type Event = ShopEvent;

    fn name(&self) -> &'static str {
        "record-refund"
    }

    fn read_streams(&self) -> Vec<StreamId> {
        let mut streams = vec![self.order_id.stream()];
        streams.extend(self.product_ids.iter().map(ProductId::stream));
        streams
    }

    fn apply(&self, state: &mut Self::State, event: &StoredEvent<ShopEvent>) {
        state.apply(&event.payload);
    }

    async fn handle(
        &self,
        state: OrderWithCatalogState,
    ) -> WorkflowResult<Vec<(StreamId, ShopEvent)>> {
        let order = state
            .order
            .order
            .as_ref()
            .ok_or_else(|| WorkflowError::not_found(ResourceKind::Order, &self.order_id))?;

        if !order.status.is_refundable() {
            return Err(WorkflowError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Refunded,
            });
        }

        let mut events = restore_events(order, &state.catalog, &self.actor)?;
        events.push((
            self.order_id.stream(),
            ShopEvent::OrderRefunded {
                order_id: self.order_id.clone(),
                actor: self.actor.clone(),
                refund: self.refund.clone(),
            },
        ));
        Ok(events)
    }
}

/// Reads the current state of one order.
pub async fn load_order<S>(store: &S, order_id: &OrderId) -> WorkflowResult<Order>
where
    S: EventStore<Event = ShopEvent>,
{
    let data = store
        .read_streams(&[order_id.stream()], &ReadOptions::all())
        .await?;

    let mut state = OrderState::default();
    for event in &data.events {
        state.apply(&event.payload);
    }

    state
        .order
        .ok_or_else(|| WorkflowError::not_found(ResourceKind::Order, order_id))
}
