//! The storefront facade: one struct exposing every operation of the core,
//! wired to a store, a payment processor, a pricing policy, and an audit
//! sink.
//!
//! Role checks happen here, at the boundary; commands below this layer
//! assume an authorized caller. Audit records are written after the
//! primary operation commits and are best-effort only.

use std::sync::Arc;

use crate::audit::{record_best_effort, AuditAction, AuditEntry, AuditSink, TracingAuditSink};
use crate::domain::cart::{
    load_cart, AddCartItem, CartState, CartView, ClearCart, RemoveCartItem, SetCartItemQuantity,
};
use crate::domain::events::ShopEvent;
use crate::domain::ids::{OrderId, OrderNumber, PaymentIntentId, ProductId, Role, TransactionId, UserId};
use crate::domain::money::{Money, Quantity};
use crate::domain::order::{
    load_order, Address, CancelOrder, Order, OrderItemRequest, OrderStatus, PaymentClaim,
    PaymentDescriptor, PaymentMethod, PaymentStatus, PlaceOrder, RecordRefund, RefundRecord,
    UpdateOrderStatus,
};
use crate::domain::payment::{
    ApplyWebhook, IntentState, IntentStatus, OpenPaymentIntent, PaymentProcessor, TransactionState,
};
use crate::domain::pricing::PricingPolicy;
use crate::domain::product::{
    load_product, Product, RegisterProduct, SetAvailability, SetStock, UpdatePrice,
};
use crate::domain::stock::{self, StockLogEntry};
use crate::errors::{insufficient_stock, ResourceKind, WorkflowError, WorkflowResult};
use crate::executor::{execute, RetryPolicy};
use crate::store::{EventStore, ReadOptions};
use crate::types::Timestamp;

/// What a successful placement returns to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedOrder {
    /// The order's identifier.
    pub order_id: OrderId,
    /// The human-readable order number.
    pub order_number: OrderNumber,
    /// The charged total.
    pub total: Money,
}

/// What opening a checkout intent returns to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutIntent {
    /// Processor-issued intent id.
    pub intent_id: PaymentIntentId,
    /// Secret the browser uses to complete payment.
    pub client_secret: String,
    /// Sum of line totals at current prices.
    pub subtotal: Money,
    /// Tax that will be charged.
    pub tax: Money,
    /// Shipping that will be charged.
    pub shipping_cost: Money,
    /// Amount the intent was opened for.
    pub total: Money,
}

/// The storefront core.
pub struct Storefront<S, P> {
    store: S,
    processor: P,
    pricing: PricingPolicy,
    audit: Arc<dyn AuditSink>,
    retry: RetryPolicy,
}

impl<S, P> Storefront<S, P>
where
    S: EventStore<Event = ShopEvent>,
    P: PaymentProcessor,
{
    /// Wires a storefront with default pricing, retry, and audit sink.
    pub fn new(store: S, processor: P) -> Self {
        Self {
            store,
            processor,
            pricing: PricingPolicy::default(),
            audit: Arc::new(TracingAuditSink),
            retry: RetryPolicy::new(),
        }
    }

    /// Replaces the pricing policy.
    #[must_use]
    pub fn with_pricing(mut self, pricing: PricingPolicy) -> Self {
        self.pricing = pricing;
        self
    }

    /// Replaces the audit sink.
    #[must_use]
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // ----- catalog management -----

    /// Adds a product to the catalog. Staff only.
    pub async fn register_product(
        &self,
        actor: &UserId,
        role: Role,
        product: Product,
    ) -> WorkflowResult<()> {
        require_staff(role)?;
        let command = RegisterProduct {
            product,
            actor: actor.clone(),
        };
        execute(&self.store, &command, &self.retry).await?;
        Ok(())
    }

    /// Manually corrects a stock level. Staff only; order fulfillment never
    /// goes through here.
    pub async fn set_stock(
        &self,
        actor: &UserId,
        role: Role,
        product_id: &ProductId,
        stock: u32,
    ) -> WorkflowResult<()> {
        require_staff(role)?;
        let command = SetStock {
            product_id: product_id.clone(),
            stock,
            actor: actor.clone(),
        };
        execute(&self.store, &command, &self.retry).await?;
        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(
                actor.clone(),
                AuditAction::StockAdjusted,
                "product",
                product_id,
                format!("stock set to {stock}"),
                true,
            ),
        )
        .await;
        Ok(())
    }

    /// Discontinues or re-lists a product (the soft delete). Staff only.
    pub async fn set_availability(
        &self,
        actor: &UserId,
        role: Role,
        product_id: &ProductId,
        available: bool,
    ) -> WorkflowResult<()> {
        require_staff(role)?;
        let command = SetAvailability {
            product_id: product_id.clone(),
            available,
            actor: actor.clone(),
        };
        execute(&self.store, &command, &self.retry).await?;
        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(
                actor.clone(),
                AuditAction::AvailabilityChanged,
                "product",
                product_id,
                format!("available set to {available}"),
                true,
            ),
        )
        .await;
        Ok(())
    }

    /// Changes a product's list price. Staff only. Frozen order lines are
    /// unaffected.
    pub async fn update_price(
        &self,
        _actor: &UserId,
        role: Role,
        product_id: &ProductId,
        price: Money,
    ) -> WorkflowResult<()> {
        require_staff(role)?;
        let command = UpdatePrice {
            product_id: product_id.clone(),
            price,
        };
        execute(&self.store, &command, &self.retry).await?;
        Ok(())
    }

    /// Reads one product.
    pub async fn product(&self, product_id: &ProductId) -> WorkflowResult<Product> {
        load_product(&self.store, product_id).await
    }

    // ----- cart -----

    /// Adds units of a product to the caller's cart and returns the
    /// refreshed cart view.
    pub async fn add_item(
        &self,
        owner: &UserId,
        product_id: &ProductId,
        quantity: Quantity,
    ) -> WorkflowResult<CartView> {
        let command = AddCartItem {
            owner: owner.clone(),
            product_id: product_id.clone(),
            quantity,
        };
        execute(&self.store, &command, &self.retry).await?;
        load_cart(&self.store, owner).await
    }

    /// Overwrites a line's quantity; zero behaves like removal.
    pub async fn update_item_quantity(
        &self,
        owner: &UserId,
        product_id: &ProductId,
        quantity: u32,
    ) -> WorkflowResult<CartView> {
        let command = SetCartItemQuantity {
            owner: owner.clone(),
            product_id: product_id.clone(),
            quantity,
        };
        execute(&self.store, &command, &self.retry).await?;
        load_cart(&self.store, owner).await
    }

    /// Removes a line. Succeeds even when the line is already gone.
    pub async fn remove_item(
        &self,
        owner: &UserId,
        product_id: &ProductId,
    ) -> WorkflowResult<CartView> {
        let command = RemoveCartItem {
            owner: owner.clone(),
            product_id: product_id.clone(),
        };
        execute(&self.store, &command, &self.retry).await?;
        load_cart(&self.store, owner).await
    }

    /// Reads the caller's cart, joined with live catalog data. Never fails
    /// for a missing cart; the empty shape comes back instead.
    pub async fn cart(&self, owner: &UserId) -> WorkflowResult<CartView> {
        load_cart(&self.store, owner).await
    }

    /// Deletes the caller's cart.
    pub async fn clear_cart(&self, owner: &UserId) -> WorkflowResult<()> {
        let command = ClearCart {
            owner: owner.clone(),
        };
        execute(&self.store, &command, &self.retry).await?;
        Ok(())
    }

    // ----- orders -----

    /// Places an order for the given items: prices and names are frozen
    /// from the live catalog, stock is debited, the ledger trail is
    /// written, and the caller's cart is cleared — atomically.
    pub async fn place_order(
        &self,
        customer: &UserId,
        items: Vec<OrderItemRequest>,
        shipping_address: Address,
        billing_address: Address,
        method: PaymentMethod,
    ) -> WorkflowResult<PlacedOrder> {
        let payment = PaymentDescriptor {
            method,
            status: PaymentStatus::Unpaid,
            transaction_id: None,
            card_last4: None,
        };
        let command = self.build_order(customer, items, shipping_address, billing_address, payment);
        let placed = self.submit_order(&command).await?;

        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(
                customer.clone(),
                AuditAction::OrderPlaced,
                "order",
                &placed.order_id,
                format!("number {}, total {}", placed.order_number, placed.total),
                true,
            ),
        )
        .await;
        Ok(placed)
    }

    /// Reads one order.
    pub async fn order(&self, order_id: &OrderId) -> WorkflowResult<Order> {
        load_order(&self.store, order_id).await
    }

    /// Advances an order through the forward state machine. Staff only.
    pub async fn update_order_status(
        &self,
        actor: &UserId,
        role: Role,
        order_id: &OrderId,
        status: OrderStatus,
    ) -> WorkflowResult<()> {
        require_staff(role)?;
        let command = UpdateOrderStatus {
            order_id: order_id.clone(),
            status,
            actor: actor.clone(),
        };
        execute(&self.store, &command, &self.retry).await?;
        Ok(())
    }

    /// Cancels an order that has not shipped, restoring its stock.
    /// Customers may cancel their own orders; staff may cancel any.
    pub async fn cancel_order(
        &self,
        actor: &UserId,
        role: Role,
        order_id: &OrderId,
        reason: impl Into<String>,
    ) -> WorkflowResult<()> {
        let order = load_order(&self.store, order_id).await?;
        if !role.is_staff() && order.customer != *actor {
            return Err(WorkflowError::Forbidden(
                "only the owning customer or staff may cancel an order".into(),
            ));
        }

        let command = CancelOrder {
            order_id: order_id.clone(),
            product_ids: order.lines.iter().map(|l| l.product_id.clone()).collect(),
            actor: actor.clone(),
            reason: reason.into(),
        };
        execute(&self.store, &command, &self.retry).await?;

        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(
                actor.clone(),
                AuditAction::OrderCancelled,
                "order",
                order_id,
                format!("number {}", order.number),
                true,
            ),
        )
        .await;
        Ok(())
    }

    /// Places a fresh order with the same items as a previous one,
    /// re-snapshotting current prices and names. Discontinued products
    /// fail the whole reorder with `NotFound`.
    pub async fn reorder(
        &self,
        customer: &UserId,
        previous_order_id: &OrderId,
        shipping_address: Address,
        billing_address: Address,
        method: PaymentMethod,
    ) -> WorkflowResult<PlacedOrder> {
        let previous = load_order(&self.store, previous_order_id).await?;
        if previous.customer != *customer {
            return Err(WorkflowError::Forbidden(
                "only the owning customer may reorder an order".into(),
            ));
        }

        let items = previous
            .lines
            .iter()
            .map(|line| OrderItemRequest {
                product_id: line.product_id.clone(),
                quantity: line.quantity,
            })
            .collect();

        let payment = PaymentDescriptor {
            method,
            status: PaymentStatus::Unpaid,
            transaction_id: None,
            card_last4: None,
        };
        let mut command =
            self.build_order(customer, items, shipping_address, billing_address, payment);
        command.clear_cart = false;
        let placed = self.submit_order(&command).await?;

        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(
                customer.clone(),
                AuditAction::OrderPlaced,
                "order",
                &placed.order_id,
                format!("reorder of {previous_order_id}"),
                true,
            ),
        )
        .await;
        Ok(placed)
    }

    // ----- payment -----

    /// Re-validates the caller's cart against live stock, opens a payment
    /// intent for the computed total, and returns the client secret.
    pub async fn create_intent(&self, customer: &UserId) -> WorkflowResult<CheckoutIntent> {
        let cart = self.load_cart_state(customer).await?;
        if cart.lines.is_empty() {
            return Err(WorkflowError::Validation("cart is empty".into()));
        }

        let product_ids: Vec<ProductId> =
            cart.lines.iter().map(|l| l.product_id.clone()).collect();
        let catalog = crate::domain::product::load_catalog(&self.store, &product_ids).await?;

        let mut subtotal = Money::zero();
        for line in &cart.lines {
            let product = catalog.require(&line.product_id)?;
            if !product.available {
                return Err(WorkflowError::not_found(
                    ResourceKind::Product,
                    &line.product_id,
                ));
            }
            let requested = line.quantity.into_inner();
            if product.stock < requested {
                return Err(insufficient_stock(
                    &line.product_id,
                    product.name.as_ref(),
                    requested,
                    product.stock,
                ));
            }
            subtotal = subtotal.checked_add(product.price.times(line.quantity)?)?;
        }

        let breakdown = self.pricing.quote(subtotal)?;
        let intent = self
            .processor
            .create_intent(breakdown.total, customer)
            .await
            .map_err(WorkflowError::from)?;

        let command = OpenPaymentIntent {
            intent_id: intent.id.clone(),
            customer: customer.clone(),
            amount: breakdown.total,
        };
        execute(&self.store, &command, &self.retry).await?;

        Ok(CheckoutIntent {
            intent_id: intent.id,
            client_secret: intent.client_secret,
            subtotal: breakdown.subtotal,
            tax: breakdown.tax,
            shipping_cost: breakdown.shipping_cost,
            total: breakdown.total,
        })
    }

    /// Confirms a paid intent and creates the order, exactly once per
    /// processor transaction. Retrying after a timeout — or a webhook
    /// racing the client — returns the order the first confirmation
    /// created instead of creating another.
    pub async fn confirm_payment(
        &self,
        intent_id: &PaymentIntentId,
        shipping_address: Address,
        billing_address: Address,
    ) -> WorkflowResult<PlacedOrder> {
        let intent = self
            .processor
            .retrieve_intent(intent_id)
            .await
            .map_err(WorkflowError::from)?;

        if intent.status != IntentStatus::Succeeded {
            return Err(WorkflowError::PaymentNotConfirmed {
                intent_id: intent_id.clone(),
                status: intent.status.to_string(),
            });
        }
        let transaction_id = intent.transaction_id.clone().ok_or_else(|| {
            WorkflowError::ExternalService(
                "processor reported success without a transaction id".into(),
            )
        })?;

        // Fast path: this transaction already produced an order.
        if let Some(order_id) = self.captured_order(&transaction_id).await? {
            return self.placed_from(&order_id).await;
        }

        let intent_state = self.load_intent_state(intent_id).await?;
        let (customer, _amount) = intent_state.opened.ok_or_else(|| {
            WorkflowError::not_found(ResourceKind::PaymentIntent, intent_id)
        })?;

        let cart = self.load_cart_state(&customer).await?;
        let items: Vec<OrderItemRequest> = cart
            .lines
            .iter()
            .map(|line| OrderItemRequest {
                product_id: line.product_id.clone(),
                quantity: line.quantity,
            })
            .collect();
        if items.is_empty() {
            return Err(WorkflowError::Validation(
                "cart is empty; nothing to confirm".into(),
            ));
        }

        let payment =
            PaymentDescriptor::captured_card(transaction_id.clone(), intent.card_last4.clone());
        let mut command =
            self.build_order(&customer, items, shipping_address, billing_address, payment);
        command.payment_claim = Some(PaymentClaim {
            intent_id: intent_id.clone(),
            transaction_id: transaction_id.clone(),
        });

        let outcome = execute(&self.store, &command, &self.retry).await?;

        // Whether we created the order or lost the race to a concurrent
        // confirmation, the dedupe stream now names the order.
        let order_id = self
            .captured_order(&transaction_id)
            .await?
            .ok_or_else(|| {
                WorkflowError::Internal("payment capture left no order record".into())
            })?;

        if outcome.wrote_events() {
            record_best_effort(
                self.audit.as_ref(),
                AuditEntry::new(
                    customer.clone(),
                    AuditAction::OrderPlaced,
                    "order",
                    &order_id,
                    format!("paid via intent {intent_id}"),
                    true,
                ),
            )
            .await;
        }

        self.placed_from(&order_id).await
    }

    /// Refunds an order: asks the processor to return the money, then
    /// marks the order refunded and restores its stock. Staff only.
    pub async fn refund(
        &self,
        actor: &UserId,
        role: Role,
        order_id: &OrderId,
        amount: Option<Money>,
        reason: impl Into<String>,
    ) -> WorkflowResult<RefundRecord> {
        require_staff(role)?;
        let order = load_order(&self.store, order_id).await?;

        if !order.status.is_refundable() {
            return Err(WorkflowError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Refunded,
            });
        }

        let amount = amount.unwrap_or(order.total);
        if amount > order.total {
            return Err(WorkflowError::Validation(format!(
                "refund amount {amount} exceeds the order total {}",
                order.total
            )));
        }

        let refund_id = match &order.payment.transaction_id {
            Some(transaction_id) => {
                let receipt = self
                    .processor
                    .refund(transaction_id, amount)
                    .await
                    .map_err(WorkflowError::from)?;
                receipt.refund_id
            }
            // Nothing was captured externally (cash on delivery).
            None => format!("internal-{order_id}"),
        };

        let refund = RefundRecord {
            refund_id,
            amount,
            reason: reason.into(),
            refunded_at: Timestamp::now(),
        };

        let command = RecordRefund {
            order_id: order_id.clone(),
            product_ids: order.lines.iter().map(|l| l.product_id.clone()).collect(),
            actor: actor.clone(),
            refund: refund.clone(),
        };
        execute(&self.store, &command, &self.retry).await?;

        record_best_effort(
            self.audit.as_ref(),
            AuditEntry::new(
                actor.clone(),
                AuditAction::OrderRefunded,
                "order",
                order_id,
                format!("refund {} for {}", refund.refund_id, refund.amount),
                true,
            ),
        )
        .await;
        Ok(refund)
    }

    /// Verifies and applies a processor webhook. Redeliveries are no-ops.
    pub async fn handle_webhook(&self, payload: &[u8], signature: &str) -> WorkflowResult<()> {
        let event = self
            .processor
            .verify_webhook(payload, signature)
            .map_err(WorkflowError::from)?;
        let command = ApplyWebhook { event };
        execute(&self.store, &command, &self.retry).await?;
        Ok(())
    }

    // ----- stock ledger -----

    /// Recent stock movements for one product, newest first.
    pub async fn stock_ledger(
        &self,
        product_id: &ProductId,
        since: Option<Timestamp>,
        limit: usize,
    ) -> WorkflowResult<Vec<StockLogEntry>> {
        stock::recent(&self.store, product_id, since, limit).await
    }

    /// Recent stock movements across several products, newest first.
    pub async fn stock_ledger_for(
        &self,
        product_ids: &[ProductId],
        since: Option<Timestamp>,
        limit: usize,
    ) -> WorkflowResult<Vec<StockLogEntry>> {
        stock::recent_for_products(&self.store, product_ids, since, limit).await
    }

    // ----- internals -----

    fn build_order(
        &self,
        customer: &UserId,
        items: Vec<OrderItemRequest>,
        shipping_address: Address,
        billing_address: Address,
        payment: PaymentDescriptor,
    ) -> PlaceOrder {
        PlaceOrder {
            order_id: OrderId::generate(),
            order_number: OrderNumber::generate(),
            customer: customer.clone(),
            items,
            shipping_address,
            billing_address,
            payment,
            pricing: self.pricing.clone(),
            placed_at: Timestamp::now(),
            clear_cart: true,
            payment_claim: None,
        }
    }

    async fn submit_order(&self, command: &PlaceOrder) -> WorkflowResult<PlacedOrder> {
        execute(&self.store, command, &self.retry).await?;
        self.placed_from(&command.order_id).await
    }

    async fn placed_from(&self, order_id: &OrderId) -> WorkflowResult<PlacedOrder> {
        let order = load_order(&self.store, order_id).await?;
        Ok(PlacedOrder {
            order_id: order.id,
            order_number: order.number,
            total: order.total,
        })
    }

    async fn load_cart_state(&self, owner: &UserId) -> WorkflowResult<CartState> {
        let data = self
            .store
            .read_streams(&[owner.cart_stream()], &ReadOptions::all())
            .await?;
        let mut state = CartState::default();
        for event in &data.events {
            state.apply(&event.payload);
        }
        Ok(state)
    }

    async fn load_intent_state(
        &self,
        intent_id: &PaymentIntentId,
    ) -> WorkflowResult<IntentState> {
        let data = self
            .store
            .read_streams(&[intent_id.stream()], &ReadOptions::all())
            .await?;
        let mut state = IntentState::default();
        for event in &data.events {
            state.apply(&event.payload);
        }
        Ok(state)
    }

    async fn captured_order(
        &self,
        transaction_id: &TransactionId,
    ) -> WorkflowResult<Option<OrderId>> {
        let data = self
            .store
            .read_streams(&[transaction_id.stream()], &ReadOptions::all())
            .await?;
        let mut state = TransactionState::default();
        for event in &data.events {
            state.apply(&event.payload);
        }
        Ok(state.order_id)
    }
}

fn require_staff(role: Role) -> WorkflowResult<()> {
    if role.is_staff() {
        Ok(())
    } else {
        Err(WorkflowError::Forbidden("staff role required".into()))
    }
}
