//! The domain event vocabulary.
//!
//! Every mutation in the system is one of these, named in past tense.
//! Stock events always carry the previous and resulting level plus the
//! acting principal — that is what makes the product stream an audit
//! ledger without a second write.

use serde::{Deserialize, Serialize};

use crate::domain::ids::{OrderId, PaymentIntentId, ProductId, TransactionId, UserId};
use crate::domain::money::{Money, Quantity};
use crate::domain::order::{Order, OrderStatus, RefundRecord};
use crate::domain::product::Product;

/// Everything that can happen in the storefront core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShopEvent {
    /// A product entered the catalog, with its initial stock level.
    ProductRegistered {
        /// The full catalog entry.
        product: Product,
        /// Staff member who registered it.
        actor: UserId,
    },

    /// A product's list price changed. Placed orders keep their frozen
    /// prices.
    ProductPriceChanged {
        /// Which product.
        product_id: ProductId,
        /// Price before the change.
        previous: Money,
        /// Price after the change.
        price: Money,
    },

    /// A product was discontinued or re-listed (the soft delete).
    ProductAvailabilityChanged {
        /// Which product.
        product_id: ProductId,
        /// New availability flag.
        available: bool,
        /// Staff member who toggled it.
        actor: UserId,
    },

    /// Staff overwrote a stock level (manual correction).
    StockSet {
        /// Which product.
        product_id: ProductId,
        /// Level before the correction.
        previous: u32,
        /// Level after the correction.
        stock: u32,
        /// Staff member who recorded the count.
        actor: UserId,
    },

    /// Order placement took units out of stock.
    StockDebited {
        /// Which product.
        product_id: ProductId,
        /// Level before the debit.
        previous: u32,
        /// Level after the debit.
        stock: u32,
        /// The order the units went to.
        order_id: OrderId,
        /// The buying customer.
        actor: UserId,
    },

    /// Cancellation or refund put units back into stock.
    StockRestored {
        /// Which product.
        product_id: ProductId,
        /// Level before the restoration.
        previous: u32,
        /// Level after the restoration.
        stock: u32,
        /// The order the units came back from.
        order_id: OrderId,
        /// Who triggered the restoration.
        actor: UserId,
    },

    /// A line item was added to a cart (delta; folds merge per product).
    CartItemAdded {
        /// Which product.
        product_id: ProductId,
        /// Units added on top of any existing line.
        quantity: Quantity,
    },

    /// A cart line was overwritten with a new quantity.
    CartItemQuantitySet {
        /// Which product.
        product_id: ProductId,
        /// The new line quantity.
        quantity: Quantity,
    },

    /// A line item left the cart.
    CartItemRemoved {
        /// Which product.
        product_id: ProductId,
    },

    /// The cart was deleted, either explicitly or by order placement.
    CartCleared {
        /// The order that consumed the cart, when placement cleared it.
        order_id: Option<OrderId>,
    },

    /// An order was placed. Carries the full frozen record.
    OrderPlaced {
        /// The order as placed.
        order: Order,
    },

    /// An order moved forward through the state machine.
    OrderStatusChanged {
        /// Which order.
        order_id: OrderId,
        /// Status before.
        previous: OrderStatus,
        /// Status after.
        status: OrderStatus,
        /// Staff member who advanced it.
        actor: UserId,
    },

    /// An order was cancelled before shipping.
    OrderCancelled {
        /// Which order.
        order_id: OrderId,
        /// Who cancelled it.
        actor: UserId,
        /// Stated reason.
        reason: String,
    },

    /// An order was refunded.
    OrderRefunded {
        /// Which order.
        order_id: OrderId,
        /// Staff member who issued the refund.
        actor: UserId,
        /// Processor refund metadata.
        refund: RefundRecord,
    },

    /// A payment intent was opened with the processor for a cart total.
    PaymentIntentOpened {
        /// Processor-issued intent id.
        intent_id: PaymentIntentId,
        /// The paying customer.
        customer: UserId,
        /// Amount the intent was opened for.
        amount: Money,
    },

    /// The processor reported the intent as succeeded (webhook or
    /// synchronous confirmation).
    PaymentIntentConfirmed {
        /// Which intent.
        intent_id: PaymentIntentId,
        /// The capture's transaction id.
        transaction_id: TransactionId,
        /// Webhook delivery id, when a webhook carried the news; dedupes
        /// redeliveries.
        webhook_event_id: Option<String>,
    },

    /// The processor reported the intent as failed.
    PaymentIntentFailed {
        /// Which intent.
        intent_id: PaymentIntentId,
        /// Processor-reported reason.
        reason: String,
        /// Webhook delivery id, when a webhook carried the news.
        webhook_event_id: Option<String>,
    },

    /// A captured transaction was tied to a created order. Lives on the
    /// per-transaction dedupe stream; its presence is what makes repeated
    /// confirmations return the same order instead of creating another.
    PaymentCaptured {
        /// The processor transaction.
        transaction_id: TransactionId,
        /// The order it produced.
        order_id: OrderId,
    },
}
