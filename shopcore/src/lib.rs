//! ShopCore — the order-placement and inventory-consistency core of an
//! auto-parts storefront.
//!
//! Every entity (product, cart, order, payment transaction) is an
//! append-only event stream with a version. Business operations are
//! commands that read a set of streams, fold their events into state,
//! decide, and append — atomically across all touched streams, guarded by
//! the versions that were read. That one mechanism carries the core's
//! guarantees:
//!
//! - **No oversell.** A stock debit commits only if the product stream is
//!   unchanged since the stock check. Two orders racing for the last unit
//!   conflict; exactly one wins, the other re-runs and sees empty stock.
//! - **All-or-nothing placement.** Order record, stock debits, ledger
//!   trail, and cart clearing are one append; no partial state is ever
//!   visible.
//! - **Exactly-once payment confirmation.** Order creation on the payment
//!   path is keyed by the processor's transaction id via a dedupe stream.
//! - **Frozen order lines.** Orders snapshot product name and price at
//!   placement; cart views deliberately join the live catalog instead.
//!
//! The storage seam is [`store::EventStore`]; the `shopcore-memory` crate
//! provides the in-memory implementation used in tests and development.
//! [`service::Storefront`] is the operation surface a transport layer
//! (JSON over HTTP) would sit on.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod domain;
pub mod errors;
pub mod executor;
pub mod service;
pub mod store;
pub mod types;

pub use domain::cart::{CartLine, CartLineView, CartState, CartView};
pub use domain::events::ShopEvent;
pub use domain::ids::{
    OrderId, OrderNumber, PaymentIntentId, ProductId, Role, TransactionId, UserId,
};
pub use domain::money::{DiscountPercent, Money, Quantity};
pub use domain::order::{
    Address, Order, OrderItemRequest, OrderLine, OrderStatus, PaymentDescriptor, PaymentMethod,
    PaymentStatus, RefundRecord,
};
pub use domain::payment::{
    IntentStatus, PaymentIntent, PaymentProcessor, ProcessorError, RefundReceipt, WebhookEvent,
    WebhookEventKind,
};
pub use domain::pricing::{PriceBreakdown, PricingPolicy, ShippingRule, TaxRule};
pub use domain::product::{Brand, Category, Product, ProductName};
pub use domain::stock::{StockChangeKind, StockLogEntry};
pub use errors::{ResourceKind, StoreError, StoreResult, WorkflowError, WorkflowResult};
pub use executor::{execute, Command, ExecutionOutcome, RetryOn, RetryPolicy};
pub use service::{CheckoutIntent, PlacedOrder, Storefront};
pub use store::{
    EventStore, EventToWrite, ExpectedVersion, ReadOptions, StoredEvent, StreamData, StreamEvents,
};
pub use types::{EventId, StreamId, StreamVersion, Timestamp};
