//! Identifier newtypes for the storefront domain.
//!
//! Raw strings from the transport layer are parsed into these exactly once,
//! at the boundary. Each identifier also knows the stream its entity lives
//! on, so stream naming stays in one place.

use nutype::nutype;
use uuid::Uuid;

use crate::types::StreamId;

fn uuid_suffix() -> String {
    let simple = Uuid::now_v7().simple().to_string().to_uppercase();
    simple[..10].to_string()
}

/// Catalog product identifier. Format: `PRD-` followed by uppercase
/// alphanumerics, e.g. `PRD-BRKPAD01`.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 50, regex = r"^PRD-[A-Z0-9]+$"),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize,
        TryFrom
    )
)]
pub struct ProductId(String);

impl ProductId {
    /// Mints a product id with a time-ordered random suffix.
    pub fn generate() -> Self {
        Self::try_new(format!("PRD-{}", uuid_suffix())).expect("generated product id is valid")
    }

    /// The stream holding this product's catalog and stock history.
    pub fn stream(&self) -> StreamId {
        StreamId::try_new(format!("product-{self}")).expect("product stream id fits the limits")
    }
}

/// Order identifier. Format: `ORD-` followed by uppercase alphanumerics.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 50, regex = r"^ORD-[A-Z0-9]+$"),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize,
        TryFrom
    )
)]
pub struct OrderId(String);

impl OrderId {
    /// Mints an order id with a time-ordered random suffix.
    pub fn generate() -> Self {
        Self::try_new(format!("ORD-{}", uuid_suffix())).expect("generated order id is valid")
    }

    /// The stream holding this order's lifecycle.
    pub fn stream(&self) -> StreamId {
        StreamId::try_new(format!("order-{self}")).expect("order stream id fits the limits")
    }
}

/// Human-readable order number shown to customers, unique per order.
/// Format: `AP-` followed by uppercase alphanumerics.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 32, regex = r"^AP-[A-Z0-9]+$"),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize,
        TryFrom
    )
)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Mints an order number. Uniqueness comes from the UUIDv7 suffix.
    pub fn generate() -> Self {
        Self::try_new(format!("AP-{}", uuid_suffix())).expect("generated order number is valid")
    }
}

/// Authenticated principal: a customer, an anonymous session, or a staff
/// member. Issued by the auth/session layer; opaque here.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 64, regex = r"^[A-Za-z0-9._:-]+$"),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize,
        TryFrom
    )
)]
pub struct UserId(String);

impl UserId {
    /// The stream holding this user's cart.
    pub fn cart_stream(&self) -> StreamId {
        StreamId::try_new(format!("cart-{self}")).expect("cart stream id fits the limits")
    }
}

/// Role attached to a request by the auth layer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A shopper (or anonymous session).
    Customer,
    /// Store staff: may mutate stock and order status.
    Staff,
    /// Administrator: everything staff can do.
    Admin,
}

impl Role {
    /// Whether this role may perform stock- and order-mutating staff
    /// operations.
    pub const fn is_staff(self) -> bool {
        matches!(self, Self::Staff | Self::Admin)
    }
}

/// Payment intent identifier issued by the external processor.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 128, regex = r"^[A-Za-z0-9_-]+$"),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize,
        TryFrom
    )
)]
pub struct PaymentIntentId(String);

impl PaymentIntentId {
    /// The stream tracking this intent's lifecycle on our side.
    pub fn stream(&self) -> StreamId {
        StreamId::try_new(format!("payment-intent-{self}"))
            .expect("payment intent stream id fits the limits")
    }
}

/// External transaction identifier reported by the processor on capture.
/// Doubles as the idempotency key for order creation.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 128, regex = r"^[A-Za-z0-9_-]+$"),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize,
        TryFrom
    )
)]
pub struct TransactionId(String);

impl TransactionId {
    /// The dedupe stream for this transaction. Creating it is what makes
    /// order creation exactly-once per transaction.
    pub fn stream(&self) -> StreamId {
        StreamId::try_new(format!("payment-txn-{self}"))
            .expect("payment transaction stream id fits the limits")
    }
}
