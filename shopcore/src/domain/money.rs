//! Monetary amounts and quantities.
//!
//! `Money` wraps [`rust_decimal::Decimal`] so totals come out exact; the
//! floating point types never touch a price. Quantities are positive by
//! construction; bare `u32` is used only for stock levels, where zero is a
//! legitimate value.

use nutype::nutype;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{WorkflowError, WorkflowResult};

/// A non-negative amount of money with at most two decimal places.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Largest representable amount (100 million).
    pub const MAX: Decimal = Decimal::from_parts(100_000_000, 0, 0, false, 0);

    /// Tolerance used when checking the order total invariant.
    pub const ROUNDING_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

    /// Zero.
    pub const fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// Validates and wraps a decimal amount.
    pub fn new(amount: Decimal) -> WorkflowResult<Self> {
        if amount.is_sign_negative() {
            return Err(WorkflowError::Validation(format!(
                "money amount cannot be negative: {amount}"
            )));
        }
        if amount.scale() > 2 {
            return Err(WorkflowError::Validation(format!(
                "money amount cannot have more than 2 decimal places: {amount}"
            )));
        }
        if amount > Self::MAX {
            return Err(WorkflowError::Validation(format!(
                "money amount {amount} exceeds the maximum {}",
                Self::MAX
            )));
        }
        Ok(Self(amount))
    }

    /// Builds an amount from integer cents.
    pub fn from_cents(cents: u64) -> WorkflowResult<Self> {
        Self::new(Decimal::new(
            i64::try_from(cents).map_err(|_| {
                WorkflowError::Validation(format!("cent amount {cents} is out of range"))
            })?,
            2,
        ))
    }

    /// The underlying decimal.
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Integer cents, for processors that want minor units.
    pub fn to_cents(&self) -> u64 {
        (self.0 * Decimal::ONE_HUNDRED).to_u64().unwrap_or(0)
    }

    /// Addition with range validation.
    pub fn checked_add(self, other: Self) -> WorkflowResult<Self> {
        Self::new(self.0 + other.0)
    }

    /// Subtraction; fails when the result would be negative.
    pub fn checked_sub(self, other: Self) -> WorkflowResult<Self> {
        if other.0 > self.0 {
            return Err(WorkflowError::Validation(format!(
                "cannot subtract {other} from the smaller amount {self}"
            )));
        }
        Self::new(self.0 - other.0)
    }

    /// Unit price times a line quantity.
    pub fn times(self, quantity: Quantity) -> WorkflowResult<Self> {
        Self::new(self.0 * Decimal::from(quantity.into_inner()))
    }

    /// Whether two amounts agree within the rounding tolerance.
    pub fn within_tolerance_of(self, other: Self) -> bool {
        (self.0 - other.0).abs() <= Self::ROUNDING_TOLERANCE
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}

/// A line-item quantity: at least one, at most 9999 per line.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 9999),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize,
        TryFrom
    )
)]
pub struct Quantity(u32);

impl Quantity {
    /// Merges two line quantities, enforcing the per-line maximum.
    pub fn checked_add(self, other: Self) -> WorkflowResult<Self> {
        Self::try_new(self.into_inner() + other.into_inner())
            .map_err(|e| WorkflowError::Validation(e.to_string()))
    }
}

/// Catalog discount in whole percent, 0 to 100.
#[nutype(
    validate(less_or_equal = 100),
    default = 0,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize,
        TryFrom,
        Default
    )
)]
pub struct DiscountPercent(u8);

impl DiscountPercent {
    /// Applies this discount to a price, rounding to cents.
    pub fn apply_to(self, price: Money) -> Money {
        let keep = Decimal::from(100 - u32::from(self.into_inner())) / Decimal::ONE_HUNDRED;
        let discounted = (price.amount() * keep).round_dp(2);
        // Discounting a valid price cannot leave the valid range.
        Money::new(discounted).unwrap_or(price)
    }
}
