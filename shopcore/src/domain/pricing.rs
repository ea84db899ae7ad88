//! Tax and shipping rules.
//!
//! These are configuration, not business logic: the order workflow asks
//! for a quote and freezes the result onto the order. Policies deserialize
//! from plain JSON config.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::money::Money;
use crate::errors::{WorkflowError, WorkflowResult};

/// How tax is computed from an order subtotal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaxRule {
    /// No tax.
    #[default]
    None,
    /// A fixed amount per order.
    Flat {
        /// The amount charged.
        amount: Money,
    },
    /// A percentage of the subtotal, e.g. `8.25`.
    Percent {
        /// The rate in percent.
        rate: Decimal,
    },
}

/// How shipping is charged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShippingRule {
    /// Always free.
    #[default]
    Free,
    /// A fixed amount per order.
    Flat {
        /// The amount charged.
        amount: Money,
    },
    /// Free above a subtotal threshold, flat below it.
    FreeOver {
        /// Subtotal at or above which shipping is free.
        threshold: Money,
        /// The amount charged below the threshold.
        amount: Money,
    },
}

/// The storefront's pricing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PricingPolicy {
    /// Tax rule.
    #[serde(default)]
    pub tax: TaxRule,
    /// Shipping rule.
    #[serde(default)]
    pub shipping: ShippingRule,
}

/// A computed quote: the numbers frozen onto an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceBreakdown {
    /// Sum of line totals.
    pub subtotal: Money,
    /// Tax charged.
    pub tax: Money,
    /// Shipping charged.
    pub shipping_cost: Money,
    /// subtotal + tax + shipping.
    pub total: Money,
}

impl PricingPolicy {
    /// Fixed tax and flat shipping, the common storefront setup.
    pub const fn flat(tax: Money, shipping: Money) -> Self {
        Self {
            tax: TaxRule::Flat { amount: tax },
            shipping: ShippingRule::Flat { amount: shipping },
        }
    }

    /// Quotes tax, shipping, and total for a subtotal.
    pub fn quote(&self, subtotal: Money) -> WorkflowResult<PriceBreakdown> {
        let tax = match &self.tax {
            TaxRule::None => Money::zero(),
            TaxRule::Flat { amount } => *amount,
            TaxRule::Percent { rate } => {
                if rate.is_sign_negative() {
                    return Err(WorkflowError::Validation(format!(
                        "tax rate cannot be negative: {rate}"
                    )));
                }
                let raw = (subtotal.amount() * rate / Decimal::ONE_HUNDRED).round_dp(2);
                Money::new(raw)?
            }
        };

        let shipping_cost = match &self.shipping {
            ShippingRule::Free => Money::zero(),
            ShippingRule::Flat { amount } => *amount,
            ShippingRule::FreeOver { threshold, amount } => {
                if subtotal >= *threshold {
                    Money::zero()
                } else {
                    *amount
                }
            }
        };

        let total = subtotal.checked_add(tax)?.checked_add(shipping_cost)?;
        Ok(PriceBreakdown {
            subtotal,
            tax,
            shipping_cost,
            total,
        })
    }
}
