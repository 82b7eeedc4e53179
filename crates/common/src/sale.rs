//! Sale request value objects.

use serde::{Deserialize, Serialize};

use crate::ids::{CorrelationId, CustomerId};

/// Product identifier (SKU).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Creates a new product ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the product ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ProductId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A monetary amount in cents.
///
/// Stored as an integer to avoid floating-point rounding issues.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a monetary amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns zero.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.0
    }

    /// Multiplies the amount by a quantity.
    pub fn multiply(&self, quantity: u32) -> Self {
        Self(self.0 * i64::from(quantity))
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{}${}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// One line of a sale request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleItem {
    /// The product being sold.
    pub product_id: ProductId,
    /// Product name for display.
    pub product_name: String,
    /// Quantity sold.
    pub quantity: u32,
    /// Price per unit.
    pub unit_price: Money,
}

impl SaleItem {
    /// Creates a new sale item.
    pub fn new(
        product_id: impl Into<ProductId>,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            product_name: product_name.into(),
            quantity,
            unit_price,
        }
    }

    /// Returns the total price for this line.
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// An inbound sale request, the input that starts a saga.
///
/// The correlation ID is assigned by the submitting side and is the
/// de-duplication key: submitting the same request twice starts one saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRequest {
    /// Externally-visible correlation identifier.
    pub correlation_id: CorrelationId,
    /// The purchasing customer.
    pub customer_id: CustomerId,
    /// The items being sold.
    pub items: Vec<SaleItem>,
}

impl SaleRequest {
    /// Creates a new sale request.
    pub fn new(correlation_id: CorrelationId, customer_id: CustomerId, items: Vec<SaleItem>) -> Self {
        Self {
            correlation_id,
            customer_id,
            items,
        }
    }

    /// Returns the total amount across all items.
    pub fn total_amount(&self) -> Money {
        self.items.iter().map(SaleItem::line_total).sum()
    }

    /// Returns true if the request has at least one item.
    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }
}
