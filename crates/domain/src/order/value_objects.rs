//! Value objects for the order domain.

use chrono::{DateTime, Utc};
use common::{AggregateId, ProductId};
use serde::{Deserialize, Serialize};

use super::{PaymentMethod, PaymentStatus, ReturnStatus, Stage};
use crate::money::Money;

/// Where a line's product comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "source", content = "id", rename_all = "snake_case")]
pub enum ProductRef {
    /// A product whose stock this system tracks.
    Catalog(ProductId),
    /// An item from an external catalog. No stock is reserved for it.
    External(String),
}

impl ProductRef {
    pub fn catalog_id(&self) -> Option<ProductId> {
        match self {
            ProductRef::Catalog(id) => Some(*id),
            ProductRef::External(_) => None,
        }
    }
}

impl std::fmt::Display for ProductRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductRef::Catalog(id) => write!(f, "{id}"),
            ProductRef::External(id) => write!(f, "ext:{id}"),
        }
    }
}

/// A line of an order. Lines are fixed once the order is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product: ProductRef,
    pub name: String,
    /// Used for sale lookup only.
    pub category: Option<String>,
    pub quantity: u32,
    pub unit_price: Money,
}

impl LineItem {
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Customer contact details captured when the order is placed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub stage: Stage,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnHistoryEntry {
    pub status: ReturnStatus,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub status: PaymentStatus,
    pub method: PaymentMethod,
    pub payment_id: Option<String>,
    pub payment_order_id: Option<String>,
    pub wallet_used: Money,
}

/// Human-readable order code: `ORD-` and eight uppercase hex digits.
pub fn order_code(order_id: AggregateId) -> String {
    let hex = order_id.as_uuid().simple().to_string();
    format!("ORD-{}", hex[..8].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_total_multiplies_quantity() {
        let line = LineItem {
            product: ProductRef::External("dj-12".into()),
            name: "Lamp".into(),
            category: None,
            quantity: 3,
            unit_price: Money::from_cents(1_250),
        };
        assert_eq!(line.line_total(), Money::from_cents(3_750));
        assert_eq!(line.product.catalog_id(), None);
    }

    #[test]
    fn order_code_format() {
        let code = order_code(AggregateId::new());
        assert!(code.starts_with("ORD-"));
        assert_eq!(code.len(), 12);
        assert!(code[4..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn product_ref_serializes_with_source_tag() {
        let json = serde_json::to_value(ProductRef::External("abc".into())).unwrap();
        assert_eq!(json["source"], "external");
        assert_eq!(json["id"], "abc");
    }
}
