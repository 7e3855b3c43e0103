//! Per-product stock levels for catalog items tracked by this system.

use chrono::{DateTime, Utc};
use common::{AggregateId, ProductId};
use event_store::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::{Aggregate, DomainEvent};

/// Highest stock level a product may hold.
pub const MAX_STOCK_LEVEL: u32 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockError {
    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    #[error("product has no stock record")]
    ProductNotFound,

    #[error("product {0} is already registered")]
    AlreadyRegistered(ProductId),

    #[error("quantity must be positive and keep stock at most {}", MAX_STOCK_LEVEL)]
    InvalidQuantity,
}

impl StockError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            StockError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            StockError::ProductNotFound => "PRODUCT_NOT_FOUND",
            StockError::AlreadyRegistered(_) => "PRODUCT_ALREADY_REGISTERED",
            StockError::InvalidQuantity => "INVALID_QUANTITY",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StockEvent {
    StockRegistered(StockRegisteredData),
    StockReserved(StockMovementData),
    StockReleased(StockMovementData),
    StockReplenished(StockReplenishedData),
}

impl DomainEvent for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::StockRegistered(_) => "StockRegistered",
            StockEvent::StockReserved(_) => "StockReserved",
            StockEvent::StockReleased(_) => "StockReleased",
            StockEvent::StockReplenished(_) => "StockReplenished",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockRegisteredData {
    pub product_id: ProductId,
    pub name: String,
    pub category: String,
    pub quantity: u32,
    pub registered_at: DateTime<Utc>,
}

/// A reservation or release tied to the order that justified it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockMovementData {
    pub order_id: AggregateId,
    pub quantity: u32,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockReplenishedData {
    pub quantity: u32,
    pub at: DateTime<Utc>,
}

/// Stock level of one catalog product. `available` can never go below zero.
#[derive(Debug, Clone, Default)]
pub struct ProductStock {
    id: Option<ProductId>,
    version: Version,
    name: String,
    category: String,
    available: u32,
}

impl ProductStock {
    pub fn aggregate_id(product_id: ProductId) -> AggregateId {
        AggregateId::from(product_id)
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn available(&self) -> u32 {
        self.available
    }
}

// Command methods
impl ProductStock {
    pub fn register(
        &self,
        product_id: ProductId,
        name: impl Into<String>,
        category: impl Into<String>,
        quantity: u32,
    ) -> Result<Vec<StockEvent>, StockError> {
        if self.id.is_some() {
            return Err(StockError::AlreadyRegistered(product_id));
        }
        if quantity > MAX_STOCK_LEVEL {
            return Err(StockError::InvalidQuantity);
        }
        Ok(vec![StockEvent::StockRegistered(StockRegisteredData {
            product_id,
            name: name.into(),
            category: category.into(),
            quantity,
            registered_at: Utc::now(),
        })])
    }

    pub fn reserve(
        &self,
        order_id: AggregateId,
        quantity: u32,
    ) -> Result<Vec<StockEvent>, StockError> {
        let product_id = self.require_registered()?;
        if quantity == 0 {
            return Err(StockError::InvalidQuantity);
        }
        if self.available < quantity {
            return Err(StockError::InsufficientStock {
                product_id,
                requested: quantity,
                available: self.available,
            });
        }
        Ok(vec![StockEvent::StockReserved(StockMovementData {
            order_id,
            quantity,
            at: Utc::now(),
        })])
    }

    pub fn release(
        &self,
        order_id: AggregateId,
        quantity: u32,
    ) -> Result<Vec<StockEvent>, StockError> {
        self.require_registered()?;
        if quantity == 0 {
            return Err(StockError::InvalidQuantity);
        }
        Ok(vec![StockEvent::StockReleased(StockMovementData {
            order_id,
            quantity,
            at: Utc::now(),
        })])
    }

    pub fn replenish(&self, quantity: u32) -> Result<Vec<StockEvent>, StockError> {
        self.require_registered()?;
        let within_limit = self
            .available
            .checked_add(quantity)
            .is_some_and(|level| level <= MAX_STOCK_LEVEL);
        if quantity == 0 || !within_limit {
            return Err(StockError::InvalidQuantity);
        }
        Ok(vec![StockEvent::StockReplenished(StockReplenishedData {
            quantity,
            at: Utc::now(),
        })])
    }

    fn require_registered(&self) -> Result<ProductId, StockError> {
        self.id.ok_or(StockError::ProductNotFound)
    }
}

impl Aggregate for ProductStock {
    type Event = StockEvent;
    type Error = StockError;

    fn aggregate_type() -> &'static str {
        "ProductStock"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id.map(AggregateId::from)
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            StockEvent::StockRegistered(data) => {
                self.id = Some(data.product_id);
                self.name = data.name;
                self.category = data.category;
                self.available = data.quantity;
            }
            StockEvent::StockReserved(data) => {
                self.available = self.available.saturating_sub(data.quantity);
            }
            StockEvent::StockReleased(data) => {
                self.available = self.available.saturating_add(data.quantity);
            }
            StockEvent::StockReplenished(data) => {
                self.available = self.available.saturating_add(data.quantity);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered(quantity: u32) -> (ProductStock, ProductId) {
        let product_id = ProductId::new();
        let mut stock = ProductStock::default();
        let events = stock
            .register(product_id, "Kettle", "Kitchen", quantity)
            .unwrap();
        stock.apply_events(events);
        (stock, product_id)
    }

    #[test]
    fn register_sets_initial_level() {
        let (stock, product_id) = registered(5);
        assert_eq!(stock.product_id(), Some(product_id));
        assert_eq!(stock.available(), 5);
        assert_eq!(stock.category(), "Kitchen");
        assert!(stock.register(product_id, "Kettle", "Kitchen", 1).is_err());
    }

    #[test]
    fn reserve_decrements_until_exhausted() {
        let (mut stock, product_id) = registered(2);
        let order = AggregateId::new();

        let events = stock.reserve(order, 2).unwrap();
        stock.apply_events(events);
        assert_eq!(stock.available(), 0);

        let err = stock.reserve(order, 1).unwrap_err();
        assert_eq!(
            err,
            StockError::InsufficientStock {
                product_id,
                requested: 1,
                available: 0
            }
        );
        assert_eq!(err.reason_code(), "INSUFFICIENT_STOCK");
    }

    #[test]
    fn release_and_replenish_restore_stock() {
        let (mut stock, _) = registered(1);
        let order = AggregateId::new();
        stock.apply_events(stock.reserve(order, 1).unwrap());
        stock.apply_events(stock.release(order, 1).unwrap());
        stock.apply_events(stock.replenish(4).unwrap());
        assert_eq!(stock.available(), 5);
    }

    #[test]
    fn stock_level_is_capped() {
        let (stock, _) = registered(5);
        assert_eq!(stock.replenish(u32::MAX).unwrap_err(), StockError::InvalidQuantity);
        assert_eq!(
            stock.replenish(MAX_STOCK_LEVEL - 4).unwrap_err().reason_code(),
            "INVALID_QUANTITY"
        );
        assert!(stock.replenish(MAX_STOCK_LEVEL - 5).is_ok());

        let fresh = ProductStock::default();
        assert_eq!(
            fresh
                .register(ProductId::new(), "Kettle", "Kitchen", MAX_STOCK_LEVEL + 1)
                .unwrap_err(),
            StockError::InvalidQuantity
        );
    }

    #[test]
    fn unregistered_product_cannot_move_stock() {
        let stock = ProductStock::default();
        assert!(matches!(
            stock.reserve(AggregateId::new(), 1),
            Err(StockError::ProductNotFound)
        ));
        assert_eq!(stock.replenish(0).unwrap_err().reason_code(), "PRODUCT_NOT_FOUND");
    }

    #[test]
    fn zero_quantities_are_rejected() {
        let (stock, _) = registered(3);
        assert_eq!(
            stock.reserve(AggregateId::new(), 0).unwrap_err(),
            StockError::InvalidQuantity
        );
    }
}
