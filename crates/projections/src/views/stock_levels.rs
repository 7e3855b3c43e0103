//! Stock level read model for the admin inventory page.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, ProductId};
use domain::StockEvent;
use event_store::EventEnvelope;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::Result;
use crate::error::ProjectionError;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::ReadModel;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockLevel {
    pub product_id: ProductId,
    pub name: String,
    pub category: String,
    pub available: u32,
    /// Units currently held by orders: reservations minus releases.
    pub reserved: u32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct StockLevelsState {
    products: HashMap<AggregateId, StockLevel>,
    position: ProjectionPosition,
}

/// Available and reserved units per catalog product.
#[derive(Clone, Default)]
pub struct StockLevelsView {
    state: Arc<RwLock<StockLevelsState>>,
}

impl StockLevelsView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, product_id: ProductId) -> Option<StockLevel> {
        self.state
            .read()
            .await
            .products
            .get(&AggregateId::from(product_id))
            .cloned()
    }

    /// Every product, by category then name.
    pub async fn all(&self) -> Vec<StockLevel> {
        let state = self.state.read().await;
        let mut levels: Vec<_> = state.products.values().cloned().collect();
        levels.sort_by(|a, b| (&a.category, &a.name).cmp(&(&b.category, &b.name)));
        levels
    }

    /// Products at or below `threshold` units, emptiest first.
    pub async fn low_stock(&self, threshold: u32) -> Vec<StockLevel> {
        let mut levels = self.all().await;
        levels.retain(|l| l.available <= threshold);
        levels.sort_by_key(|l| l.available);
        levels
    }
}

#[async_trait]
impl Projection for StockLevelsView {
    fn name(&self) -> &'static str {
        "StockLevelsView"
    }

    fn aggregate_types(&self) -> &'static [&'static str] {
        &["ProductStock"]
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let stock_event: StockEvent = serde_json::from_value(event.payload.clone())
            .map_err(|e| ProjectionError::decode(&event.event_type, e))?;
        let id = event.aggregate_id;

        let mut state = self.state.write().await;
        match stock_event {
            StockEvent::StockRegistered(data) => {
                state.products.insert(
                    id,
                    StockLevel {
                        product_id: data.product_id,
                        name: data.name,
                        category: data.category,
                        available: data.quantity,
                        reserved: 0,
                        updated_at: data.registered_at,
                    },
                );
            }
            StockEvent::StockReserved(data) => {
                if let Some(level) = state.products.get_mut(&id) {
                    level.available = level.available.saturating_sub(data.quantity);
                    level.reserved += data.quantity;
                    level.updated_at = data.at;
                }
            }
            StockEvent::StockReleased(data) => {
                if let Some(level) = state.products.get_mut(&id) {
                    level.available += data.quantity;
                    level.reserved = level.reserved.saturating_sub(data.quantity);
                    level.updated_at = data.at;
                }
            }
            StockEvent::StockReplenished(data) => {
                if let Some(level) = state.products.get_mut(&id) {
                    level.available += data.quantity;
                    level.updated_at = data.at;
                }
            }
        }
        state.position = state.position.advance();
        Ok(())
    }

    async fn skip(&self) {
        let mut state = self.state.write().await;
        state.position = state.position.advance();
    }

    async fn position(&self) -> ProjectionPosition {
        self.state.read().await.position
    }

    async fn reset(&self) -> Result<()> {
        *self.state.write().await = StockLevelsState::default();
        Ok(())
    }
}

impl ReadModel for StockLevelsView {
    fn name(&self) -> &'static str {
        "StockLevelsView"
    }

    fn count(&self) -> usize {
        self.state.try_read().map(|s| s.products.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use domain::stock::{StockMovementData, StockRegisteredData, StockReplenishedData};
    use event_store::Version;

    use super::*;

    fn envelope(product_id: ProductId, version: i64, event: &StockEvent) -> EventEnvelope {
        use domain::DomainEvent;
        EventEnvelope::builder()
            .aggregate_id(AggregateId::from(product_id))
            .aggregate_type("ProductStock")
            .event_type(event.event_type())
            .version(Version::new(version))
            .payload(event)
            .unwrap()
            .build()
            .unwrap()
    }

    fn registered(product_id: ProductId, name: &str, quantity: u32) -> StockEvent {
        StockEvent::StockRegistered(StockRegisteredData {
            product_id,
            name: name.into(),
            category: "Garden".into(),
            quantity,
            registered_at: Utc::now(),
        })
    }

    fn movement(quantity: u32) -> StockMovementData {
        StockMovementData {
            order_id: AggregateId::new(),
            quantity,
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn tracks_reservations_releases_and_replenishment() {
        let view = StockLevelsView::new();
        let product_id = ProductId::new();

        let events = [
            registered(product_id, "Hose", 10),
            StockEvent::StockReserved(movement(4)),
            StockEvent::StockReleased(movement(1)),
            StockEvent::StockReplenished(StockReplenishedData {
                quantity: 5,
                at: Utc::now(),
            }),
        ];
        for (i, event) in events.iter().enumerate() {
            view.handle(&envelope(product_id, i as i64 + 1, event))
                .await
                .unwrap();
        }

        let level = view.get(product_id).await.unwrap();
        assert_eq!(level.available, 12);
        assert_eq!(level.reserved, 3);
        assert_eq!(view.position().await.events_seen, 4);
    }

    #[tokio::test]
    async fn low_stock_lists_emptiest_first() {
        let view = StockLevelsView::new();
        for (name, quantity) in [("Rake", 2), ("Spade", 20), ("Shears", 0)] {
            let product_id = ProductId::new();
            view.handle(&envelope(product_id, 1, &registered(product_id, name, quantity)))
                .await
                .unwrap();
        }

        let low: Vec<_> = view.low_stock(5).await.into_iter().map(|l| l.name).collect();
        assert_eq!(low, vec!["Shears", "Rake"]);
        assert_eq!(view.all().await.len(), 3);
    }
}
