//! Inventory Guard: stock reservation staged inside a caller's unit of work.

use std::collections::BTreeMap;

use common::{AggregateId, ProductId};
use domain::{CommandHandler, LineItem, ProductStock, Repository, UnitOfWork};
use event_store::EventStore;

use crate::error::Result;

#[derive(Clone)]
pub struct InventoryGuard<S> {
    store: S,
    repository: Repository<S>,
}

/// Sums quantities per catalog product. External lines carry no stock.
fn quantities(lines: &[LineItem]) -> BTreeMap<ProductId, u32> {
    let mut totals = BTreeMap::new();
    for line in lines {
        if let Some(product_id) = line.product.catalog_id() {
            let entry = totals.entry(product_id).or_insert(0u32);
            *entry = entry.saturating_add(line.quantity);
        }
    }
    totals
}

impl<S: EventStore + Clone> InventoryGuard<S> {
    pub fn new(store: S) -> Self {
        Self {
            repository: Repository::new(store.clone()),
            store,
        }
    }

    /// Stages decrements for every catalog line.
    ///
    /// Returns the lines with categories filled in from the stock records,
    /// which sale pricing needs. Nothing persists until `unit` commits.
    pub async fn reserve(
        &self,
        unit: &mut UnitOfWork,
        order_id: AggregateId,
        lines: &[LineItem],
    ) -> Result<Vec<LineItem>> {
        let mut categories = BTreeMap::new();

        for (product_id, quantity) in quantities(lines) {
            let mut stock: ProductStock =
                self.repository.load(ProductStock::aggregate_id(product_id)).await?;
            let events = stock.reserve(order_id, quantity)?;
            unit.record(&mut stock, events)?;
            categories.insert(product_id, stock.category().to_string());
        }

        Ok(lines
            .iter()
            .cloned()
            .map(|mut line| {
                if line.category.is_none()
                    && let Some(category) = line
                        .product
                        .catalog_id()
                        .and_then(|id| categories.get(&id))
                {
                    line.category = Some(category.clone());
                }
                line
            })
            .collect())
    }

    /// Stages increments for every catalog line.
    pub async fn release(
        &self,
        unit: &mut UnitOfWork,
        order_id: AggregateId,
        lines: &[LineItem],
    ) -> Result<()> {
        for (product_id, quantity) in quantities(lines) {
            let mut stock: ProductStock =
                self.repository.load(ProductStock::aggregate_id(product_id)).await?;
            let events = stock.release(order_id, quantity)?;
            unit.record(&mut stock, events)?;
        }
        Ok(())
    }

    pub async fn get(&self, product_id: ProductId) -> Result<Option<ProductStock>> {
        Ok(self
            .repository
            .load_existing(ProductStock::aggregate_id(product_id))
            .await?)
    }

    #[tracing::instrument(skip(self, name, category))]
    pub async fn register(
        &self,
        product_id: ProductId,
        name: &str,
        category: &str,
        quantity: u32,
    ) -> Result<ProductStock> {
        let handler: CommandHandler<S, ProductStock> = CommandHandler::new(self.store.clone());
        let result = handler
            .execute(ProductStock::aggregate_id(product_id), |stock| {
                stock.register(product_id, name, category, quantity)
            })
            .await?;
        tracing::info!(%product_id, quantity, "stock registered");
        Ok(result.aggregate)
    }

    #[tracing::instrument(skip(self))]
    pub async fn replenish(&self, product_id: ProductId, quantity: u32) -> Result<ProductStock> {
        let handler: CommandHandler<S, ProductStock> = CommandHandler::new(self.store.clone())
            .with_conflict_retries(domain::DEFAULT_CONFLICT_RETRIES);
        let result = handler
            .execute(ProductStock::aggregate_id(product_id), |stock| {
                stock.replenish(quantity)
            })
            .await?;
        tracing::info!(%product_id, quantity, available = result.aggregate.available(), "stock replenished");
        Ok(result.aggregate)
    }
}
