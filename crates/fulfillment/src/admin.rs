//! Coupon and sale administration.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{
    CommandHandler, Coupon, CouponDefinition, DomainError, Repository, Sale, SaleDefinition,
    SaleRegistry, UnitOfWork,
};
use event_store::EventStore;

use crate::discounts::DiscountResolver;
use crate::error::{FulfillmentError, Result};
use crate::retry::commit_with_retry;

#[derive(Clone)]
pub struct CouponAdmin<S> {
    store: S,
    repository: Repository<S>,
}

impl<S: EventStore + Clone> CouponAdmin<S> {
    pub fn new(store: S) -> Self {
        Self {
            repository: Repository::new(store.clone()),
            store,
        }
    }

    #[tracing::instrument(skip(self, definition), fields(code = %definition.code))]
    pub async fn create(&self, definition: CouponDefinition) -> Result<Coupon> {
        let handler: CommandHandler<S, Coupon> = CommandHandler::new(self.store.clone());
        let result = handler
            .execute(Coupon::id_for_code(&definition.code), |coupon| {
                coupon.create(definition.clone())
            })
            .await?;
        tracing::info!(code = result.aggregate.code(), "coupon created");
        Ok(result.aggregate)
    }

    pub async fn get(&self, code: &str) -> Result<Option<Coupon>> {
        Ok(self.repository.load_existing(Coupon::id_for_code(code)).await?)
    }

    /// Every coupon, newest first.
    pub async fn list(&self) -> Result<Vec<Coupon>> {
        let ids: BTreeSet<AggregateId> = self
            .store
            .get_events_by_type("CouponCreated")
            .await
            .map_err(DomainError::from)?
            .into_iter()
            .map(|e| e.aggregate_id)
            .collect();

        let mut coupons = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(coupon) = self.repository.load_existing::<Coupon>(id).await? {
                coupons.push(coupon);
            }
        }
        coupons.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(coupons)
    }

    /// Coupons a customer may browse right now.
    pub async fn list_public(&self, now: DateTime<Utc>) -> Result<Vec<Coupon>> {
        let mut coupons = self.list().await?;
        coupons.retain(|c| c.is_listed_for_customers(now));
        Ok(coupons)
    }

    #[tracing::instrument(skip(self))]
    pub async fn deactivate(&self, code: &str) -> Result<Coupon> {
        let handler: CommandHandler<S, Coupon> = CommandHandler::new(self.store.clone());
        let result = handler
            .execute_existing(Coupon::id_for_code(code), |coupon| coupon.deactivate())
            .await?;
        tracing::info!(code = result.aggregate.code(), "coupon deactivated");
        Ok(result.aggregate)
    }
}

/// Sale administration.
///
/// Activation goes through the [`SaleRegistry`], which keeps at most one
/// sale active: activating one deactivates the previous in the same commit.
#[derive(Clone)]
pub struct SaleAdmin<S> {
    repository: Repository<S>,
    discounts: DiscountResolver<S>,
    max_conflict_retries: u32,
}

impl<S: EventStore + Clone> SaleAdmin<S> {
    pub fn new(store: S, discounts: DiscountResolver<S>) -> Self {
        Self {
            repository: Repository::new(store),
            discounts,
            max_conflict_retries: domain::DEFAULT_CONFLICT_RETRIES,
        }
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    #[tracing::instrument(skip(self, definition), fields(slug = %definition.slug))]
    pub async fn create(&self, definition: SaleDefinition) -> Result<Sale> {
        let sale_id = Sale::id_for_slug(&definition.slug);
        let activate = definition.active;

        let sale = commit_with_retry(&self.repository, self.max_conflict_retries, || async {
            let mut sale: Sale = self.repository.load(sale_id).await?;
            let mut registry: SaleRegistry =
                self.repository.load(SaleRegistry::registry_id()).await?;

            let mut unit = UnitOfWork::new();
            let events = sale.create(definition.clone())?;
            unit.record(&mut sale, events)?;
            let events = registry.register(sale_id);
            unit.record(&mut registry, events)?;
            if activate {
                self.stage_activation(&mut unit, &mut registry, sale_id).await?;
            }
            Ok::<_, FulfillmentError>((unit, sale))
        })
        .await?;

        tracing::info!(%sale_id, active = activate, "sale created");
        self.discounts.invalidate_sale_cache().await;
        Ok(sale)
    }

    #[tracing::instrument(skip(self))]
    pub async fn activate(&self, sale_id: AggregateId) -> Result<Sale> {
        let sale = commit_with_retry(&self.repository, self.max_conflict_retries, || async {
            let mut sale: Sale = self.repository.get(sale_id).await?;
            let mut registry: SaleRegistry =
                self.repository.load(SaleRegistry::registry_id()).await?;

            let mut unit = UnitOfWork::new();
            let events = sale.activate()?;
            unit.record(&mut sale, events)?;
            self.stage_activation(&mut unit, &mut registry, sale_id).await?;
            Ok::<_, FulfillmentError>((unit, sale))
        })
        .await?;

        tracing::info!(%sale_id, "sale activated");
        self.discounts.invalidate_sale_cache().await;
        Ok(sale)
    }

    #[tracing::instrument(skip(self))]
    pub async fn deactivate(&self, sale_id: AggregateId) -> Result<Sale> {
        let sale = commit_with_retry(&self.repository, self.max_conflict_retries, || async {
            let mut sale: Sale = self.repository.get(sale_id).await?;
            let mut registry: SaleRegistry =
                self.repository.load(SaleRegistry::registry_id()).await?;

            let mut unit = UnitOfWork::new();
            let events = sale.deactivate()?;
            unit.record(&mut sale, events)?;
            if registry.active() == Some(sale_id) {
                let (events, _) = registry.set_active(None)?;
                unit.record(&mut registry, events)?;
            }
            Ok::<_, FulfillmentError>((unit, sale))
        })
        .await?;

        tracing::info!(%sale_id, "sale deactivated");
        self.discounts.invalidate_sale_cache().await;
        Ok(sale)
    }

    pub async fn get(&self, sale_id: AggregateId) -> Result<Option<Sale>> {
        Ok(self.repository.load_existing(sale_id).await?)
    }

    /// Every registered sale in registration order.
    pub async fn list(&self) -> Result<Vec<Sale>> {
        let registry: SaleRegistry = self.repository.load(SaleRegistry::registry_id()).await?;
        let mut sales = Vec::with_capacity(registry.sales().len());
        for id in registry.sales() {
            if let Some(sale) = self.repository.load_existing::<Sale>(*id).await? {
                sales.push(sale);
            }
        }
        Ok(sales)
    }

    /// The sale customers currently see, if any.
    pub async fn get_active(&self, now: DateTime<Utc>) -> Result<Option<Sale>> {
        self.discounts.active_sale(now).await
    }

    /// Points the registry at `sale_id` and switches off the previous sale.
    async fn stage_activation(
        &self,
        unit: &mut UnitOfWork,
        registry: &mut SaleRegistry,
        sale_id: AggregateId,
    ) -> Result<()> {
        let (events, previous) = registry.set_active(Some(sale_id))?;
        unit.record(registry, events)?;

        if let Some(previous) = previous.filter(|p| *p != sale_id) {
            let mut old: Sale = self.repository.get(previous).await?;
            let events = old.deactivate()?;
            unit.record(&mut old, events)?;
            tracing::info!(%previous, "previous sale deactivated");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use domain::{CategoryDiscount, CouponValue, Money, PricingPolicy, Rate};
    use event_store::InMemoryEventStore;

    use super::*;
    use crate::services::{ACTIVE_SALE_KEY, InMemoryCache};

    fn coupon(code: &str, public: bool, valid_to: DateTime<Utc>) -> CouponDefinition {
        CouponDefinition {
            code: code.into(),
            description: format!("{code} coupon"),
            value: CouponValue::Flat(Money::from_major(20)),
            max_discount: None,
            min_order: Money::zero(),
            usage_limit: None,
            per_user_limit: None,
            valid_from: Utc::now() - Duration::days(2),
            valid_to,
            public,
        }
    }

    fn sale(slug: &str, active: bool) -> SaleDefinition {
        let now = Utc::now();
        SaleDefinition {
            name: slug.to_uppercase(),
            slug: slug.into(),
            description: String::new(),
            categories: vec![CategoryDiscount {
                category: "Books".into(),
                discount: Rate::from_percent(10),
                prime_discount: Rate::zero(),
            }],
            starts_at: now - Duration::hours(1),
            ends_at: now + Duration::days(1),
            active,
        }
    }

    fn sale_admin(store: InMemoryEventStore, cache: InMemoryCache) -> SaleAdmin<InMemoryEventStore> {
        let discounts =
            DiscountResolver::new(store.clone(), Arc::new(cache), PricingPolicy::default());
        SaleAdmin::new(store, discounts)
    }

    #[tokio::test]
    async fn coupon_lifecycle() {
        let admin = CouponAdmin::new(InMemoryEventStore::new());
        let later = Utc::now() + Duration::days(1);
        admin.create(coupon("welcome", true, later)).await.unwrap();
        admin.create(coupon("STAFF", false, later)).await.unwrap();
        admin
            .create(coupon("OLD", true, Utc::now() - Duration::days(1)))
            .await
            .unwrap();

        let err = admin.create(coupon("WELCOME", true, later)).await.unwrap_err();
        assert_eq!(err.reason_code(), Some("COUPON_ALREADY_EXISTS"));

        assert_eq!(admin.list().await.unwrap().len(), 3);
        let public = admin.list_public(Utc::now()).await.unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].code(), "WELCOME");

        admin.deactivate("welcome").await.unwrap();
        assert!(admin.list_public(Utc::now()).await.unwrap().is_empty());
        assert!(!admin.get("WELCOME").await.unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn invalid_coupon_definition_is_rejected() {
        let admin = CouponAdmin::new(InMemoryEventStore::new());
        let mut def = coupon("BAD", true, Utc::now() + Duration::days(1));
        def.value = CouponValue::Percent(0);
        let err = admin.create(def).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn activating_a_sale_deactivates_the_previous_one() {
        let store = InMemoryEventStore::new();
        let admin = sale_admin(store, InMemoryCache::new());

        let first = admin.create(sale("monsoon", true)).await.unwrap();
        let second = admin.create(sale("diwali", false)).await.unwrap();
        let second_id = second.sale_id().unwrap();

        admin.activate(second_id).await.unwrap();

        let sales = admin.list().await.unwrap();
        assert_eq!(sales.len(), 2);
        let first = admin.get(first.sale_id().unwrap()).await.unwrap().unwrap();
        assert!(!first.is_active());
        let active = admin.get_active(Utc::now()).await.unwrap().unwrap();
        assert_eq!(active.sale_id(), Some(second_id));
    }

    #[tokio::test]
    async fn sale_changes_invalidate_the_cache() {
        let store = InMemoryEventStore::new();
        let cache = InMemoryCache::new();
        let admin = sale_admin(store, cache.clone());

        let sale = admin.create(sale("summer", true)).await.unwrap();
        assert!(admin.get_active(Utc::now()).await.unwrap().is_some());
        assert!(cache.contains(ACTIVE_SALE_KEY));

        admin.deactivate(sale.sale_id().unwrap()).await.unwrap();
        assert!(!cache.contains(ACTIVE_SALE_KEY));
        assert!(admin.get_active(Utc::now()).await.unwrap().is_none());
    }
}
