//! Coupon validation and the sale and membership price overlays.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use domain::{
    CommandHandler, Coupon, CouponDefinition, CouponRejection, Discounts, LineItem, Money,
    OrderTotals, PricingPolicy, Repository, Sale, SaleRegistry, pricing,
};
use event_store::EventStore;
use serde::Serialize;

use crate::error::Result;
use crate::services::{ACTIVE_SALE_KEY, Cache, HOME_KEY, UserProfile};

/// Cached marker for "no sale is active".
const NO_SALE: &str = "null";

/// A coupon that applies to a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponQuote {
    pub coupon_id: AggregateId,
    pub code: String,
    pub description: String,
    pub discount: Money,
}

/// Prime while the membership end date is strictly in the future.
pub fn is_user_prime(profile: &UserProfile, now: DateTime<Utc>) -> bool {
    profile.membership.is_prime(now)
}

/// Resolves the three discount sources of an order.
#[derive(Clone)]
pub struct DiscountResolver<S> {
    store: S,
    repository: Repository<S>,
    cache: Arc<dyn Cache>,
    policy: PricingPolicy,
    sale_cache_ttl: Duration,
    max_conflict_retries: u32,
}

impl<S: EventStore + Clone> DiscountResolver<S> {
    pub fn new(store: S, cache: Arc<dyn Cache>, policy: PricingPolicy) -> Self {
        Self {
            repository: Repository::new(store.clone()),
            store,
            cache,
            policy,
            sale_cache_ttl: Duration::from_secs(60),
            max_conflict_retries: domain::DEFAULT_CONFLICT_RETRIES,
        }
    }

    pub fn with_sale_cache_ttl(mut self, ttl: Duration) -> Self {
        self.sale_cache_ttl = ttl;
        self
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    pub fn policy(&self) -> &PricingPolicy {
        &self.policy
    }

    /// Checks a coupon code against a cart.
    ///
    /// The outer error is infrastructure; the inner one is the first rule
    /// the coupon fails.
    #[tracing::instrument(skip(self))]
    pub async fn validate_coupon(
        &self,
        code: &str,
        subtotal: Money,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<std::result::Result<CouponQuote, CouponRejection>> {
        let coupon: Coupon = self.repository.load(Coupon::id_for_code(code)).await?;
        let quote = coupon.evaluate(subtotal, user_id, now).map(|discount| CouponQuote {
            coupon_id: Coupon::id_for_code(code),
            code: coupon.code().to_string(),
            description: coupon
                .definition()
                .map(|d| d.description.clone())
                .unwrap_or_default(),
            discount,
        });
        if let Err(reason) = &quote {
            tracing::debug!(code = %CouponDefinition::normalize_code(code), %reason, "coupon rejected");
        }
        Ok(quote)
    }

    /// Counts one use of a coupon by an order. Safe to repeat.
    #[tracing::instrument(skip(self))]
    pub async fn record_coupon_usage(
        &self,
        code: &str,
        user_id: UserId,
        order_id: AggregateId,
    ) -> Result<()> {
        let handler: CommandHandler<S, Coupon> =
            CommandHandler::new(self.store.clone()).with_conflict_retries(self.max_conflict_retries);
        let result = handler
            .execute_existing(Coupon::id_for_code(code), |coupon| {
                coupon.record_usage(user_id, order_id)
            })
            .await?;
        if !result.events.is_empty() {
            tracing::info!(code = %result.aggregate.code(), %order_id, "coupon usage recorded");
        }
        Ok(())
    }

    /// The sale currently in effect, if any.
    ///
    /// Served from the cache when possible. Cache failures fall through to
    /// the store.
    pub async fn active_sale(&self, now: DateTime<Utc>) -> Result<Option<Sale>> {
        let sale = match self.cached_sale().await {
            Some(sale) => sale,
            None => {
                let sale = self.load_active_sale().await?;
                self.cache_sale(sale.as_ref()).await;
                sale
            }
        };
        Ok(sale.filter(|s| s.is_current(now)))
    }

    /// Loads the active sale from the store, bypassing the cache.
    pub async fn load_active_sale(&self) -> Result<Option<Sale>> {
        let registry: SaleRegistry = self.repository.load(SaleRegistry::registry_id()).await?;
        match registry.active() {
            Some(sale_id) => Ok(self.repository.load_existing::<Sale>(sale_id).await?),
            None => Ok(None),
        }
    }

    /// Drops the cached sale and everything that embeds it.
    pub async fn invalidate_sale_cache(&self) {
        for key in [ACTIVE_SALE_KEY, HOME_KEY] {
            if let Err(e) = self.cache.delete_pattern(key).await {
                tracing::warn!(key, error = %e, "sale cache invalidation failed");
            }
        }
    }

    async fn cached_sale(&self) -> Option<Option<Sale>> {
        let raw = match self.cache.get(ACTIVE_SALE_KEY).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, "sale cache read failed");
                return None;
            }
        };
        if raw == NO_SALE {
            return Some(None);
        }
        match serde_json::from_str(&raw) {
            Ok(sale) => Some(Some(sale)),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable cached sale");
                None
            }
        }
    }

    async fn cache_sale(&self, sale: Option<&Sale>) {
        let raw = match sale {
            Some(sale) => match serde_json::to_string(sale) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(error = %e, "could not serialize sale for cache");
                    return;
                }
            },
            None => NO_SALE.to_string(),
        };
        if let Err(e) = self.cache.set(ACTIVE_SALE_KEY, raw, self.sale_cache_ttl).await {
            tracing::warn!(error = %e, "sale cache write failed");
        }
    }

    /// Prices lines given the coupon discount already granted.
    ///
    /// Sale discount comes first, membership applies to what is left after
    /// coupon and sale, and shipping is decided on the discounted subtotal.
    pub fn price(
        &self,
        lines: &[LineItem],
        coupon_discount: Money,
        sale: Option<&Sale>,
        is_member: bool,
    ) -> OrderTotals {
        let subtotal = pricing::subtotal(lines);
        let sale_discount = pricing::sale_discount(lines, sale, is_member);
        let membership =
            self.policy
                .membership_discount(subtotal, coupon_discount + sale_discount, is_member);
        let discounts = Discounts {
            coupon: coupon_discount,
            sale: sale_discount,
            membership,
        };
        let shipping = self
            .policy
            .shipping
            .fee((subtotal - discounts.total()).non_negative(), is_member);
        OrderTotals::compute(lines, discounts, shipping, self.policy.tax_rate)
    }
}
