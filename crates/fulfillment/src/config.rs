//! Runtime parameters of the fulfillment services.

use std::time::Duration;

use domain::{DEFAULT_CONFLICT_RETRIES, PricingPolicy};

/// Tunables shared by checkout, returns and the background sweep.
#[derive(Debug, Clone)]
pub struct FulfillmentConfig {
    pub pricing: PricingPolicy,
    /// Days until an original-method refund is considered settled.
    pub refund_sla_days: u32,
    /// Extra attempts after a concurrency conflict before giving up.
    /// Attempts are spaced by [`domain::Backoff`].
    pub max_conflict_retries: u32,
    pub refund_sweep_interval: Duration,
    pub sale_cache_ttl: Duration,
    pub currency: String,
    /// Shared secret for gateway payment signatures.
    pub payment_secret: String,
}

impl FulfillmentConfig {
    pub fn refund_sla(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.refund_sla_days))
    }
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            pricing: PricingPolicy::default(),
            refund_sla_days: 7,
            max_conflict_retries: DEFAULT_CONFLICT_RETRIES,
            refund_sweep_interval: Duration::from_secs(3600),
            sale_cache_ttl: Duration::from_secs(60),
            currency: "INR".to_string(),
            payment_secret: String::new(),
        }
    }
}
