//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use domain::{DEFAULT_CONFLICT_RETRIES, Money, PricingPolicy, Rate, ShippingPolicy};
use fulfillment::FulfillmentConfig;

/// Server and pricing configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`, `RUST_LOG`: bind address, listen port, tracing filter
/// - `TAX_RATE_BPS`: tax in basis points (default: `1800`)
/// - `SHIPPING_FEE_CENTS`, `FREE_SHIPPING_THRESHOLD_CENTS`: flat fee and the
///   discounted subtotal at which shipping becomes free
/// - `MEMBERSHIP_DISCOUNT_BPS`: extra member discount (default: `0`)
/// - `REFUND_SLA_DAYS`: days until an original-method refund settles
/// - `CURRENCY`: invoice currency (default: `"INR"`)
/// - `PAYMENT_WEBHOOK_SECRET`: HMAC secret for gateway signatures
/// - `MAX_CONFLICT_RETRIES`, `REFUND_SWEEP_INTERVAL_SECS`, `SALE_CACHE_TTL_SECS`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub tax_rate_bps: u32,
    pub shipping_fee_cents: i64,
    pub free_shipping_threshold_cents: i64,
    pub membership_discount_bps: u32,
    pub refund_sla_days: u32,
    pub currency: String,
    pub payment_secret: String,
    pub max_conflict_retries: u32,
    pub refund_sweep_interval_secs: u64,
    pub sale_cache_ttl_secs: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparseable setting, using default");
            default
        }),
        Err(_) => default,
    }
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            tax_rate_bps: env_or("TAX_RATE_BPS", defaults.tax_rate_bps),
            shipping_fee_cents: env_or("SHIPPING_FEE_CENTS", defaults.shipping_fee_cents),
            free_shipping_threshold_cents: env_or(
                "FREE_SHIPPING_THRESHOLD_CENTS",
                defaults.free_shipping_threshold_cents,
            ),
            membership_discount_bps: env_or(
                "MEMBERSHIP_DISCOUNT_BPS",
                defaults.membership_discount_bps,
            ),
            refund_sla_days: env_or("REFUND_SLA_DAYS", defaults.refund_sla_days),
            currency: std::env::var("CURRENCY").unwrap_or(defaults.currency),
            payment_secret: std::env::var("PAYMENT_WEBHOOK_SECRET")
                .unwrap_or(defaults.payment_secret),
            max_conflict_retries: env_or("MAX_CONFLICT_RETRIES", defaults.max_conflict_retries),
            refund_sweep_interval_secs: env_or(
                "REFUND_SWEEP_INTERVAL_SECS",
                defaults.refund_sweep_interval_secs,
            ),
            sale_cache_ttl_secs: env_or("SALE_CACHE_TTL_SECS", defaults.sale_cache_ttl_secs),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pricing_policy(&self) -> PricingPolicy {
        PricingPolicy {
            tax_rate: Rate::from_bps(self.tax_rate_bps),
            membership_rate: Rate::from_bps(self.membership_discount_bps),
            shipping: ShippingPolicy {
                flat_fee: Money::from_cents(self.shipping_fee_cents),
                free_threshold: Money::from_cents(self.free_shipping_threshold_cents),
                ..ShippingPolicy::default()
            },
        }
    }

    pub fn fulfillment_config(&self) -> FulfillmentConfig {
        FulfillmentConfig {
            pricing: self.pricing_policy(),
            refund_sla_days: self.refund_sla_days,
            max_conflict_retries: self.max_conflict_retries,
            refund_sweep_interval: Duration::from_secs(self.refund_sweep_interval_secs),
            sale_cache_ttl: Duration::from_secs(self.sale_cache_ttl_secs),
            currency: self.currency.clone(),
            payment_secret: self.payment_secret.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            tax_rate_bps: 1800,
            shipping_fee_cents: 4000,
            free_shipping_threshold_cents: 49900,
            membership_discount_bps: 0,
            refund_sla_days: 7,
            currency: "INR".to_string(),
            payment_secret: String::new(),
            max_conflict_retries: DEFAULT_CONFLICT_RETRIES,
            refund_sweep_interval_secs: 3600,
            sale_cache_ttl_secs: 60,
        }
    }
}
