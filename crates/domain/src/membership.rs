//! Membership tiers as seen by pricing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's membership, if any. Only the end date matters for pricing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub plan: Option<String>,
    pub ends_at: Option<DateTime<Utc>>,
}

impl Membership {
    pub fn until(plan: impl Into<String>, ends_at: DateTime<Utc>) -> Self {
        Self {
            plan: Some(plan.into()),
            ends_at: Some(ends_at),
        }
    }

    /// Prime while the end date is strictly in the future.
    pub fn is_prime(&self, now: DateTime<Utc>) -> bool {
        self.ends_at.is_some_and(|end| end > now)
    }
}
