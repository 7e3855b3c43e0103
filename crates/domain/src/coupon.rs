//! Coupon codes: definition, evaluation against a cart and usage tracking.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use event_store::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::money::{Money, Rate};

/// Why a coupon cannot be applied. Checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponRejection {
    NotFound,
    Inactive,
    NotYetValid,
    Expired,
    UsageLimitReached,
    PerUserLimitReached,
    BelowMinOrder,
}

impl CouponRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CouponRejection::NotFound => "NOT_FOUND",
            CouponRejection::Inactive => "INACTIVE",
            CouponRejection::NotYetValid => "NOT_YET_VALID",
            CouponRejection::Expired => "EXPIRED",
            CouponRejection::UsageLimitReached => "USAGE_LIMIT_REACHED",
            CouponRejection::PerUserLimitReached => "PER_USER_LIMIT_REACHED",
            CouponRejection::BelowMinOrder => "BELOW_MIN_ORDER",
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            CouponRejection::NotFound => "COUPON_NOT_FOUND",
            CouponRejection::Inactive => "COUPON_INACTIVE",
            CouponRejection::NotYetValid => "COUPON_NOT_YET_VALID",
            CouponRejection::Expired => "COUPON_EXPIRED",
            CouponRejection::UsageLimitReached => "COUPON_USAGE_LIMIT_REACHED",
            CouponRejection::PerUserLimitReached => "COUPON_PER_USER_LIMIT_REACHED",
            CouponRejection::BelowMinOrder => "COUPON_BELOW_MIN_ORDER",
        }
    }
}

impl std::fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponError {
    #[error("coupon rejected: {0}")]
    Rejected(CouponRejection),

    #[error("invalid coupon: {0}")]
    InvalidDefinition(String),

    #[error("coupon {0} already exists")]
    AlreadyExists(String),
}

impl CouponError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            CouponError::Rejected(r) => r.reason_code(),
            CouponError::InvalidDefinition(_) => "COUPON_INVALID",
            CouponError::AlreadyExists(_) => "COUPON_ALREADY_EXISTS",
        }
    }
}

impl From<CouponRejection> for CouponError {
    fn from(r: CouponRejection) -> Self {
        CouponError::Rejected(r)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum CouponValue {
    /// Whole percent, 1 to 100.
    Percent(u32),
    Flat(Money),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponDefinition {
    pub code: String,
    #[serde(default)]
    pub description: String,
    pub value: CouponValue,
    pub max_discount: Option<Money>,
    #[serde(default)]
    pub min_order: Money,
    /// Total uses across all users. None is unlimited.
    pub usage_limit: Option<u32>,
    /// Uses per user. None is unlimited.
    pub per_user_limit: Option<u32>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    #[serde(default)]
    pub public: bool,
}

impl CouponDefinition {
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn validate(&self) -> Result<(), CouponError> {
        let invalid = |msg: &str| Err(CouponError::InvalidDefinition(msg.to_string()));

        let code = Self::normalize_code(&self.code);
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return invalid("code must be alphanumeric");
        }
        match self.value {
            CouponValue::Percent(p) if !(1..=100).contains(&p) => {
                return invalid("percent value must be between 1 and 100");
            }
            CouponValue::Flat(amount) if !amount.is_positive() => {
                return invalid("flat value must be positive");
            }
            _ => {}
        }
        if self.max_discount.is_some_and(|m| m.is_negative()) || self.min_order.is_negative() {
            return invalid("amounts must not be negative");
        }
        if self.per_user_limit == Some(0) {
            return invalid("per-user limit must be at least 1");
        }
        if self.valid_to <= self.valid_from {
            return invalid("validity window is empty");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CouponEvent {
    CouponCreated(CouponCreatedData),
    CouponUsed(CouponUsedData),
    CouponDeactivated { at: DateTime<Utc> },
}

impl DomainEvent for CouponEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CouponEvent::CouponCreated(_) => "CouponCreated",
            CouponEvent::CouponUsed(_) => "CouponUsed",
            CouponEvent::CouponDeactivated { .. } => "CouponDeactivated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponCreatedData {
    pub coupon_id: AggregateId,
    pub definition: CouponDefinition,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponUsedData {
    pub user_id: UserId,
    pub order_id: AggregateId,
    pub used_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct Coupon {
    id: Option<AggregateId>,
    version: Version,
    definition: Option<CouponDefinition>,
    code: String,
    active: bool,
    used_count: u32,
    used_by: HashMap<UserId, u32>,
    orders: HashSet<AggregateId>,
    created_at: Option<DateTime<Utc>>,
}

impl Coupon {
    /// Aggregate id for a code, independent of case and padding.
    pub fn id_for_code(code: &str) -> AggregateId {
        AggregateId::derived("coupon", &CouponDefinition::normalize_code(code))
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn definition(&self) -> Option<&CouponDefinition> {
        self.definition.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_public(&self) -> bool {
        self.definition.as_ref().is_some_and(|d| d.public)
    }

    pub fn used_count(&self) -> u32 {
        self.used_count
    }

    pub fn uses_by(&self, user_id: UserId) -> u32 {
        self.used_by.get(&user_id).copied().unwrap_or(0)
    }

    pub fn has_order(&self, order_id: AggregateId) -> bool {
        self.orders.contains(&order_id)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    /// Checks the coupon against a cart and returns the discount it grants.
    pub fn evaluate(
        &self,
        subtotal: Money,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Money, CouponRejection> {
        let def = self.definition.as_ref().ok_or(CouponRejection::NotFound)?;

        if !self.active {
            return Err(CouponRejection::Inactive);
        }
        if now < def.valid_from {
            return Err(CouponRejection::NotYetValid);
        }
        if now > def.valid_to {
            return Err(CouponRejection::Expired);
        }
        if def.usage_limit.is_some_and(|limit| self.used_count >= limit) {
            return Err(CouponRejection::UsageLimitReached);
        }
        if def
            .per_user_limit
            .is_some_and(|limit| self.uses_by(user_id) >= limit)
        {
            return Err(CouponRejection::PerUserLimitReached);
        }
        if subtotal < def.min_order {
            return Err(CouponRejection::BelowMinOrder);
        }

        let discount = match def.value {
            CouponValue::Percent(p) => {
                let amount = subtotal.percent(Rate::from_percent(p));
                match def.max_discount {
                    Some(cap) => amount.min(cap),
                    None => amount,
                }
            }
            CouponValue::Flat(amount) => amount.min(subtotal),
        };
        Ok(discount.non_negative())
    }

    /// True when a customer browsing coupons should see this one.
    pub fn is_listed_for_customers(&self, now: DateTime<Utc>) -> bool {
        let Some(def) = self.definition.as_ref() else {
            return false;
        };
        def.public
            && self.active
            && def.valid_from <= now
            && now <= def.valid_to
            && def.usage_limit.is_none_or(|limit| self.used_count < limit)
    }
}

// Command methods
impl Coupon {
    pub fn create(&self, definition: CouponDefinition) -> Result<Vec<CouponEvent>, CouponError> {
        let code = CouponDefinition::normalize_code(&definition.code);
        if self.id.is_some() {
            return Err(CouponError::AlreadyExists(code));
        }
        definition.validate()?;

        Ok(vec![CouponEvent::CouponCreated(CouponCreatedData {
            coupon_id: Self::id_for_code(&code),
            definition: CouponDefinition {
                code,
                ..definition
            },
            created_at: Utc::now(),
        })])
    }

    /// Records a use by an order. Recording the same order twice is a no-op.
    pub fn record_usage(
        &self,
        user_id: UserId,
        order_id: AggregateId,
    ) -> Result<Vec<CouponEvent>, CouponError> {
        if self.id.is_none() {
            return Err(CouponRejection::NotFound.into());
        }
        if self.orders.contains(&order_id) {
            return Ok(vec![]);
        }
        Ok(vec![CouponEvent::CouponUsed(CouponUsedData {
            user_id,
            order_id,
            used_at: Utc::now(),
        })])
    }

    pub fn deactivate(&self) -> Result<Vec<CouponEvent>, CouponError> {
        if self.id.is_none() {
            return Err(CouponRejection::NotFound.into());
        }
        if !self.active {
            return Ok(vec![]);
        }
        Ok(vec![CouponEvent::CouponDeactivated { at: Utc::now() }])
    }
}

impl Aggregate for Coupon {
    type Event = CouponEvent;
    type Error = CouponError;

    fn aggregate_type() -> &'static str {
        "Coupon"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            CouponEvent::CouponCreated(data) => {
                self.id = Some(data.coupon_id);
                self.code = data.definition.code.clone();
                self.definition = Some(data.definition);
                self.active = true;
                self.created_at = Some(data.created_at);
            }
            CouponEvent::CouponUsed(data) => {
                if self.orders.insert(data.order_id) {
                    self.used_count += 1;
                    *self.used_by.entry(data.user_id).or_insert(0) += 1;
                }
            }
            CouponEvent::CouponDeactivated { .. } => self.active = false,
        }
    }
}
