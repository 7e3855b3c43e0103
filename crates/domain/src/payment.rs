//! Gateway payment claims.
//!
//! A payment id may back at most one order. Claiming it is part of the
//! checkout unit, so two checkouts with the same payment conflict at commit.

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::order::OrderError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentEvent {
    PaymentClaimed(PaymentClaimedData),
}

impl DomainEvent for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentClaimed(_) => "PaymentClaimed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentClaimedData {
    pub claim_id: AggregateId,
    pub payment_id: String,
    pub payment_order_id: String,
    pub order_id: AggregateId,
    pub claimed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PaymentClaim {
    id: Option<AggregateId>,
    version: Version,
    order_id: Option<AggregateId>,
}

impl PaymentClaim {
    pub fn id_for_payment(payment_id: &str) -> AggregateId {
        AggregateId::derived("payment", payment_id.trim())
    }

    /// The order this payment already backs.
    pub fn claimed_by(&self) -> Option<AggregateId> {
        self.order_id
    }

    pub fn claim(
        &self,
        payment_id: &str,
        payment_order_id: &str,
        order_id: AggregateId,
    ) -> Result<Vec<PaymentEvent>, OrderError> {
        if let Some(existing) = self.order_id {
            return Err(OrderError::PaymentAlreadyUsed { order_id: existing });
        }
        Ok(vec![PaymentEvent::PaymentClaimed(PaymentClaimedData {
            claim_id: Self::id_for_payment(payment_id),
            payment_id: payment_id.trim().to_string(),
            payment_order_id: payment_order_id.to_string(),
            order_id,
            claimed_at: Utc::now(),
        })])
    }
}

impl Aggregate for PaymentClaim {
    type Event = PaymentEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "PaymentClaim"
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
            PaymentEvent::PaymentClaimed(data) => {
                self.id = Some(data.claim_id);
                self.order_id = Some(data.order_id);
            }
        }
    }
}
