//! Incremental index of follow-up work the background sweep owes.
//!
//! The index reads only the events appended since its last read, so a sweep
//! pass costs what is open rather than what was ever written.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use domain::{CouponEvent, DomainError, OrderEvent};
use event_store::{EventEnvelope, EventQuery, EventStore};
use tokio::sync::Mutex;

use crate::error::Result;

const TRACKED: [&str; 6] = [
    "OrderPlaced",
    "InvoiceNumberAssigned",
    "RefundInitiated",
    "RefundCompleted",
    "RefundFailed",
    "CouponUsed",
];

const PAGE_SIZE: usize = 500;

/// Passes between full re-reads. A store whose commits can become visible
/// out of sequence order may hide an event from the incremental read; the
/// re-read picks it up.
pub const FULL_REBUILD_EVERY: u32 = 24;

/// Open work derived from the tracked events.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PendingWork {
    position: usize,
    /// Orders with a refund in flight, keyed to the settlement date if any.
    refunds: BTreeMap<AggregateId, Option<DateTime<Utc>>>,
    /// Orders placed with a coupon the coupon has not recorded yet.
    coupon_usages: BTreeMap<AggregateId, (String, UserId)>,
    /// Placed orders still without an invoice number.
    uninvoiced: BTreeSet<AggregateId>,
}

impl PendingWork {
    /// Count of tracked events consumed so far.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Orders whose refund settlement date is at or before `now`.
    pub fn refunds_due(&self, now: DateTime<Utc>) -> Vec<AggregateId> {
        self.refunds
            .iter()
            .filter(|(_, due_at)| due_at.is_some_and(|due| due <= now))
            .map(|(order_id, _)| *order_id)
            .collect()
    }

    pub fn refunds_in_flight(&self) -> usize {
        self.refunds.len()
    }

    pub fn coupon_usages(&self) -> Vec<(AggregateId, String, UserId)> {
        self.coupon_usages
            .iter()
            .map(|(order_id, (code, user_id))| (*order_id, code.clone(), *user_id))
            .collect()
    }

    pub fn uninvoiced(&self) -> Vec<AggregateId> {
        self.uninvoiced.iter().copied().collect()
    }

    fn apply(&mut self, envelope: EventEnvelope) -> Result<()> {
        self.position += 1;
        let order_id = envelope.aggregate_id;

        if envelope.event_type == "CouponUsed" {
            let event: CouponEvent =
                serde_json::from_value(envelope.payload).map_err(DomainError::from)?;
            if let CouponEvent::CouponUsed(data) = event {
                self.coupon_usages.remove(&data.order_id);
            }
            return Ok(());
        }

        let event: OrderEvent =
            serde_json::from_value(envelope.payload).map_err(DomainError::from)?;
        match event {
            OrderEvent::OrderPlaced(data) => {
                self.uninvoiced.insert(order_id);
                if let Some(code) = data.coupon_code {
                    self.coupon_usages.insert(order_id, (code, data.user_id));
                }
            }
            OrderEvent::InvoiceNumberAssigned(_) => {
                self.uninvoiced.remove(&order_id);
            }
            OrderEvent::RefundInitiated(data) => {
                self.refunds.insert(order_id, data.due_at);
            }
            OrderEvent::RefundCompleted(_) | OrderEvent::RefundFailed(_) => {
                self.refunds.remove(&order_id);
            }
            _ => {}
        }
        Ok(())
    }
}

/// [`PendingWork`] kept current against an event store.
pub struct PendingIndex<S> {
    store: S,
    state: Mutex<(PendingWork, u32)>,
}

impl<S: EventStore> PendingIndex<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            state: Mutex::new((PendingWork::default(), 0)),
        }
    }

    /// Consumes events appended since the last call and returns the
    /// current work. Every [`FULL_REBUILD_EVERY`]th call starts over.
    pub async fn catch_up(&self) -> Result<PendingWork> {
        let mut state = self.state.lock().await;
        Self::advance(&self.store, &mut state).await?;
        Ok(state.0.clone())
    }

    async fn advance(store: &S, state: &mut (PendingWork, u32)) -> Result<()> {
        let (work, reads) = state;
        if *reads >= FULL_REBUILD_EVERY {
            *work = PendingWork::default();
            *reads = 0;
        }
        *reads += 1;

        let started_at = work.position;
        loop {
            let page = store
                .query_events(
                    EventQuery::new()
                        .event_types(TRACKED.iter().map(|t| t.to_string()).collect())
                        .offset(work.position)
                        .limit(PAGE_SIZE),
                )
                .await
                .map_err(DomainError::from)?;
            let full_page = page.len() == PAGE_SIZE;
            for envelope in page {
                work.apply(envelope)?;
            }
            if !full_page {
                break;
            }
        }

        if work.position > started_at {
            tracing::debug!(
                consumed = work.position - started_at,
                refunds = work.refunds.len(),
                coupon_usages = work.coupon_usages.len(),
                uninvoiced = work.uninvoiced.len(),
                "pending work index advanced"
            );
        }
        Ok(())
    }
}
