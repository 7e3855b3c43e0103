//! Order list read model for the customer and admin order pages.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use domain::{
    Money, OrderEvent, PaymentMethod, PaymentStatus, RefundStatus, ReturnStatus, Stage,
};
use event_store::EventEnvelope;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::Result;
use crate::error::ProjectionError;
use crate::projection::{Projection, ProjectionPosition};
use crate::read_model::{Page, PageRequest, ReadModel};

/// One row of an order list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub order_id: AggregateId,
    pub order_code: String,
    pub invoice_number: Option<String>,
    pub user_id: UserId,
    pub customer_name: String,
    pub item_count: u32,
    pub total_price: Money,
    pub stage: Stage,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub return_status: ReturnStatus,
    pub refund_status: RefundStatus,
    pub replacement_from: Option<AggregateId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct OrderSummariesState {
    orders: HashMap<AggregateId, OrderSummary>,
    /// Placement order, oldest first.
    placed: Vec<AggregateId>,
    by_user: HashMap<UserId, Vec<AggregateId>>,
    position: ProjectionPosition,
}

impl OrderSummariesState {
    fn apply(&mut self, order_id: AggregateId, event: OrderEvent, at: DateTime<Utc>) {
        if let OrderEvent::OrderPlaced(data) = event {
            if self.orders.contains_key(&order_id) {
                return;
            }
            let summary = OrderSummary {
                order_id,
                order_code: data.order_code,
                invoice_number: None,
                user_id: data.user_id,
                customer_name: data.customer.name,
                item_count: data.lines.iter().map(|l| l.quantity).sum(),
                total_price: data.totals.total_price,
                stage: Stage::Placed,
                payment_method: data.payment.method,
                payment_status: data.payment.status,
                return_status: ReturnStatus::None,
                refund_status: RefundStatus::None,
                replacement_from: data.replacement_from,
                created_at: data.placed_at,
                updated_at: data.placed_at,
            };
            self.placed.push(order_id);
            self.by_user.entry(data.user_id).or_default().push(order_id);
            self.orders.insert(order_id, summary);
            return;
        }

        let Some(summary) = self.orders.get_mut(&order_id) else {
            tracing::warn!(%order_id, "order event before placement, ignored");
            return;
        };
        summary.updated_at = at;
        match event {
            OrderEvent::OrderPlaced(_) => {}
            OrderEvent::InvoiceNumberAssigned(data) => {
                summary.invoice_number = Some(data.invoice_number);
            }
            OrderEvent::StageChanged(data) => summary.stage = data.to,
            OrderEvent::OrderCancelled(_) => summary.stage = Stage::Cancelled,
            OrderEvent::ReturnRequested(_) => summary.return_status = ReturnStatus::Requested,
            OrderEvent::ReturnStatusChanged(data) => summary.return_status = data.to,
            OrderEvent::RefundInitiated(_) => summary.refund_status = RefundStatus::Initiated,
            OrderEvent::RefundCompleted(_) => {
                summary.refund_status = RefundStatus::Completed;
                summary.return_status = ReturnStatus::Closed;
            }
            OrderEvent::RefundFailed(_) => summary.refund_status = RefundStatus::Failed,
            OrderEvent::ReplacementCreated(_) => summary.return_status = ReturnStatus::Closed,
        }
    }

    fn newest_first(&self, ids: &[AggregateId]) -> Vec<OrderSummary> {
        ids.iter()
            .rev()
            .filter_map(|id| self.orders.get(id).cloned())
            .collect()
    }
}

/// Paged order lists, newest first.
#[derive(Clone, Default)]
pub struct OrderSummariesView {
    state: Arc<RwLock<OrderSummariesState>>,
}

impl OrderSummariesView {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, order_id: AggregateId) -> Option<OrderSummary> {
        self.state.read().await.orders.get(&order_id).cloned()
    }

    /// One page of a customer's own orders.
    pub async fn for_customer(&self, user_id: UserId, request: PageRequest) -> Page<OrderSummary> {
        let state = self.state.read().await;
        let ids = state.by_user.get(&user_id).map(Vec::as_slice).unwrap_or(&[]);
        request.slice(state.newest_first(ids).into_iter())
    }

    /// One page of every order, optionally only those at `stage`.
    pub async fn all(&self, stage: Option<Stage>, request: PageRequest) -> Page<OrderSummary> {
        let state = self.state.read().await;
        let mut rows = state.newest_first(&state.placed);
        if let Some(stage) = stage {
            rows.retain(|o| o.stage == stage);
        }
        request.slice(rows.into_iter())
    }

    /// Orders whose return is waiting on an admin.
    pub async fn open_returns(&self) -> Vec<OrderSummary> {
        let state = self.state.read().await;
        let mut rows = state.newest_first(&state.placed);
        rows.retain(|o| {
            !matches!(
                o.return_status,
                ReturnStatus::None | ReturnStatus::Closed | ReturnStatus::Rejected
            )
        });
        rows
    }
}

#[async_trait]
impl Projection for OrderSummariesView {
    fn name(&self) -> &'static str {
        "OrderSummariesView"
    }

    fn aggregate_types(&self) -> &'static [&'static str] {
        &["Order"]
    }

    async fn handle(&self, event: &EventEnvelope) -> Result<()> {
        let order_event: OrderEvent = serde_json::from_value(event.payload.clone())
            .map_err(|e| ProjectionError::decode(&event.event_type, e))?;

        let mut state = self.state.write().await;
        state.apply(event.aggregate_id, order_event, event.timestamp);
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
        *self.state.write().await = OrderSummariesState::default();
        Ok(())
    }
}

impl ReadModel for OrderSummariesView {
    fn name(&self) -> &'static str {
        "OrderSummariesView"
    }

    fn count(&self) -> usize {
        self.state.try_read().map(|s| s.orders.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use domain::order::{OrderPlacedData, StageChangedData};
    use domain::{CustomerSnapshot, LineItem, OrderTotals, PaymentDetails, ProductRef};
    use event_store::Version;

    use super::*;

    fn envelope(order_id: AggregateId, version: i64, event: &OrderEvent) -> EventEnvelope {
        use domain::DomainEvent;
        EventEnvelope::builder()
            .aggregate_id(order_id)
            .aggregate_type("Order")
            .event_type(event.event_type())
            .version(Version::new(version))
            .payload(event)
            .unwrap()
            .build()
            .unwrap()
    }

    fn placed(order_id: AggregateId, user_id: UserId, minutes_ago: i64) -> OrderEvent {
        OrderEvent::OrderPlaced(Box::new(OrderPlacedData {
            order_id,
            order_code: domain::order::order_code(order_id),
            user_id,
            customer: CustomerSnapshot {
                name: "Tara".into(),
                email: "tara@example.com".into(),
                phone: String::new(),
            },
            lines: vec![LineItem {
                product: ProductRef::External("sku-1".into()),
                name: "Scarf".into(),
                category: Some("Apparel".into()),
                quantity: 3,
                unit_price: Money::from_major(100),
            }],
            shipping_address: "addr".into(),
            totals: OrderTotals {
                total_price: Money::from_major(354),
                ..OrderTotals::default()
            },
            coupon_code: None,
            payment: PaymentDetails::default(),
            replacement_from: None,
            note: None,
            placed_at: Utc::now() - Duration::minutes(minutes_ago),
        }))
    }

    async fn view_with_orders(user_id: UserId, count: usize) -> (OrderSummariesView, Vec<AggregateId>) {
        let view = OrderSummariesView::new();
        let mut ids = Vec::new();
        for i in 0..count {
            let order_id = AggregateId::new();
            let event = placed(order_id, user_id, (count - i) as i64);
            view.handle(&envelope(order_id, 1, &event)).await.unwrap();
            ids.push(order_id);
        }
        (view, ids)
    }

    #[tokio::test]
    async fn customer_pages_are_newest_first() {
        let user_id = UserId::new();
        let (view, ids) = view_with_orders(user_id, 12).await;

        let first = view.for_customer(user_id, PageRequest::new(Some(1), None)).await;
        assert_eq!(first.total, 12);
        assert_eq!(first.limit, 10);
        assert_eq!(first.items.len(), 10);
        assert_eq!(first.items[0].order_id, ids[11]);
        assert_eq!(first.items[0].item_count, 3);

        let second = view.for_customer(user_id, PageRequest::new(Some(2), None)).await;
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.items[1].order_id, ids[0]);

        let stranger = view.for_customer(UserId::new(), PageRequest::default()).await;
        assert_eq!(stranger.total, 0);
    }

    #[tokio::test]
    async fn follows_stage_and_refund_changes() {
        let user_id = UserId::new();
        let (view, ids) = view_with_orders(user_id, 2).await;

        let event = OrderEvent::StageChanged(StageChangedData {
            from: Stage::Placed,
            to: Stage::Confirmed,
            note: None,
            changed_at: Utc::now(),
        });
        view.handle(&envelope(ids[0], 2, &event)).await.unwrap();

        let confirmed = view.all(Some(Stage::Confirmed), PageRequest::default()).await;
        assert_eq!(confirmed.total, 1);
        assert_eq!(confirmed.items[0].order_id, ids[0]);
        assert_eq!(view.all(None, PageRequest::default()).await.total, 2);
        assert_eq!(ReadModel::count(&view), 2);
    }

    #[tokio::test]
    async fn reset_empties_the_view() {
        let user_id = UserId::new();
        let (view, _) = view_with_orders(user_id, 3).await;
        view.reset().await.unwrap();
        assert_eq!(view.position().await, ProjectionPosition::zero());
        assert_eq!(view.all(None, PageRequest::default()).await.total, 0);
    }
}
