//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use event_store::Version;
use serde::Serialize;

use crate::aggregate::Aggregate;
use crate::money::Money;
use crate::pricing::{MINIMUM_TOTAL, OrderTotals};

use super::events::{OrderCancelledData, OrderPlacedData};
use super::{
    CustomerSnapshot, HistoryEntry, InvoiceNumberAssignedData, LineItem, OrderError, OrderEvent,
    PaymentDetails, ProductRef, RefundMethod, RefundStatus, ReturnHistoryEntry, ReturnStatus,
    ReturnType, Stage, order_code,
};

/// Everything needed to place an order, already priced.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub customer: CustomerSnapshot,
    pub lines: Vec<LineItem>,
    pub shipping_address: String,
    pub totals: OrderTotals,
    pub coupon_code: Option<String>,
    pub payment: PaymentDetails,
    pub replacement_from: Option<AggregateId>,
    pub note: Option<String>,
}

/// Order aggregate root.
///
/// Created once per checkout and never deleted. Lines and totals are fixed
/// at placement; afterwards only the stage, return and refund state move.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Order {
    pub(super) id: Option<AggregateId>,

    #[serde(skip)]
    pub(super) version: Version,

    pub(super) order_code: String,
    pub(super) invoice_number: Option<String>,
    pub(super) user_id: Option<UserId>,
    pub(super) customer: CustomerSnapshot,
    pub(super) lines: Vec<LineItem>,
    pub(super) shipping_address: String,
    #[serde(flatten)]
    pub(super) totals: OrderTotals,
    pub(super) coupon_code: Option<String>,

    pub(super) stage: Stage,
    pub(super) status_history: Vec<HistoryEntry>,
    pub(super) cancel_reason: Option<String>,

    pub(super) payment: PaymentDetails,

    pub(super) return_status: ReturnStatus,
    pub(super) return_type: Option<ReturnType>,
    pub(super) return_reason: Option<String>,
    pub(super) return_history: Vec<ReturnHistoryEntry>,
    pub(super) refund_status: RefundStatus,
    pub(super) refund_method: Option<RefundMethod>,
    pub(super) refund_amount: Money,
    pub(super) refund_due_at: Option<DateTime<Utc>>,
    pub(super) replacement_order_id: Option<AggregateId>,
    pub(super) replacement_from_id: Option<AggregateId>,

    pub(super) created_at: Option<DateTime<Utc>>,
    pub(super) updated_at: Option<DateTime<Utc>>,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
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
            OrderEvent::OrderPlaced(data) => self.apply_placed(*data),
            OrderEvent::InvoiceNumberAssigned(data) => {
                self.invoice_number = Some(data.invoice_number);
                self.updated_at = Some(data.assigned_at);
            }
            OrderEvent::StageChanged(data) => {
                self.stage = data.to;
                self.push_history(data.to, data.changed_at, data.note);
            }
            OrderEvent::OrderCancelled(data) => {
                self.stage = Stage::Cancelled;
                self.cancel_reason = Some(data.reason.clone());
                self.push_history(Stage::Cancelled, data.cancelled_at, Some(data.reason));
            }
            OrderEvent::ReturnRequested(data) => {
                self.return_status = ReturnStatus::Requested;
                self.return_type = Some(data.return_type);
                self.return_reason = Some(data.reason.clone());
                if data.refund_method.is_some() {
                    self.refund_method = data.refund_method;
                }
                self.push_return_history(
                    ReturnStatus::Requested,
                    data.requested_at,
                    Some(data.reason),
                );
            }
            OrderEvent::ReturnStatusChanged(data) => {
                self.return_status = data.to;
                self.push_return_history(data.to, data.changed_at, data.note);
            }
            OrderEvent::RefundInitiated(data) => {
                self.refund_status = RefundStatus::Initiated;
                self.refund_method = Some(data.method);
                self.refund_amount = data.amount;
                self.refund_due_at = data.due_at;
                self.updated_at = Some(data.initiated_at);
            }
            OrderEvent::RefundCompleted(data) => {
                self.refund_status = RefundStatus::Completed;
                self.close_return(data.completed_at, "refund completed");
            }
            OrderEvent::RefundFailed(data) => {
                self.refund_status = RefundStatus::Failed;
                self.refund_due_at = None;
                self.updated_at = Some(data.failed_at);
            }
            OrderEvent::ReplacementCreated(data) => {
                self.replacement_order_id = Some(data.replacement_order_id);
                self.close_return(data.created_at, "replacement created");
            }
        }
    }
}

impl Order {
    fn apply_placed(&mut self, data: OrderPlacedData) {
        self.id = Some(data.order_id);
        self.order_code = data.order_code;
        self.user_id = Some(data.user_id);
        self.customer = data.customer;
        self.lines = data.lines;
        self.shipping_address = data.shipping_address;
        self.totals = data.totals;
        self.coupon_code = data.coupon_code;
        self.payment = data.payment;
        self.replacement_from_id = data.replacement_from;
        self.stage = Stage::Placed;
        self.created_at = Some(data.placed_at);
        self.push_history(Stage::Placed, data.placed_at, data.note);
    }

    fn push_history(&mut self, stage: Stage, at: DateTime<Utc>, note: Option<String>) {
        self.status_history.push(HistoryEntry { stage, at, note });
        self.updated_at = Some(at);
    }

    pub(super) fn push_return_history(
        &mut self,
        status: ReturnStatus,
        at: DateTime<Utc>,
        note: Option<String>,
    ) {
        self.return_history.push(ReturnHistoryEntry { status, at, note });
        self.updated_at = Some(at);
    }

    fn close_return(&mut self, at: DateTime<Utc>, note: &str) {
        if self.return_status != ReturnStatus::Closed {
            self.return_status = ReturnStatus::Closed;
            self.push_return_history(ReturnStatus::Closed, at, Some(note.to_string()));
        } else {
            self.updated_at = Some(at);
        }
    }
}

// Query methods
impl Order {
    pub fn order_code(&self) -> &str {
        &self.order_code
    }

    pub fn invoice_number(&self) -> Option<&str> {
        self.invoice_number.as_deref()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == Some(user_id)
    }

    pub fn customer(&self) -> &CustomerSnapshot {
        &self.customer
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn shipping_address(&self) -> &str {
        &self.shipping_address
    }

    pub fn totals(&self) -> &OrderTotals {
        &self.totals
    }

    pub fn total_price(&self) -> Money {
        self.totals.total_price
    }

    pub fn coupon_code(&self) -> Option<&str> {
        self.coupon_code.as_deref()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn status_history(&self) -> &[HistoryEntry] {
        &self.status_history
    }

    pub fn payment(&self) -> &PaymentDetails {
        &self.payment
    }

    pub fn is_paid(&self) -> bool {
        self.payment.status == super::PaymentStatus::Paid
    }

    pub fn return_status(&self) -> ReturnStatus {
        self.return_status
    }

    pub fn return_type(&self) -> Option<ReturnType> {
        self.return_type
    }

    pub fn return_reason(&self) -> Option<&str> {
        self.return_reason.as_deref()
    }

    pub fn return_history(&self) -> &[ReturnHistoryEntry] {
        &self.return_history
    }

    pub fn refund_status(&self) -> RefundStatus {
        self.refund_status
    }

    pub fn refund_method(&self) -> Option<RefundMethod> {
        self.refund_method
    }

    pub fn refund_amount(&self) -> Money {
        self.refund_amount
    }

    pub fn refund_due_at(&self) -> Option<DateTime<Utc>> {
        self.refund_due_at
    }

    pub fn replacement_order_id(&self) -> Option<AggregateId> {
        self.replacement_order_id
    }

    pub fn replacement_from_id(&self) -> Option<AggregateId> {
        self.replacement_from_id
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Catalog product quantities on this order.
    pub fn catalog_lines(&self) -> impl Iterator<Item = &LineItem> {
        self.lines
            .iter()
            .filter(|l| matches!(l.product, ProductRef::Catalog(_)))
    }

    pub(super) fn require_placed(&self) -> Result<AggregateId, OrderError> {
        self.id.ok_or(OrderError::NotPlaced)
    }
}

// Command methods (return events)
impl Order {
    /// Places a new order from a priced checkout.
    pub fn place(&self, cmd: PlaceOrder) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyPlaced);
        }
        if cmd.lines.is_empty() {
            return Err(OrderError::InvalidOrder("order has no lines"));
        }
        for line in &cmd.lines {
            if line.quantity == 0 {
                return Err(OrderError::InvalidOrder("line quantity must be positive"));
            }
            if line.unit_price.is_negative() {
                return Err(OrderError::InvalidOrder("line price must not be negative"));
            }
        }
        if cmd.totals.total_price < MINIMUM_TOTAL {
            return Err(OrderError::InvalidOrder("total below minimum"));
        }

        Ok(vec![OrderEvent::OrderPlaced(Box::new(OrderPlacedData {
            order_id: cmd.order_id,
            order_code: order_code(cmd.order_id),
            user_id: cmd.user_id,
            customer: cmd.customer,
            lines: cmd.lines,
            shipping_address: cmd.shipping_address,
            totals: cmd.totals,
            coupon_code: cmd.coupon_code,
            payment: cmd.payment,
            replacement_from: cmd.replacement_from,
            note: cmd.note,
            placed_at: Utc::now(),
        }))])
    }

    /// Assigns the invoice number. It is never reassigned.
    pub fn assign_invoice_number(
        &self,
        invoice_number: String,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_placed()?;
        if let Some(existing) = &self.invoice_number {
            return Err(OrderError::InvoiceAlreadyAssigned(existing.clone()));
        }
        Ok(vec![OrderEvent::InvoiceNumberAssigned(
            InvoiceNumberAssignedData {
                invoice_number,
                assigned_at: Utc::now(),
            },
        )])
    }

    /// Sets the fulfilment stage. Any target is accepted until the order is
    /// DELIVERED or CANCELLED.
    ///
    /// A stage update to CANCELLED only records the stage. Stock and money
    /// are returned by [`cancel`](Self::cancel).
    pub fn update_stage(
        &self,
        to: Stage,
        note: Option<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_placed()?;
        if self.stage.is_terminal() {
            return Err(OrderError::AlreadyTerminal { stage: self.stage });
        }
        Ok(vec![OrderEvent::stage_changed(self.stage, to, note)])
    }

    pub fn cancel(
        &self,
        reason: impl Into<String>,
        cancelled_by: UserId,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_placed()?;
        if !self.stage.can_cancel() {
            return Err(OrderError::NotCancellable { stage: self.stage });
        }
        Ok(vec![OrderEvent::OrderCancelled(OrderCancelledData {
            from: self.stage,
            reason: reason.into(),
            cancelled_by,
            cancelled_at: Utc::now(),
        })])
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use common::ProductId;

    use super::*;
    use crate::order::{PaymentMethod, PaymentStatus};
    use crate::pricing::Discounts;
    use crate::money::Rate;

    pub fn lines() -> Vec<LineItem> {
        vec![
            LineItem {
                product: ProductRef::Catalog(ProductId::new()),
                name: "Kettle".into(),
                category: Some("Kitchen".into()),
                quantity: 2,
                unit_price: Money::from_major(250),
            },
            LineItem {
                product: ProductRef::External("dj-7".into()),
                name: "Mug".into(),
                category: None,
                quantity: 1,
                unit_price: Money::from_major(100),
            },
        ]
    }

    pub fn place_cmd(order_id: AggregateId, user_id: UserId, paid: bool) -> PlaceOrder {
        let lines = lines();
        let totals =
            OrderTotals::compute(&lines, Discounts::default(), Money::zero(), Rate::from_bps(1800));
        PlaceOrder {
            order_id,
            user_id,
            customer: CustomerSnapshot {
                name: "Asha".into(),
                email: "asha@example.com".into(),
                phone: String::new(),
            },
            lines,
            shipping_address: "12 MG Road".into(),
            totals,
            coupon_code: None,
            payment: PaymentDetails {
                status: if paid {
                    PaymentStatus::Paid
                } else {
                    PaymentStatus::Pending
                },
                method: if paid {
                    PaymentMethod::Online
                } else {
                    PaymentMethod::Cod
                },
                payment_id: paid.then(|| "pay_1".to_string()),
                payment_order_id: paid.then(|| "order_1".to_string()),
                wallet_used: Money::zero(),
            },
            replacement_from: None,
            note: None,
        }
    }

    pub fn placed(paid: bool) -> Order {
        let mut order = Order::default();
        let events = order
            .place(place_cmd(AggregateId::new(), UserId::new(), paid))
            .unwrap();
        order.apply_events(events);
        order
    }

    pub fn advance_to(order: &mut Order, stage: Stage) {
        while order.stage() != stage {
            let next = order.stage().next().unwrap();
            let events = order.update_stage(next, None).unwrap();
            order.apply_events(events);
        }
    }
}
