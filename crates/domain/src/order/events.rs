//! Order domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::money::Money;
use crate::pricing::OrderTotals;

use super::{
    CustomerSnapshot, LineItem, PaymentDetails, RefundMethod, ReturnStatus, ReturnType, Stage,
};

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Checkout committed. Carries everything the order needs.
    OrderPlaced(Box<OrderPlacedData>),

    InvoiceNumberAssigned(InvoiceNumberAssignedData),

    /// Stage set by an admin.
    StageChanged(StageChangedData),

    OrderCancelled(OrderCancelledData),

    ReturnRequested(ReturnRequestedData),

    ReturnStatusChanged(ReturnStatusChangedData),

    RefundInitiated(RefundInitiatedData),

    /// Money has reached the customer. Closes the return.
    RefundCompleted(RefundCompletedData),

    RefundFailed(RefundFailedData),

    /// A replacement order was spawned. Closes the return.
    ReplacementCreated(ReplacementCreatedData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "OrderPlaced",
            OrderEvent::InvoiceNumberAssigned(_) => "InvoiceNumberAssigned",
            OrderEvent::StageChanged(_) => "StageChanged",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
            OrderEvent::ReturnRequested(_) => "ReturnRequested",
            OrderEvent::ReturnStatusChanged(_) => "ReturnStatusChanged",
            OrderEvent::RefundInitiated(_) => "RefundInitiated",
            OrderEvent::RefundCompleted(_) => "RefundCompleted",
            OrderEvent::RefundFailed(_) => "RefundFailed",
            OrderEvent::ReplacementCreated(_) => "ReplacementCreated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedData {
    pub order_id: AggregateId,
    pub order_code: String,
    pub user_id: UserId,
    pub customer: CustomerSnapshot,
    pub lines: Vec<LineItem>,
    pub shipping_address: String,
    pub totals: OrderTotals,
    pub coupon_code: Option<String>,
    pub payment: PaymentDetails,
    pub replacement_from: Option<AggregateId>,
    pub note: Option<String>,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceNumberAssignedData {
    pub invoice_number: String,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageChangedData {
    pub from: Stage,
    pub to: Stage,
    pub note: Option<String>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub from: Stage,
    pub reason: String,
    pub cancelled_by: UserId,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnRequestedData {
    pub reason: String,
    pub return_type: ReturnType,
    pub refund_method: Option<RefundMethod>,
    pub requested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReturnStatusChangedData {
    pub from: ReturnStatus,
    pub to: ReturnStatus,
    pub note: Option<String>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundInitiatedData {
    pub method: RefundMethod,
    pub amount: Money,
    /// Set for refunds to the original payment method.
    pub due_at: Option<DateTime<Utc>>,
    pub initiated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundCompletedData {
    pub method: RefundMethod,
    pub amount: Money,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundFailedData {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplacementCreatedData {
    pub replacement_order_id: AggregateId,
    pub created_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn stage_changed(from: Stage, to: Stage, note: Option<String>) -> Self {
        OrderEvent::StageChanged(StageChangedData {
            from,
            to,
            note,
            changed_at: Utc::now(),
        })
    }

    pub fn return_status_changed(
        from: ReturnStatus,
        to: ReturnStatus,
        note: Option<String>,
    ) -> Self {
        OrderEvent::ReturnStatusChanged(ReturnStatusChangedData {
            from,
            to,
            note,
            changed_at: Utc::now(),
        })
    }
}
