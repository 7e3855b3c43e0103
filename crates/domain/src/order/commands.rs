//! Order commands.
//!
//! Each command validates its own shape before any aggregate is loaded.

use common::{AggregateId, UserId};
use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::error::ValidationError;
use crate::money::Money;

use super::{LineItem, Order, ProductRef, RefundMethod, ReturnStatus, ReturnType, Stage};

const MAX_LINES: usize = 100;
const MAX_LINE_QUANTITY: u32 = 10_000;
const MAX_TEXT: usize = 500;

/// Gateway payment proof submitted with a checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFields {
    pub payment_id: String,
    pub payment_order_id: String,
    pub signature: String,
}

/// Checkout request.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub lines: Vec<LineItem>,
    pub shipping_address: String,
    pub coupon_code: Option<String>,
    /// Wallet amount the customer wants to spend. Zero for none.
    pub wallet_amount: Money,
    pub payment: Option<PaymentFields>,
}

impl CreateOrder {
    pub fn new(user_id: UserId, lines: Vec<LineItem>, shipping_address: impl Into<String>) -> Self {
        Self {
            order_id: AggregateId::new(),
            user_id,
            lines,
            shipping_address: shipping_address.into(),
            coupon_code: None,
            wallet_amount: Money::zero(),
            payment: None,
        }
    }

    pub fn with_coupon(mut self, code: impl Into<String>) -> Self {
        self.coupon_code = Some(code.into());
        self
    }

    pub fn with_wallet(mut self, amount: Money) -> Self {
        self.wallet_amount = amount;
        self
    }

    pub fn with_payment(mut self, payment: PaymentFields) -> Self {
        self.payment = Some(payment);
        self
    }
}

impl Command for CreateOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.lines.is_empty() {
            return Err(ValidationError::new("lines", "at least one line is required"));
        }
        if self.lines.len() > MAX_LINES {
            return Err(ValidationError::new("lines", "too many lines"));
        }
        let mut subtotal = Money::zero();
        for line in &self.lines {
            if line.quantity == 0 {
                return Err(ValidationError::new("quantity", "must be at least 1"));
            }
            if line.quantity > MAX_LINE_QUANTITY {
                return Err(ValidationError::new("quantity", "is too large"));
            }
            if line.unit_price.is_negative() {
                return Err(ValidationError::new("price", "must not be negative"));
            }
            if line.unit_price > Money::LIMIT {
                return Err(ValidationError::new("price", "is too large"));
            }
            subtotal = line
                .unit_price
                .checked_multiply(line.quantity)
                .and_then(|total| subtotal.checked_add(total))
                .filter(|total| *total <= Money::LIMIT)
                .ok_or_else(|| ValidationError::new("lines", "order total is too large"))?;
            if line.name.trim().is_empty() {
                return Err(ValidationError::new("name", "is required"));
            }
            if let ProductRef::External(id) = &line.product
                && id.trim().is_empty()
            {
                return Err(ValidationError::new("externalId", "must not be empty"));
            }
        }
        require_text("shippingAddress", &self.shipping_address)?;
        if self.wallet_amount.is_negative() {
            return Err(ValidationError::new("walletAmount", "must not be negative"));
        }
        if self.wallet_amount > Money::LIMIT {
            return Err(ValidationError::new("walletAmount", "is too large"));
        }
        if let Some(code) = &self.coupon_code
            && code.trim().is_empty()
        {
            return Err(ValidationError::new("couponCode", "must not be empty"));
        }
        if let Some(payment) = &self.payment {
            require_text("paymentId", &payment.payment_id)?;
            require_text("paymentOrderId", &payment.payment_order_id)?;
            require_text("signature", &payment.signature)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct UpdateStage {
    pub order_id: AggregateId,
    pub stage: Stage,
    pub note: Option<String>,
}

impl Command for UpdateStage {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        optional_text("note", self.note.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct CancelOrder {
    pub order_id: AggregateId,
    pub reason: String,
    pub refund_method: Option<RefundMethod>,
    /// The user asking for the cancellation.
    pub requested_by: UserId,
    /// Admins may cancel any order; customers only their own.
    pub as_admin: bool,
}

impl Command for CancelOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_text("reason", &self.reason)
    }
}

#[derive(Debug, Clone)]
pub struct RequestReturn {
    pub order_id: AggregateId,
    pub user_id: UserId,
    pub reason: String,
    pub return_type: ReturnType,
    pub refund_method: Option<RefundMethod>,
}

impl Command for RequestReturn {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_text("reason", &self.reason)
    }
}

#[derive(Debug, Clone)]
pub struct UpdateReturnStatus {
    pub order_id: AggregateId,
    pub status: ReturnStatus,
    pub note: Option<String>,
}

impl Command for UpdateReturnStatus {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if matches!(self.status, ReturnStatus::None | ReturnStatus::Requested) {
            return Err(ValidationError::new(
                "status",
                "cannot be set through a status update",
            ));
        }
        optional_text("note", self.note.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct InitiateRefund {
    pub order_id: AggregateId,
    pub method: RefundMethod,
}

impl Command for InitiateRefund {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

#[derive(Debug, Clone)]
pub struct MarkRefundFailed {
    pub order_id: AggregateId,
    pub reason: String,
}

impl Command for MarkRefundFailed {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_text("reason", &self.reason)
    }
}

#[derive(Debug, Clone)]
pub struct CreateReplacement {
    pub order_id: AggregateId,
}

impl Command for CreateReplacement {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "is required"));
    }
    optional_text(field, Some(value))
}

fn optional_text(field: &'static str, value: Option<&str>) -> Result<(), ValidationError> {
    if value.is_some_and(|v| v.len() > MAX_TEXT) {
        return Err(ValidationError::new(field, "is too long"));
    }
    Ok(())
}
