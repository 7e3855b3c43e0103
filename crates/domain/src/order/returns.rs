//! Post-delivery returns, refunds and replacements on the order aggregate.

use chrono::{DateTime, Duration, Utc};
use common::{AggregateId, UserId};

use super::aggregate::PlaceOrder;
use super::events::{
    RefundCompletedData, RefundFailedData, RefundInitiatedData, ReplacementCreatedData,
    ReturnRequestedData,
};
use super::{
    Order, OrderError, OrderEvent, PaymentDetails, PaymentStatus, RefundMethod, RefundStatus,
    ReturnStatus, ReturnType, Stage,
};
use crate::money::Money;

impl Order {
    /// Opens a return on a delivered order. Only the owner may ask.
    pub fn request_return(
        &self,
        user_id: UserId,
        reason: impl Into<String>,
        return_type: ReturnType,
        refund_method: Option<RefundMethod>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_placed()?;
        if !self.is_owned_by(user_id) {
            return Err(OrderError::NotOwner);
        }
        if self.stage != Stage::Delivered || !self.return_status.allows_request() {
            return Err(OrderError::ReturnNotAllowed {
                stage: self.stage,
                return_status: self.return_status,
            });
        }
        Ok(vec![OrderEvent::ReturnRequested(ReturnRequestedData {
            reason: reason.into(),
            return_type,
            refund_method,
            requested_at: Utc::now(),
        })])
    }

    pub fn update_return_status(
        &self,
        to: ReturnStatus,
        note: Option<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_placed()?;
        if !self.return_status.can_transition_to(to) {
            return Err(OrderError::InvalidReturnTransition {
                from: self.return_status,
                to,
            });
        }
        Ok(vec![OrderEvent::return_status_changed(
            self.return_status,
            to,
            note,
        )])
    }

    /// Checks every refund precondition without producing events.
    pub fn ensure_refundable(&self) -> Result<(), OrderError> {
        self.require_placed()?;
        if self.refund_status.blocks_new_refund() {
            return Err(OrderError::RefundAlreadyInitiated);
        }
        if !self.is_paid() {
            return Err(OrderError::RefundNotAllowed("order is not paid"));
        }
        let cancelled = self.stage == Stage::Cancelled;
        let accepted_refund_return =
            self.return_type == Some(ReturnType::Refund) && self.return_status.is_accepted();
        if !cancelled && !accepted_refund_return {
            return Err(OrderError::RefundNotAllowed(
                "order is neither cancelled nor an accepted refund return",
            ));
        }
        Ok(())
    }

    /// Starts a refund of the full order total.
    ///
    /// A wallet refund settles immediately, so it completes in the same
    /// batch. Refunds to the original method stay in flight until
    /// `now + sla`.
    pub fn initiate_refund(
        &self,
        method: RefundMethod,
        now: DateTime<Utc>,
        sla: Duration,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_refundable()?;
        let amount = self.total_price();

        match method {
            RefundMethod::Wallet => Ok(vec![
                OrderEvent::RefundInitiated(RefundInitiatedData {
                    method,
                    amount,
                    due_at: None,
                    initiated_at: now,
                }),
                OrderEvent::RefundCompleted(RefundCompletedData {
                    method,
                    amount,
                    completed_at: now,
                }),
            ]),
            RefundMethod::Original => Ok(vec![OrderEvent::RefundInitiated(
                RefundInitiatedData {
                    method,
                    amount,
                    due_at: Some(now + sla),
                    initiated_at: now,
                },
            )]),
        }
    }

    /// An original-method refund whose SLA has elapsed.
    pub fn is_refund_due(&self, now: DateTime<Utc>) -> bool {
        self.refund_status == RefundStatus::Initiated
            && self.refund_method == Some(RefundMethod::Original)
            && self.refund_due_at.is_some_and(|due| due <= now)
    }

    pub fn complete_refund(&self, now: DateTime<Utc>) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_placed()?;
        if self.refund_status != RefundStatus::Initiated {
            return Err(OrderError::RefundNotAllowed("no refund in flight"));
        }
        Ok(vec![OrderEvent::RefundCompleted(RefundCompletedData {
            method: self.refund_method.unwrap_or_default(),
            amount: self.refund_amount,
            completed_at: now,
        })])
    }

    /// Marks an in-flight refund as failed so it can be initiated again.
    pub fn mark_refund_failed(
        &self,
        reason: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.require_placed()?;
        if self.refund_status != RefundStatus::Initiated {
            return Err(OrderError::RefundNotAllowed("no refund in flight"));
        }
        Ok(vec![OrderEvent::RefundFailed(RefundFailedData {
            reason: reason.into(),
            failed_at: Utc::now(),
        })])
    }

    /// A replacement ships once the returned goods are RECEIVED, since
    /// creating it closes the return.
    pub fn ensure_replaceable(&self) -> Result<(), OrderError> {
        self.require_placed()?;
        if let Some(replacement_order_id) = self.replacement_order_id {
            return Err(OrderError::ReplacementAlreadyCreated {
                replacement_order_id,
            });
        }
        if self.return_type != Some(ReturnType::Replacement)
            || self.return_status != ReturnStatus::Received
        {
            return Err(OrderError::ReplacementNotAllowed);
        }
        Ok(())
    }

    /// Builds the replacement order: same lines and totals, already paid.
    pub fn replacement_order(&self, replacement_id: AggregateId) -> Result<PlaceOrder, OrderError> {
        self.ensure_replaceable()?;
        let user_id = self.user_id.ok_or(OrderError::NotPlaced)?;

        Ok(PlaceOrder {
            order_id: replacement_id,
            user_id,
            customer: self.customer.clone(),
            lines: self.lines.clone(),
            shipping_address: self.shipping_address.clone(),
            totals: self.totals,
            coupon_code: None,
            payment: PaymentDetails {
                status: PaymentStatus::Paid,
                method: self.payment.method,
                payment_id: None,
                payment_order_id: None,
                wallet_used: Money::zero(),
            },
            replacement_from: self.id,
            note: Some(format!("Replacement for {}", self.order_code)),
        })
    }

    pub fn link_replacement(
        &self,
        replacement_order_id: AggregateId,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_replaceable()?;
        Ok(vec![OrderEvent::ReplacementCreated(ReplacementCreatedData {
            replacement_order_id,
            created_at: Utc::now(),
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::super::aggregate::test_support::*;
    use super::*;
    use crate::aggregate::Aggregate;

    fn delivered(paid: bool) -> Order {
        let mut order = placed(paid);
        advance_to(&mut order, Stage::Delivered);
        order
    }

    fn owner(order: &Order) -> UserId {
        order.user_id().unwrap()
    }

    fn with_return(return_type: ReturnType, upto: ReturnStatus) -> Order {
        let mut order = delivered(true);
        let user = owner(&order);
        order.apply_events(
            order
                .request_return(user, "broken", return_type, None)
                .unwrap(),
        );
        for status in [ReturnStatus::Approved, ReturnStatus::Picked, ReturnStatus::Received] {
            if order.return_status() == upto {
                break;
            }
            order.apply_events(order.update_return_status(status, None).unwrap());
        }
        order
    }

    #[test]
    fn return_requires_delivered_stage() {
        let mut order = placed(true);
        let user = owner(&order);
        advance_to(&mut order, Stage::OutForDelivery);

        let err = order
            .request_return(user, "late", ReturnType::Refund, None)
            .unwrap_err();
        assert_eq!(err.reason_code(), "RETURN_NOT_ALLOWED");
    }

    #[test]
    fn return_is_owner_only() {
        let order = delivered(true);
        let err = order
            .request_return(UserId::new(), "x", ReturnType::Refund, None)
            .unwrap_err();
        assert_eq!(err, OrderError::NotOwner);
    }

    #[test]
    fn rejected_return_can_be_requested_again() {
        let mut order = with_return(ReturnType::Refund, ReturnStatus::Requested);
        let user = owner(&order);
        assert!(order
            .request_return(user, "again", ReturnType::Refund, None)
            .is_err());

        order.apply_events(
            order
                .update_return_status(ReturnStatus::Rejected, Some("no".into()))
                .unwrap(),
        );
        assert!(order
            .request_return(user, "again", ReturnType::Refund, None)
            .is_ok());
        assert_eq!(order.return_history().len(), 2);
    }

    #[test]
    fn invalid_return_transition() {
        let order = with_return(ReturnType::Refund, ReturnStatus::Requested);
        let err = order
            .update_return_status(ReturnStatus::Received, None)
            .unwrap_err();
        assert_eq!(err.reason_code(), "INVALID_RETURN_TRANSITION");
    }

    #[test]
    fn wallet_refund_completes_and_closes() {
        let mut order = with_return(ReturnType::Refund, ReturnStatus::Approved);
        let events = order
            .initiate_refund(RefundMethod::Wallet, Utc::now(), Duration::days(7))
            .unwrap();
        assert_eq!(events.len(), 2);
        order.apply_events(events);

        assert_eq!(order.refund_status(), RefundStatus::Completed);
        assert_eq!(order.return_status(), ReturnStatus::Closed);
        assert_eq!(order.refund_amount(), order.total_price());

        let err = order
            .initiate_refund(RefundMethod::Wallet, Utc::now(), Duration::days(7))
            .unwrap_err();
        assert_eq!(err, OrderError::RefundAlreadyInitiated);
    }

    #[test]
    fn original_refund_waits_for_sla() {
        let now = Utc::now();
        let mut order = with_return(ReturnType::Refund, ReturnStatus::Received);
        order.apply_events(
            order
                .initiate_refund(RefundMethod::Original, now, Duration::days(7))
                .unwrap(),
        );

        assert_eq!(order.refund_status(), RefundStatus::Initiated);
        assert!(!order.is_refund_due(now + Duration::days(6)));
        assert!(order.is_refund_due(now + Duration::days(7)));
        assert_eq!(
            order
                .initiate_refund(RefundMethod::Original, now, Duration::days(7))
                .unwrap_err()
                .reason_code(),
            "REFUND_ALREADY_INITIATED"
        );

        order.apply_events(order.complete_refund(now + Duration::days(7)).unwrap());
        assert_eq!(order.refund_status(), RefundStatus::Completed);
        assert_eq!(order.return_status(), ReturnStatus::Closed);
    }

    #[test]
    fn failed_refund_can_be_retried() {
        let now = Utc::now();
        let mut order = with_return(ReturnType::Refund, ReturnStatus::Approved);
        order.apply_events(
            order
                .initiate_refund(RefundMethod::Original, now, Duration::days(7))
                .unwrap(),
        );
        order.apply_events(order.mark_refund_failed("gateway declined").unwrap());

        assert_eq!(order.refund_status(), RefundStatus::Failed);
        assert!(order.refund_due_at().is_none());
        assert!(order
            .initiate_refund(RefundMethod::Wallet, now, Duration::days(7))
            .is_ok());
        assert!(order.clone().mark_refund_failed("again").is_err());
    }

    #[test]
    fn refund_needs_payment_and_eligible_state() {
        let mut unpaid = placed(false);
        unpaid.apply_events(unpaid.cancel("x", UserId::new()).unwrap());
        assert_eq!(
            unpaid.ensure_refundable().unwrap_err().reason_code(),
            "REFUND_NOT_ALLOWED"
        );

        let requested = with_return(ReturnType::Refund, ReturnStatus::Requested);
        assert!(requested.ensure_refundable().is_err());

        let replacement = with_return(ReturnType::Replacement, ReturnStatus::Approved);
        assert!(replacement.ensure_refundable().is_err());

        let mut cancelled = placed(true);
        cancelled.apply_events(cancelled.cancel("x", UserId::new()).unwrap());
        assert!(cancelled.ensure_refundable().is_ok());
    }

    #[test]
    fn replacement_is_created_once() {
        let mut order = with_return(ReturnType::Replacement, ReturnStatus::Received);
        let replacement_id = AggregateId::new();

        let template = order.replacement_order(replacement_id).unwrap();
        assert_eq!(template.replacement_from, order.id());
        assert_eq!(template.lines, order.lines());
        assert_eq!(template.payment.status, PaymentStatus::Paid);

        order.apply_events(order.link_replacement(replacement_id).unwrap());
        assert_eq!(order.replacement_order_id(), Some(replacement_id));
        assert_eq!(order.return_status(), ReturnStatus::Closed);

        let err = order.link_replacement(AggregateId::new()).unwrap_err();
        assert_eq!(err.reason_code(), "REPLACEMENT_ALREADY_CREATED");
    }

    #[test]
    fn replacement_waits_for_the_goods_to_be_received() {
        for status in [ReturnStatus::Requested, ReturnStatus::Approved, ReturnStatus::Picked] {
            let order = with_return(ReturnType::Replacement, status);
            assert_eq!(
                order.ensure_replaceable().unwrap_err(),
                OrderError::ReplacementNotAllowed,
                "{status}"
            );
        }
        assert!(
            with_return(ReturnType::Replacement, ReturnStatus::Received)
                .ensure_replaceable()
                .is_ok()
        );
    }

    #[test]
    fn replacement_needs_replacement_return() {
        let order = with_return(ReturnType::Refund, ReturnStatus::Approved);
        assert_eq!(
            order.ensure_replaceable().unwrap_err(),
            OrderError::ReplacementNotAllowed
        );
    }
}
