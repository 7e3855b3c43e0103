//! Order aggregate and related types.

mod aggregate;
mod commands;
mod events;
mod returns;
mod service;
mod state;
mod value_objects;

pub use aggregate::{Order, PlaceOrder};
#[cfg(test)]
pub(crate) use aggregate::test_support;
pub use commands::*;
pub use events::{
    InvoiceNumberAssignedData, OrderCancelledData, OrderEvent, OrderPlacedData,
    RefundCompletedData, RefundFailedData, RefundInitiatedData, ReplacementCreatedData,
    ReturnRequestedData, ReturnStatusChangedData, StageChangedData,
};
pub use service::OrderService;
pub use state::{
    ParseStatusError, PaymentMethod, PaymentStatus, RefundMethod, RefundStatus, ReturnStatus,
    ReturnType, Stage,
};
pub use value_objects::{
    CustomerSnapshot, HistoryEntry, LineItem, PaymentDetails, ProductRef, ReturnHistoryEntry,
    order_code,
};

use common::AggregateId;
use thiserror::Error;

/// Business-rule rejections raised by the order aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("Invalid order: {0}")]
    InvalidOrder(&'static str),

    #[error("Order already placed")]
    AlreadyPlaced,

    #[error("Order has not been placed")]
    NotPlaced,

    #[error("Order is already {stage}")]
    AlreadyTerminal { stage: Stage },

    #[error("Order cannot be cancelled in stage {stage}")]
    NotCancellable { stage: Stage },

    #[error("Return not allowed: stage {stage}, return status {return_status}")]
    ReturnNotAllowed {
        stage: Stage,
        return_status: ReturnStatus,
    },

    #[error("Invalid return transition: {from} -> {to}")]
    InvalidReturnTransition { from: ReturnStatus, to: ReturnStatus },

    #[error("Refund already initiated or completed")]
    RefundAlreadyInitiated,

    #[error("Refund not allowed: {0}")]
    RefundNotAllowed(&'static str),

    #[error("Replacement not allowed")]
    ReplacementNotAllowed,

    #[error("Replacement already created: {replacement_order_id}")]
    ReplacementAlreadyCreated { replacement_order_id: AggregateId },

    #[error("Invoice number already assigned: {0}")]
    InvoiceAlreadyAssigned(String),

    #[error("Payment already backs order {order_id}")]
    PaymentAlreadyUsed { order_id: AggregateId },

    #[error("Order belongs to another user")]
    NotOwner,
}

impl OrderError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            OrderError::InvalidOrder(_) => "INVALID_ORDER",
            OrderError::AlreadyPlaced => "ORDER_ALREADY_PLACED",
            OrderError::NotPlaced => "ORDER_NOT_FOUND",
            OrderError::AlreadyTerminal { .. } => "ORDER_ALREADY_TERMINAL",
            OrderError::NotCancellable { .. } => "ORDER_NOT_CANCELLABLE",
            OrderError::ReturnNotAllowed { .. } => "RETURN_NOT_ALLOWED",
            OrderError::InvalidReturnTransition { .. } => "INVALID_RETURN_TRANSITION",
            OrderError::RefundAlreadyInitiated => "REFUND_ALREADY_INITIATED",
            OrderError::RefundNotAllowed(_) => "REFUND_NOT_ALLOWED",
            OrderError::ReplacementNotAllowed => "REPLACEMENT_NOT_ALLOWED",
            OrderError::ReplacementAlreadyCreated { .. } => "REPLACEMENT_ALREADY_CREATED",
            OrderError::InvoiceAlreadyAssigned(_) => "INVOICE_ALREADY_ASSIGNED",
            OrderError::PaymentAlreadyUsed { .. } => "PAYMENT_ALREADY_USED",
            OrderError::NotOwner => "FORBIDDEN",
        }
    }
}
