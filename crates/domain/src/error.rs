//! Domain error types.

use event_store::EventStoreError;
use thiserror::Error;

use crate::coupon::CouponError;
use crate::order::OrderError;
use crate::sale::SaleError;
use crate::stock::StockError;
use crate::wallet::WalletError;

/// A malformed request field, detected before any state is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Stock(#[from] StockError),

    #[error(transparent)]
    Coupon(#[from] CouponError),

    #[error(transparent)]
    Sale(#[from] SaleError),

    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: String,
    },

    /// Events under one id belong to a different aggregate type.
    #[error("Aggregate {aggregate_id} is a {found}, not a {expected}")]
    AggregateTypeMismatch {
        aggregate_id: String,
        expected: &'static str,
        found: String,
    },

    /// An aggregate produced events before it had an identity.
    #[error("{0} has no id after applying its events")]
    MissingAggregateId(&'static str),
}

impl From<std::convert::Infallible> for DomainError {
    fn from(e: std::convert::Infallible) -> Self {
        match e {}
    }
}

impl DomainError {
    /// Stable code for business-rule rejections, None for everything else.
    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            DomainError::Order(e) => Some(e.reason_code()),
            DomainError::Wallet(e) => Some(e.reason_code()),
            DomainError::Stock(e) => Some(e.reason_code()),
            DomainError::Coupon(e) => Some(e.reason_code()),
            DomainError::Sale(e) => Some(e.reason_code()),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_conflict())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DomainError::AggregateNotFound { .. })
    }

    pub(crate) fn not_found<A: crate::Aggregate>(id: impl std::fmt::Display) -> Self {
        DomainError::AggregateNotFound {
            aggregate_type: A::aggregate_type(),
            aggregate_id: id.to_string(),
        }
    }
}
