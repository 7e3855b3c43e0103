//! Fulfillment error types.

use domain::{
    CouponError, CouponRejection, DomainError, OrderError, SaleError, StockError,
    ValidationError, WalletError,
};
use thiserror::Error;

/// Coarse classification callers map to transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request, rejected before any state was read.
    Validation,
    /// A business rule said no. Carries a reason code.
    Rejected,
    /// The coupon exists in the request but cannot be applied.
    CouponRejected,
    NotFound,
    Forbidden,
    /// Lost an optimistic-concurrency race after all retries.
    Conflict,
    /// Payment signature mismatch.
    Integrity,
    Infrastructure,
}

/// Errors that can occur during fulfillment operations.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("Forbidden: {0}")]
    Forbidden(&'static str),

    /// Details stay in the logs; callers only see that verification failed.
    #[error("Payment verification failed: {0}")]
    Integrity(String),

    /// A collaborator (directory, cache, notification or email sink) failed.
    #[error("{service} failed: {reason}")]
    Collaborator {
        service: &'static str,
        reason: String,
    },
}

macro_rules! via_domain {
    ($($err:ty),* $(,)?) => {
        $(
            impl From<$err> for FulfillmentError {
                fn from(e: $err) -> Self {
                    FulfillmentError::Domain(DomainError::from(e))
                }
            }
        )*
    };
}

via_domain!(
    ValidationError,
    OrderError,
    WalletError,
    StockError,
    CouponError,
    SaleError,
);

impl From<CouponRejection> for FulfillmentError {
    fn from(e: CouponRejection) -> Self {
        FulfillmentError::Domain(DomainError::Coupon(e.into()))
    }
}

impl FulfillmentError {
    pub fn not_found(what: &'static str, id: impl std::fmt::Display) -> Self {
        FulfillmentError::NotFound {
            what,
            id: id.to_string(),
        }
    }

    pub fn collaborator(service: &'static str, reason: impl std::fmt::Display) -> Self {
        FulfillmentError::Collaborator {
            service,
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FulfillmentError::Domain(e) => domain_kind(e),
            FulfillmentError::NotFound { .. } => ErrorKind::NotFound,
            FulfillmentError::Forbidden(_) => ErrorKind::Forbidden,
            FulfillmentError::Integrity(_) => ErrorKind::Integrity,
            FulfillmentError::Collaborator { .. } => ErrorKind::Infrastructure,
        }
    }

    /// Stable machine-readable code, None for opaque failures.
    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            FulfillmentError::Domain(e) if e.is_conflict() => Some("CONCURRENT_MODIFICATION"),
            FulfillmentError::Domain(DomainError::Validation(_)) => Some("VALIDATION_FAILED"),
            FulfillmentError::Domain(DomainError::AggregateNotFound { .. }) => Some("NOT_FOUND"),
            FulfillmentError::Domain(e) => e.reason_code(),
            FulfillmentError::NotFound { .. } => Some("NOT_FOUND"),
            FulfillmentError::Forbidden(_) => Some("FORBIDDEN"),
            FulfillmentError::Integrity(_) | FulfillmentError::Collaborator { .. } => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, FulfillmentError::Domain(e) if e.is_conflict())
    }
}

fn domain_kind(e: &DomainError) -> ErrorKind {
    if e.is_conflict() {
        return ErrorKind::Conflict;
    }
    match e {
        DomainError::Validation(_)
        | DomainError::Order(OrderError::InvalidOrder(_))
        | DomainError::Wallet(WalletError::InvalidAmount(_))
        | DomainError::Stock(StockError::InvalidQuantity)
        | DomainError::Coupon(CouponError::InvalidDefinition(_))
        | DomainError::Sale(SaleError::InvalidDefinition(_)) => ErrorKind::Validation,
        DomainError::Order(OrderError::NotOwner) => ErrorKind::Forbidden,
        DomainError::Order(OrderError::NotPlaced)
        | DomainError::Sale(SaleError::NotRegistered)
        | DomainError::AggregateNotFound { .. } => ErrorKind::NotFound,
        DomainError::Coupon(CouponError::Rejected(_)) => ErrorKind::CouponRejected,
        DomainError::Order(_)
        | DomainError::Wallet(_)
        | DomainError::Stock(_)
        | DomainError::Coupon(_)
        | DomainError::Sale(_) => ErrorKind::Rejected,
        _ => ErrorKind::Infrastructure,
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;

#[cfg(test)]
mod tests {
    use common::ProductId;
    use event_store::EventStoreError;

    use super::*;

    #[test]
    fn business_rules_keep_their_reason_codes() {
        let err: FulfillmentError = StockError::InsufficientStock {
            product_id: ProductId::new(),
            requested: 2,
            available: 1,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert_eq!(err.reason_code(), Some("INSUFFICIENT_STOCK"));
    }

    #[test]
    fn coupon_rejections_are_their_own_kind() {
        let err: FulfillmentError = CouponRejection::Expired.into();
        assert_eq!(err.kind(), ErrorKind::CouponRejected);
        assert_eq!(err.reason_code(), Some("COUPON_EXPIRED"));
    }

    #[test]
    fn ownership_and_lookup_failures() {
        let err: FulfillmentError = OrderError::NotOwner.into();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let err: FulfillmentError = OrderError::NotPlaced.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn conflicts_and_infrastructure() {
        let conflict = FulfillmentError::Domain(DomainError::EventStore(
            EventStoreError::ConcurrencyConflict {
                aggregate_id: common::AggregateId::new(),
                expected: event_store::Version::initial(),
                actual: event_store::Version::first(),
            },
        ));
        assert_eq!(conflict.kind(), ErrorKind::Conflict);
        assert!(conflict.is_conflict());

        let down = FulfillmentError::collaborator("cache", "connection refused");
        assert_eq!(down.kind(), ErrorKind::Infrastructure);
        assert_eq!(down.reason_code(), None);
    }

    #[test]
    fn validation_errors_route_through_domain() {
        let err: FulfillmentError = ValidationError::new("lines", "required").into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.reason_code(), Some("VALIDATION_FAILED"));
    }
}
