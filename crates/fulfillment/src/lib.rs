//! Order fulfillment services.
//!
//! This crate orchestrates the domain aggregates into the operations a
//! storefront needs. Every multi-aggregate change is staged into one
//! [`domain::UnitOfWork`] and committed atomically, so a failed checkout
//! leaves stock, wallets and payment claims exactly as they were.
//!
//! - [`CheckoutOrchestrator`]: payment verification, stock reservation,
//!   discounts, wallet debit and order placement
//! - [`ReturnsWorkflow`]: cancellations, returns, refunds and replacements
//! - [`DiscountResolver`]: coupons, the active sale and order pricing
//! - [`WalletLedger`] and [`InventoryGuard`]: balance and stock operations
//! - [`CouponAdmin`] and [`SaleAdmin`]: catalogue of discounts
//! - [`OutboxDispatcher`]: post-commit notifications, emails, coupon usage
//!   and cache invalidation
//! - [`RefundSweeper`]: periodic settlement of original-method refunds,
//!   driven by the incremental [`PendingIndex`]

pub mod admin;
pub mod checkout;
pub mod config;
pub mod discounts;
pub mod error;
pub mod inventory;
pub mod ledger;
pub mod outbox;
pub mod pending;
mod retry;
pub mod returns;
pub mod services;
pub mod sweeper;

pub use admin::{CouponAdmin, SaleAdmin};
pub use checkout::{CheckoutOrchestrator, CheckoutOutcome};
pub use config::FulfillmentConfig;
pub use discounts::{CouponQuote, DiscountResolver, is_user_prime};
pub use error::{ErrorKind, FulfillmentError, Result};
pub use inventory::InventoryGuard;
pub use ledger::WalletLedger;
pub use outbox::{OutboxDispatcher, OutboxTask};
pub use pending::{PendingIndex, PendingWork};
pub use returns::{OrderOutcome, ReturnsWorkflow};
pub use services::{
    Cache, Collaborators, Email, EmailSink, HmacPaymentVerifier, InMemoryCache,
    InMemoryCollaborators, InMemoryUserDirectory, Notification, NotificationSink,
    PaymentVerifier, Recipient, UserDirectory, UserProfile,
};
pub use sweeper::{RefundSweeper, SweepReport};
