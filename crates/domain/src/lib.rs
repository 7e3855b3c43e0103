//! Domain layer of the order-fulfillment core.
//!
//! Aggregates here are pure: command methods inspect state and return
//! events, and nothing in this crate performs I/O beyond the event store.
//!
//! - [`Aggregate`] / [`DomainEvent`]: event-sourced entity traits
//! - [`Repository`] and [`UnitOfWork`]: load aggregates and commit changes
//!   to several of them atomically
//! - [`CommandHandler`]: single-aggregate commands with conflict retries
//!   spaced by a jittered [`Backoff`]
//! - Aggregates: [`Order`], [`Wallet`], [`ProductStock`], [`Coupon`],
//!   [`Sale`], [`SaleRegistry`], [`InvoiceSequence`], [`PaymentClaim`]
//! - [`pricing`]: order totals and the discount overlays

pub mod aggregate;
pub mod command;
pub mod coupon;
pub mod error;
pub mod gate;
pub mod invoice;
pub mod membership;
pub mod money;
pub mod order;
pub mod payment;
pub mod pricing;
pub mod repository;
pub mod retry;
pub mod sale;
pub mod stock;
pub mod wallet;

pub use aggregate::{Aggregate, DomainEvent};
pub use command::{Command, CommandHandler, CommandResult};
pub use coupon::{
    Coupon, CouponDefinition, CouponError, CouponEvent, CouponRejection, CouponValue,
};
pub use error::{DomainError, ValidationError};
pub use gate::{GatePass, KeyedGate};
pub use invoice::{Invoice, InvoiceLine, InvoiceSequence, format_invoice_number};
pub use membership::Membership;
pub use money::{Money, Rate};
pub use order::{
    CancelOrder, CreateOrder, CreateReplacement, CustomerSnapshot, HistoryEntry, InitiateRefund,
    LineItem, MarkRefundFailed, Order, OrderError, OrderEvent, OrderService, PaymentDetails,
    PaymentFields, PaymentMethod, PaymentStatus, PlaceOrder, ProductRef, RefundMethod,
    RefundStatus, RequestReturn, ReturnStatus, ReturnType, Stage, UpdateReturnStatus,
    UpdateStage,
};
pub use payment::PaymentClaim;
pub use pricing::{Discounts, OrderTotals, PricingPolicy, ShippingPolicy};
pub use repository::{Repository, UnitOfWork};
pub use retry::{Backoff, DEFAULT_CONFLICT_RETRIES};
pub use sale::{CategoryDiscount, Sale, SaleDefinition, SaleError, SaleRegistry};
pub use stock::{ProductStock, StockError, StockEvent};
pub use wallet::{TransactionKind, Wallet, WalletError, WalletTransaction};
