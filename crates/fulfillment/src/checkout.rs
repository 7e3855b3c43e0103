//! Order Transaction Orchestrator.
//!
//! One checkout is one unit of work: the payment claim, every stock
//! decrement, the wallet debit and the new order commit together or not at
//! all. Side effects that must not roll the order back are returned as
//! outbox tasks.

use std::time::Instant;

use chrono::{DateTime, Utc};
use common::AggregateId;
use domain::{
    Command, CreateOrder, DomainError, KeyedGate, Money, Order, OrderError, OrderService,
    PaymentClaim, PaymentDetails, PaymentMethod, PaymentStatus, PlaceOrder, ProductStock,
    Repository, UnitOfWork, Wallet, WalletError, pricing,
};
use event_store::EventStore;

use crate::config::FulfillmentConfig;
use crate::discounts::{DiscountResolver, is_user_prime};
use crate::error::{FulfillmentError, Result};
use crate::inventory::InventoryGuard;
use crate::ledger::stage_debit;
use crate::outbox::OutboxTask;
use crate::retry::commit_with_retry;
use crate::services::{Collaborators, Email, Notification, Recipient, UserProfile};

/// A placed order and the side effects still owed for it.
#[derive(Debug)]
pub struct CheckoutOutcome {
    pub order: Order,
    pub outbox: Vec<OutboxTask>,
    /// True when the payment already backed this order and nothing new was written.
    pub replayed: bool,
}

pub struct CheckoutOrchestrator<S: EventStore> {
    repository: Repository<S>,
    orders: OrderService<S>,
    discounts: DiscountResolver<S>,
    inventory: InventoryGuard<S>,
    collaborators: Collaborators,
    config: FulfillmentConfig,
}

impl<S: EventStore + Clone> CheckoutOrchestrator<S> {
    pub fn new(store: S, collaborators: Collaborators, config: FulfillmentConfig) -> Self {
        let discounts = DiscountResolver::new(
            store.clone(),
            collaborators.cache.clone(),
            config.pricing,
        )
        .with_sale_cache_ttl(config.sale_cache_ttl)
        .with_conflict_retries(config.max_conflict_retries);

        Self {
            repository: Repository::new(store.clone()),
            orders: OrderService::with_conflict_retries(store.clone(), config.max_conflict_retries),
            inventory: InventoryGuard::new(store),
            discounts,
            collaborators,
            config,
        }
    }

    pub fn discounts(&self) -> &DiscountResolver<S> {
        &self.discounts
    }

    /// Prices, reserves and places an order.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, user_id = %cmd.user_id))]
    pub async fn create_order(&self, cmd: CreateOrder) -> Result<CheckoutOutcome> {
        let started = Instant::now();
        let result = self.checkout(&cmd).await;
        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(outcome) if !outcome.replayed => {
                metrics::counter!("orders_created_total").increment(1);
                tracing::info!(
                    order_code = outcome.order.order_code(),
                    total = %outcome.order.total_price(),
                    "order placed"
                );
            }
            Ok(_) => tracing::info!("payment already backs an order, returning it"),
            Err(e) => {
                let reason = e.reason_code().unwrap_or("error");
                metrics::counter!("checkout_rejected_total", "reason" => reason).increment(1);
                tracing::warn!(reason, error = %e, "checkout rejected");
            }
        }
        result
    }

    async fn checkout(&self, cmd: &CreateOrder) -> Result<CheckoutOutcome> {
        cmd.validate()?;

        if let Some(payment) = &cmd.payment
            && let Err(e) = self.collaborators.payments.verify(payment)
        {
            tracing::error!(
                payment_id = %payment.payment_id,
                payment_order_id = %payment.payment_order_id,
                error = %e,
                "payment signature verification failed"
            );
            return Err(e);
        }

        let profile = self
            .collaborators
            .users
            .find(cmd.user_id)
            .await?
            .ok_or_else(|| FulfillmentError::not_found("user", cmd.user_id))?;
        let now = Utc::now();

        let pass = KeyedGate::shared().acquire(contended_ids(cmd)).await;
        let placed = commit_with_retry(&self.repository, self.config.max_conflict_retries, || {
            self.stage_order(cmd, &profile, now)
        })
        .await;
        drop(pass);

        let order = match placed {
            Ok(order) => order,
            Err(FulfillmentError::Domain(DomainError::Order(OrderError::PaymentAlreadyUsed {
                order_id,
            }))) => return self.replay(order_id, cmd).await,
            Err(e) => return Err(e),
        };

        let order = allocate_invoice(&self.orders, &self.repository, cmd.order_id, order).await;
        let outbox = self.outbox_for(cmd.order_id, &order, &profile);
        Ok(CheckoutOutcome {
            order,
            outbox,
            replayed: false,
        })
    }

    async fn stage_order(
        &self,
        cmd: &CreateOrder,
        profile: &UserProfile,
        now: DateTime<Utc>,
    ) -> Result<(UnitOfWork, Order)> {
        let mut unit = UnitOfWork::new();

        if let Some(payment) = &cmd.payment {
            let mut claim: PaymentClaim = self
                .repository
                .load(PaymentClaim::id_for_payment(&payment.payment_id))
                .await?;
            let events = claim.claim(&payment.payment_id, &payment.payment_order_id, cmd.order_id)?;
            unit.record(&mut claim, events)?;
        }

        let lines = self.inventory.reserve(&mut unit, cmd.order_id, &cmd.lines).await?;

        let (coupon_code, coupon_discount) = match &cmd.coupon_code {
            Some(code) => {
                let quote = self
                    .discounts
                    .validate_coupon(code, pricing::subtotal(&lines), cmd.user_id, now)
                    .await??;
                (Some(quote.code), quote.discount)
            }
            None => (None, Money::zero()),
        };

        let sale = self.discounts.active_sale(now).await?;
        let is_prime = is_user_prime(profile, now);
        let totals = self
            .discounts
            .price(&lines, coupon_discount, sale.as_ref(), is_prime);

        let mut wallet_used = Money::zero();
        if cmd.wallet_amount.is_positive() {
            let mut wallet: Wallet = self.repository.load(Wallet::aggregate_id(cmd.user_id)).await?;
            if wallet.balance() < cmd.wallet_amount {
                return Err(WalletError::InsufficientBalance {
                    requested: cmd.wallet_amount,
                    available: wallet.balance(),
                }
                .into());
            }
            wallet_used = cmd.wallet_amount.min(totals.total_price);
            stage_debit(
                &mut unit,
                &mut wallet,
                cmd.user_id,
                wallet_used,
                &format!("Payment for order {}", domain::order::order_code(cmd.order_id)),
                Some(cmd.order_id),
            )?;
        }

        let payment = match &cmd.payment {
            Some(fields) => PaymentDetails {
                status: PaymentStatus::Paid,
                method: PaymentMethod::Online,
                payment_id: Some(fields.payment_id.trim().to_string()),
                payment_order_id: Some(fields.payment_order_id.clone()),
                wallet_used,
            },
            None if wallet_used >= totals.total_price => PaymentDetails {
                status: PaymentStatus::Paid,
                method: PaymentMethod::Wallet,
                wallet_used,
                ..PaymentDetails::default()
            },
            None => PaymentDetails {
                status: PaymentStatus::Pending,
                method: PaymentMethod::Cod,
                wallet_used,
                ..PaymentDetails::default()
            },
        };

        let mut order: Order = self.repository.load(cmd.order_id).await?;
        let events = order.place(PlaceOrder {
            order_id: cmd.order_id,
            user_id: cmd.user_id,
            customer: profile.snapshot(),
            lines,
            shipping_address: cmd.shipping_address.trim().to_string(),
            totals,
            coupon_code,
            payment,
            replacement_from: None,
            note: Some("Order placed".into()),
        })?;
        unit.record(&mut order, events)?;

        Ok((unit, order))
    }

    /// Returns the order a payment already backs. Nothing is written.
    async fn replay(&self, existing: AggregateId, cmd: &CreateOrder) -> Result<CheckoutOutcome> {
        let order: Order = self.repository.get(existing).await?;
        if !order.is_owned_by(cmd.user_id) {
            tracing::error!(%existing, "payment id replayed by another user");
            return Err(OrderError::PaymentAlreadyUsed { order_id: existing }.into());
        }
        Ok(CheckoutOutcome {
            order,
            outbox: Vec::new(),
            replayed: true,
        })
    }

    fn outbox_for(
        &self,
        order_id: AggregateId,
        order: &Order,
        profile: &UserProfile,
    ) -> Vec<OutboxTask> {
        let mut tasks = Vec::new();

        if let Some(code) = order.coupon_code() {
            tasks.push(OutboxTask::RecordCouponUsage {
                code: code.to_string(),
                user_id: profile.user_id,
                order_id,
            });
        }

        tasks.push(OutboxTask::Notify(Notification {
            recipient: Recipient::Admins,
            topic: "order".into(),
            title: format!("New Order #{}", order.order_code()),
            message: format!(
                "Order placed by {} for {} {}",
                profile.name,
                self.config.currency,
                order.total_price()
            ),
            link: Some("/admin/orders".into()),
        }));

        tasks.push(OutboxTask::Email(Email::templated(
            profile.email.clone(),
            &format!("Order {} confirmed", order.order_code()),
            &format!(
                "Thank you for your order. We have received payment details for {} {} and will let you know when it ships.",
                self.config.currency,
                order.total_price()
            ),
        )));

        tasks.push(OutboxTask::invalidate("product:*"));
        tasks.push(OutboxTask::invalidate("home:*"));
        tasks.push(OutboxTask::invalidate(format!("profile:{}*", profile.user_id)));
        tasks
    }
}

/// Aggregates a checkout writes that other checkouts also write: the stock
/// of each catalog line, the buyer's wallet, the payment claim and the order.
fn contended_ids(cmd: &CreateOrder) -> Vec<AggregateId> {
    let mut ids: Vec<AggregateId> = cmd
        .lines
        .iter()
        .filter_map(|line| line.product.catalog_id())
        .map(ProductStock::aggregate_id)
        .collect();
    if cmd.wallet_amount.is_positive() {
        ids.push(Wallet::aggregate_id(cmd.user_id));
    }
    if let Some(payment) = &cmd.payment {
        ids.push(PaymentClaim::id_for_payment(&payment.payment_id));
    }
    ids.push(cmd.order_id);
    ids
}

/// Assigns the invoice number after an order's first commit.
///
/// A failure leaves the number unset and is logged; the refund sweep
/// assigns it on a later pass.
pub(crate) async fn allocate_invoice<S: EventStore>(
    orders: &OrderService<S>,
    repository: &Repository<S>,
    order_id: AggregateId,
    order: Order,
) -> Order {
    if let Err(e) = orders.assign_invoice_number(order_id).await {
        tracing::error!(%order_id, error = %e, "invoice number allocation failed");
        return order;
    }
    match repository.get(order_id).await {
        Ok(reloaded) => reloaded,
        Err(e) => {
            tracing::warn!(%order_id, error = %e, "could not reload order after invoicing");
            order
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use common::{ProductId, UserId};
    use domain::{
        CommandHandler, Coupon, CouponDefinition, CouponValue, LineItem, PaymentFields, ProductRef,
        Stage,
    };
    use event_store::InMemoryEventStore;

    use super::*;
    use crate::ledger::WalletLedger;
    use crate::services::{HmacPaymentVerifier, InMemoryCollaborators};

    const SECRET: &str = "test-secret";

    struct Fixture {
        store: InMemoryEventStore,
        fakes: InMemoryCollaborators,
        checkout: CheckoutOrchestrator<InMemoryEventStore>,
        inventory: InventoryGuard<InMemoryEventStore>,
        user_id: UserId,
    }

    fn fixture() -> Fixture {
        let store = InMemoryEventStore::new();
        let fakes = InMemoryCollaborators::new();
        let user_id = fakes.users.add_customer("Asha");
        let checkout = CheckoutOrchestrator::new(
            store.clone(),
            fakes.collaborators(SECRET),
            FulfillmentConfig::default(),
        );
        Fixture {
            inventory: InventoryGuard::new(store.clone()),
            store,
            fakes,
            checkout,
            user_id,
        }
    }

    async fn product(fx: &Fixture, price: i64, quantity: u32) -> LineItem {
        let product_id = ProductId::new();
        fx.inventory
            .register(product_id, "Notebook", "Stationery", quantity)
            .await
            .unwrap();
        LineItem {
            product: ProductRef::Catalog(product_id),
            name: "Notebook".into(),
            category: None,
            quantity: 1,
            unit_price: Money::from_major(price),
        }
    }

    fn signed(payment_id: &str) -> PaymentFields {
        let signature = HmacPaymentVerifier::new(SECRET)
            .sign("order_1", payment_id)
            .unwrap();
        PaymentFields {
            payment_id: payment_id.into(),
            payment_order_id: "order_1".into(),
            signature,
        }
    }

    #[tokio::test]
    async fn places_order_and_reserves_stock() {
        let fx = fixture();
        let mut line = product(&fx, 100, 2).await;
        line.quantity = 2;
        let product_id = line.product.catalog_id().unwrap();

        let outcome = fx
            .checkout
            .create_order(CreateOrder::new(fx.user_id, vec![line], "12 Park Street"))
            .await
            .unwrap();

        let order = outcome.order;
        assert_eq!(order.stage(), Stage::Placed);
        assert_eq!(order.totals().subtotal, Money::from_major(200));
        assert_eq!(order.totals().tax, Money::from_major(36));
        assert_eq!(order.payment().status, PaymentStatus::Pending);
        assert!(order.invoice_number().is_some());
        assert_eq!(order.lines()[0].category.as_deref(), Some("Stationery"));
        assert_eq!(fx.inventory.get(product_id).await.unwrap().unwrap().available(), 0);
        assert!(!outcome.replayed);
        assert!(outcome.outbox.iter().any(|t| t.name() == "notify"));
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_before_any_write() {
        let fx = fixture();
        let line = product(&fx, 100, 1).await;
        let mut payment = signed("pay_1");
        payment.signature = "00".repeat(32);

        let err = fx
            .checkout
            .create_order(CreateOrder::new(fx.user_id, vec![line], "addr").with_payment(payment))
            .await
            .unwrap_err();

        assert!(matches!(err, FulfillmentError::Integrity(_)));
        assert_eq!(fx.store.event_count().await, 1);
    }

    #[tokio::test]
    async fn same_payment_returns_the_same_order() {
        let fx = fixture();
        let line = product(&fx, 100, 5).await;

        let first = fx
            .checkout
            .create_order(
                CreateOrder::new(fx.user_id, vec![line.clone()], "addr").with_payment(signed("pay_9")),
            )
            .await
            .unwrap();
        assert_eq!(first.order.payment().method, PaymentMethod::Online);

        let second = fx
            .checkout
            .create_order(CreateOrder::new(fx.user_id, vec![line], "addr").with_payment(signed("pay_9")))
            .await
            .unwrap();

        assert!(second.replayed);
        assert_eq!(second.order.order_code(), first.order.order_code());
        let stock = fx
            .inventory
            .get(first.order.lines()[0].product.catalog_id().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stock.available(), 4);
    }

    #[tokio::test]
    async fn wallet_covering_total_marks_order_paid() {
        let fx = fixture();
        let line = product(&fx, 100, 1).await;
        let ledger = WalletLedger::new(fx.store.clone());
        ledger.top_up(fx.user_id, Money::from_major(500), "top_1").await.unwrap();

        let outcome = fx
            .checkout
            .create_order(
                CreateOrder::new(fx.user_id, vec![line], "addr").with_wallet(Money::from_major(500)),
            )
            .await
            .unwrap();

        let total = outcome.order.total_price();
        assert_eq!(outcome.order.payment().method, PaymentMethod::Wallet);
        assert_eq!(outcome.order.payment().wallet_used, total);
        assert_eq!(
            ledger.balance(fx.user_id).await.unwrap(),
            Money::from_major(500) - total
        );
    }

    #[tokio::test]
    async fn insufficient_wallet_rolls_back_stock() {
        let fx = fixture();
        let line = product(&fx, 100, 1).await;
        let product_id = line.product.catalog_id().unwrap();

        let err = fx
            .checkout
            .create_order(
                CreateOrder::new(fx.user_id, vec![line], "addr").with_wallet(Money::from_major(10)),
            )
            .await
            .unwrap_err();

        assert_eq!(err.reason_code(), Some("INSUFFICIENT_WALLET_BALANCE"));
        assert_eq!(fx.inventory.get(product_id).await.unwrap().unwrap().available(), 1);
    }

    #[tokio::test]
    async fn coupon_is_applied_and_usage_deferred() {
        let fx = fixture();
        let line = product(&fx, 1000, 1).await;
        let now = Utc::now();
        let handler: CommandHandler<_, Coupon> = CommandHandler::new(fx.store.clone());
        handler
            .execute(Coupon::id_for_code("SAVE10"), |c| {
                c.create(CouponDefinition {
                    code: "SAVE10".into(),
                    description: "10% off".into(),
                    value: CouponValue::Percent(10),
                    max_discount: Some(Money::from_major(50)),
                    min_order: Money::zero(),
                    usage_limit: None,
                    per_user_limit: None,
                    valid_from: now - ChronoDuration::days(1),
                    valid_to: now + ChronoDuration::days(1),
                    public: true,
                })
            })
            .await
            .unwrap();

        let outcome = fx
            .checkout
            .create_order(CreateOrder::new(fx.user_id, vec![line], "addr").with_coupon("save10"))
            .await
            .unwrap();

        assert_eq!(outcome.order.totals().discount, Money::from_major(50));
        assert_eq!(outcome.order.coupon_code(), Some("SAVE10"));
        assert_eq!(outcome.outbox[0].name(), "record_coupon_usage");

        let coupon: Coupon = Repository::new(fx.store.clone())
            .get(Coupon::id_for_code("SAVE10"))
            .await
            .unwrap();
        assert_eq!(coupon.used_count(), 0);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let fx = fixture();
        let line = product(&fx, 100, 1).await;
        let err = fx
            .checkout
            .create_order(CreateOrder::new(UserId::new(), vec![line], "addr"))
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::NotFound { what: "user", .. }));
        assert_eq!(fx.fakes.notifications.count(), 0);
    }
}
