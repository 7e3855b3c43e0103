//! Periodic background sweep.
//!
//! Each pass completes original-method refunds that reached their
//! settlement date, records coupon usages whose outbox task was lost and
//! assigns invoice numbers that checkout failed to allocate. Candidates come
//! from the [`PendingIndex`](crate::pending::PendingIndex).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use domain::{Coupon, OrderService, Repository};
use event_store::EventStore;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::discounts::DiscountResolver;
use crate::error::Result;
use crate::outbox::OutboxDispatcher;
use crate::returns::ReturnsWorkflow;

/// What one sweep pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub refunds_completed: usize,
    pub coupon_usages_reconciled: usize,
    pub invoices_assigned: usize,
}

pub struct RefundSweeper<S: EventStore> {
    repository: Repository<S>,
    orders: OrderService<S>,
    returns: Arc<ReturnsWorkflow<S>>,
    discounts: DiscountResolver<S>,
    outbox: OutboxDispatcher<S>,
    interval: Duration,
}

impl<S: EventStore + Clone + 'static> RefundSweeper<S> {
    pub fn new(
        store: S,
        returns: Arc<ReturnsWorkflow<S>>,
        discounts: DiscountResolver<S>,
        outbox: OutboxDispatcher<S>,
        interval: Duration,
    ) -> Self {
        Self {
            repository: Repository::new(store.clone()),
            orders: OrderService::new(store),
            returns,
            discounts,
            outbox,
            interval,
        }
    }

    /// Runs one pass. Notifications for completed refunds are delivered
    /// before this returns.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let completed = self.returns.complete_due_refunds(now).await?;
        for outcome in &completed {
            self.outbox.dispatch(outcome.outbox.clone()).await;
        }

        let reconciled = self.reconcile_coupon_usage().await?;
        let invoiced = self.assign_missing_invoices().await?;
        let report = SweepReport {
            refunds_completed: completed.len(),
            coupon_usages_reconciled: reconciled,
            invoices_assigned: invoiced,
        };
        if report != SweepReport::default() {
            tracing::info!(?report, "sweep finished");
        }
        Ok(report)
    }

    /// Records usage for placed orders whose coupon does not know them yet.
    async fn reconcile_coupon_usage(&self) -> Result<usize> {
        let pending = self.returns.pending().catch_up().await?.coupon_usages();

        let mut coupons: HashMap<String, Coupon> = HashMap::new();
        let mut reconciled = 0;

        for (order_id, code, user_id) in pending {
            if !coupons.contains_key(&code) {
                let coupon: Coupon = self.repository.load(Coupon::id_for_code(&code)).await?;
                coupons.insert(code.clone(), coupon);
            }
            if coupons.get(&code).is_some_and(|c| c.has_order(order_id)) {
                continue;
            }

            match self.discounts.record_coupon_usage(&code, user_id, order_id).await {
                Ok(()) => {
                    reconciled += 1;
                    coupons.remove(&code);
                    tracing::warn!(%code, %order_id, "coupon usage was missing, recorded");
                }
                Err(e) => tracing::error!(%code, %order_id, error = %e, "coupon usage reconciliation failed"),
            }
        }
        Ok(reconciled)
    }

    /// Assigns invoice numbers to placed orders that are still without one.
    async fn assign_missing_invoices(&self) -> Result<usize> {
        let pending = self.returns.pending().catch_up().await?.uninvoiced();

        let mut assigned = 0;
        for order_id in pending {
            match self.orders.assign_invoice_number(order_id).await {
                Ok(number) => {
                    assigned += 1;
                    tracing::warn!(%order_id, invoice_number = %number, "invoice number was missing, assigned");
                }
                Err(e) => tracing::error!(%order_id, error = %e, "invoice backfill failed"),
            }
        }
        Ok(assigned)
    }

    /// Sweeps on a fixed interval until `shutdown` flips to true.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_secs = self.interval.as_secs(), "refund sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once(Utc::now()).await {
                            tracing::error!(error = %e, "sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("refund sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use common::{AggregateId, ProductId};
    use domain::{
        CommandHandler, CouponDefinition, CouponValue, CreateOrder, Discounts, InitiateRefund,
        LineItem, Money, Order, OrderTotals, PaymentDetails, PlaceOrder, ProductRef, Rate,
        RefundMethod, RefundStatus, RequestReturn, ReturnStatus, ReturnType, Stage,
        UpdateReturnStatus, UpdateStage,
    };
    use event_store::InMemoryEventStore;

    use super::*;
    use crate::checkout::CheckoutOrchestrator;
    use crate::config::FulfillmentConfig;
    use crate::inventory::InventoryGuard;
    use crate::ledger::WalletLedger;
    use crate::services::{InMemoryCollaborators, UserDirectory};

    struct Fixture {
        store: InMemoryEventStore,
        fakes: InMemoryCollaborators,
        checkout: CheckoutOrchestrator<InMemoryEventStore>,
        returns: Arc<ReturnsWorkflow<InMemoryEventStore>>,
        sweeper: RefundSweeper<InMemoryEventStore>,
    }

    fn fixture() -> Fixture {
        let store = InMemoryEventStore::new();
        let fakes = InMemoryCollaborators::new();
        let config = FulfillmentConfig::default();
        let collaborators = fakes.collaborators("secret");
        let checkout = CheckoutOrchestrator::new(store.clone(), collaborators.clone(), config.clone());
        let returns = Arc::new(ReturnsWorkflow::new(store.clone(), config));
        let discounts = checkout.discounts().clone();
        let outbox = OutboxDispatcher::new(discounts.clone(), collaborators);
        let sweeper = RefundSweeper::new(
            store.clone(),
            returns.clone(),
            discounts,
            outbox,
            Duration::from_secs(3600),
        );
        Fixture {
            store,
            fakes,
            checkout,
            returns,
            sweeper,
        }
    }

    async fn stocked_line(store: &InMemoryEventStore) -> LineItem {
        let product_id = ProductId::new();
        InventoryGuard::new(store.clone())
            .register(product_id, "Mug", "Kitchen", 10)
            .await
            .unwrap();
        LineItem {
            product: ProductRef::Catalog(product_id),
            name: "Mug".into(),
            category: None,
            quantity: 1,
            unit_price: Money::from_major(600),
        }
    }

    #[tokio::test]
    async fn completes_due_refunds_and_notifies() {
        let fx = fixture();
        let user_id = fx.fakes.users.add_customer("Meera");
        WalletLedger::new(fx.store.clone())
            .top_up(user_id, Money::from_major(2000), "pay_top")
            .await
            .unwrap();
        let line = stocked_line(&fx.store).await;
        let order_id = AggregateId::new();
        let mut cmd = CreateOrder::new(user_id, vec![line], "addr").with_wallet(Money::from_major(2000));
        cmd.order_id = order_id;
        fx.checkout.create_order(cmd).await.unwrap();

        let orders = OrderService::new(fx.store.clone());
        for stage in [
            Stage::Confirmed,
            Stage::Processing,
            Stage::Packed,
            Stage::Shipped,
            Stage::OutForDelivery,
            Stage::Delivered,
        ] {
            orders
                .update_stage(UpdateStage { order_id, stage, note: None })
                .await
                .unwrap();
        }
        fx.returns
            .request_return(RequestReturn {
                order_id,
                user_id,
                reason: "Cracked".into(),
                return_type: ReturnType::Refund,
                refund_method: Some(RefundMethod::Original),
            })
            .await
            .unwrap();
        fx.returns
            .update_return_status(UpdateReturnStatus {
                order_id,
                status: ReturnStatus::Approved,
                note: None,
            })
            .await
            .unwrap();
        fx.returns
            .initiate_refund(InitiateRefund {
                order_id,
                method: RefundMethod::Original,
            })
            .await
            .unwrap();

        let report = fx.sweeper.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(report.refunds_completed, 0);

        let report = fx
            .sweeper
            .sweep_once(Utc::now() + ChronoDuration::days(7) + ChronoDuration::minutes(1))
            .await
            .unwrap();
        assert_eq!(report.refunds_completed, 1);

        let order = orders.get_order(order_id).await.unwrap().unwrap();
        assert_eq!(order.refund_status(), RefundStatus::Completed);
        assert_eq!(order.return_status(), ReturnStatus::Closed);
        assert!(
            fx.fakes
                .notifications
                .sent()
                .iter()
                .any(|n| n.title == "Refund completed")
        );
        assert_eq!(fx.fakes.email.sent()[0].subject, "Refund completed");
    }

    #[tokio::test]
    async fn reconciles_lost_coupon_usage_once() {
        let fx = fixture();
        let user_id = fx.fakes.users.add_customer("Kabir");
        let now = Utc::now();
        let handler: CommandHandler<_, Coupon> = CommandHandler::new(fx.store.clone());
        handler
            .execute(Coupon::id_for_code("WELCOME"), |c| {
                c.create(CouponDefinition {
                    code: "WELCOME".into(),
                    description: "Flat 100".into(),
                    value: CouponValue::Flat(Money::from_major(100)),
                    max_discount: None,
                    min_order: Money::zero(),
                    usage_limit: Some(10),
                    per_user_limit: None,
                    valid_from: now - ChronoDuration::days(1),
                    valid_to: now + ChronoDuration::days(1),
                    public: true,
                })
            })
            .await
            .unwrap();

        let line = stocked_line(&fx.store).await;
        // The outbox of this checkout is dropped on purpose.
        fx.checkout
            .create_order(CreateOrder::new(user_id, vec![line], "addr").with_coupon("WELCOME"))
            .await
            .unwrap();

        let report = fx.sweeper.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(report.coupon_usages_reconciled, 1);
        let report = fx.sweeper.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(report.coupon_usages_reconciled, 0);

        let coupon: Coupon = Repository::new(fx.store.clone())
            .get(Coupon::id_for_code("WELCOME"))
            .await
            .unwrap();
        assert_eq!(coupon.used_count(), 1);
    }

    #[tokio::test]
    async fn assigns_invoice_numbers_checkout_never_allocated() {
        let fx = fixture();
        let user_id = fx.fakes.users.add_customer("Dev");
        let customer = fx.fakes.users.find(user_id).await.unwrap().unwrap().snapshot();
        let lines = vec![stocked_line(&fx.store).await];
        let totals = OrderTotals::compute(&lines, Discounts::default(), Money::zero(), Rate::from_bps(1800));

        // Placed without the invoice step that checkout runs afterwards.
        let order_id = AggregateId::new();
        CommandHandler::<_, Order>::new(fx.store.clone())
            .execute(order_id, |order| {
                order.place(PlaceOrder {
                    order_id,
                    user_id,
                    customer: customer.clone(),
                    lines: lines.clone(),
                    shipping_address: "addr".into(),
                    totals,
                    coupon_code: None,
                    payment: PaymentDetails::default(),
                    replacement_from: None,
                    note: None,
                })
            })
            .await
            .unwrap();

        let report = fx.sweeper.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(report.invoices_assigned, 1);
        let order = OrderService::new(fx.store.clone()).get_order(order_id).await.unwrap().unwrap();
        assert!(order.invoice_number().is_some_and(|n| n.ends_with("-000001")));

        let report = fx.sweeper.sweep_once(Utc::now()).await.unwrap();
        assert_eq!(report.invoices_assigned, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_sweeper_stops_on_shutdown() {
        let fx = fixture();
        let (tx, rx) = watch::channel(false);
        let handle = fx.sweeper.spawn(rx);

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
